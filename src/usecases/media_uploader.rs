//! Media Uploader: delivers downloaded artifacts to every target via
//! first-target-then-copy, recording per-target success in the History
//! Store and applying the caption policy.

use crate::domain::{
    CanonicalKey, ChannelRef, DomainError, LocalArtifact, MessageDescriptor, MessageKind,
    UploadItem, UploadOutcome,
};
use crate::ports::{HistoryStorePort, TgGateway};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MAX_CAPTION_LEN: usize = 1024;

pub struct CaptionPolicy {
    pub remove_captions: bool,
    pub template: Option<String>,
    pub include_attribution: bool,
}

impl CaptionPolicy {
    pub fn build(
        &self,
        original_caption: &str,
        date: i64,
        source_chat_id: i64,
        source_message_id: i32,
    ) -> String {
        if self.remove_captions {
            return String::new();
        }

        let mut caption = match &self.template {
            Some(template) => template
                .replace("{original_caption}", original_caption)
                .replace("{date}", &date.to_string())
                .replace("{source_chat_id}", &source_chat_id.to_string())
                .replace("{source_message_id}", &source_message_id.to_string()),
            None => original_caption.to_string(),
        };

        if self.include_attribution {
            let attribution = format!("\n\nForwarded from {source_chat_id}");
            if caption.len() + attribution.len() <= MAX_CAPTION_LEN {
                caption.push_str(&attribution);
            }
        }

        if caption.len() > MAX_CAPTION_LEN {
            caption.truncate(MAX_CAPTION_LEN);
        }

        caption
    }
}

pub struct MediaUploader {
    gateway: Arc<dyn TgGateway>,
    history: Arc<dyn HistoryStorePort>,
    caption_policy: CaptionPolicy,
}

impl MediaUploader {
    pub fn new(
        gateway: Arc<dyn TgGateway>,
        history: Arc<dyn HistoryStorePort>,
        caption_policy: CaptionPolicy,
    ) -> Self {
        Self {
            gateway,
            history,
            caption_policy,
        }
    }

    fn make_item(&self, artifact: &LocalArtifact, descriptor: &MessageDescriptor, source_chat_id: i64) -> UploadItem {
        let caption = self.caption_policy.build(
            &descriptor.caption,
            descriptor.date,
            source_chat_id,
            descriptor.message_id,
        );
        UploadItem {
            path: artifact.path.clone(),
            kind: descriptor.kind,
            caption,
            caption_entities: if caption == descriptor.caption {
                descriptor.caption_entities.clone()
            } else {
                Vec::new()
            },
        }
    }

    /// Upload a single artifact to every target, first-target-then-copy.
    pub async fn upload_single(
        &self,
        source_chat_id: i64,
        artifact: &LocalArtifact,
        descriptor: &MessageDescriptor,
        targets: &[ChannelRef],
    ) -> Vec<UploadOutcome> {
        let mut outcomes = Vec::with_capacity(targets.len());
        let mut first_success: Option<(CanonicalKey, i32)> = None;

        for target in targets {
            let target_key = target.canonical.clone();
            let already = self
                .history
                .is_uploaded(&descriptor.source, descriptor.message_id, &target_key, &artifact.path)
                .await
                .unwrap_or(false);
            if already {
                outcomes.push(UploadOutcome {
                    target: target_key,
                    remote_message_ids: Vec::new(),
                    succeeded: true,
                });
                continue;
            }

            let Some(target_chat_id) = target.numeric_id else {
                warn!(target = %target.display, "target has no numeric id, skipping");
                outcomes.push(UploadOutcome {
                    target: target_key,
                    remote_message_ids: Vec::new(),
                    succeeded: false,
                });
                continue;
            };

            let result = match &first_success {
                None => {
                    let item = self.make_item(artifact, descriptor, source_chat_id);
                    self.gateway.send_single(target_chat_id, &item).await
                }
                Some((_, remote_id)) => {
                    self.gateway
                        .copy_message(source_chat_id, *remote_id, target_chat_id)
                        .await
                }
            };

            match result {
                Ok(remote_id) => {
                    if first_success.is_none() {
                        first_success = Some((target_key.clone(), remote_id));
                    }
                    let _ = self
                        .history
                        .mark_uploaded(
                            &descriptor.source,
                            descriptor.message_id,
                            &target_key,
                            &artifact.path,
                            &[remote_id],
                            artifact.size,
                        )
                        .await;
                    info!(msg_id = descriptor.message_id, target = %target.display, remote_id, "uploaded");
                    outcomes.push(UploadOutcome {
                        target: target_key,
                        remote_message_ids: vec![remote_id],
                        succeeded: true,
                    });
                }
                Err(e) => {
                    warn!(msg_id = descriptor.message_id, target = %target.display, error = %e, "upload failed");
                    outcomes.push(UploadOutcome {
                        target: target_key,
                        remote_message_ids: Vec::new(),
                        succeeded: false,
                    });
                }
            }
        }

        outcomes
    }

    /// Upload an album atomically via `send_media_group`; on failure, fall
    /// back to per-item single sends and record partial success.
    pub async fn upload_album(
        &self,
        source_chat_id: i64,
        members: &[(LocalArtifact, MessageDescriptor)],
        targets: &[ChannelRef],
    ) -> Vec<Vec<UploadOutcome>> {
        if members.len() == 1 {
            let (artifact, descriptor) = &members[0];
            return vec![self.upload_single(source_chat_id, artifact, descriptor, targets).await];
        }

        let mut per_member_outcomes: Vec<Vec<UploadOutcome>> =
            members.iter().map(|_| Vec::new()).collect();

        let mut first_target_remote_ids: Option<Vec<Option<i32>>> = None;

        for (idx, target) in targets.iter().enumerate() {
            let Some(target_chat_id) = target.numeric_id else {
                continue;
            };

            if idx == 0 {
                let mut already_done: Vec<bool> = Vec::with_capacity(members.len());
                for (artifact, descriptor) in members.iter() {
                    let done = self
                        .history
                        .is_uploaded(&descriptor.source, descriptor.message_id, &target.canonical, &artifact.path)
                        .await
                        .unwrap_or(false);
                    if done {
                        per_member_outcomes[already_done.len()].push(UploadOutcome {
                            target: target.canonical.clone(),
                            remote_message_ids: Vec::new(),
                            succeeded: true,
                        });
                    }
                    already_done.push(done);
                }

                let pending: Vec<usize> = (0..members.len()).filter(|m| !already_done[*m]).collect();
                let mut remote_ids: Vec<Option<i32>> = vec![None; members.len()];

                if pending.is_empty() {
                    // Nothing left to send; target0's remote ids are unknown for
                    // the copy pass below, so targets[1..] also treat this album
                    // as fully settled via their own per-member checks.
                    first_target_remote_ids = Some(vec![None; members.len()]);
                    continue;
                }

                let items: Vec<UploadItem> = pending
                    .iter()
                    .map(|&m| self.make_item(&members[m].0, &members[m].1, source_chat_id))
                    .collect();

                match self.gateway.send_media_group(target_chat_id, &items).await {
                    Ok(sent_ids) if sent_ids.len() == pending.len() => {
                        for (&m, remote_id) in pending.iter().zip(sent_ids.iter()) {
                            let (artifact, descriptor) = &members[m];
                            let _ = self
                                .history
                                .mark_uploaded(
                                    &descriptor.source,
                                    descriptor.message_id,
                                    &target.canonical,
                                    &artifact.path,
                                    &[*remote_id],
                                    artifact.size,
                                )
                                .await;
                            remote_ids[m] = Some(*remote_id);
                            per_member_outcomes[m].push(UploadOutcome {
                                target: target.canonical.clone(),
                                remote_message_ids: vec![*remote_id],
                                succeeded: true,
                            });
                        }
                    }
                    _ => {
                        debug!("send_media_group failed, falling back to per-item sends");
                        for &m in &pending {
                            let (artifact, descriptor) = &members[m];
                            let item = self.make_item(artifact, descriptor, source_chat_id);
                            match self.gateway.send_single(target_chat_id, &item).await {
                                Ok(remote_id) => {
                                    let _ = self
                                        .history
                                        .mark_uploaded(
                                            &descriptor.source,
                                            descriptor.message_id,
                                            &target.canonical,
                                            &artifact.path,
                                            &[remote_id],
                                            artifact.size,
                                        )
                                        .await;
                                    remote_ids[m] = Some(remote_id);
                                    per_member_outcomes[m].push(UploadOutcome {
                                        target: target.canonical.clone(),
                                        remote_message_ids: vec![remote_id],
                                        succeeded: true,
                                    });
                                }
                                Err(e) => {
                                    warn!(msg_id = descriptor.message_id, error = %e, "fallback single send failed");
                                    per_member_outcomes[m].push(UploadOutcome {
                                        target: target.canonical.clone(),
                                        remote_message_ids: Vec::new(),
                                        succeeded: false,
                                    });
                                }
                            }
                        }
                    }
                }
                first_target_remote_ids = Some(remote_ids);
                continue;
            }

            // targets[1..]: server-side copy referencing target0's remote ids.
            if let Some(remote_ids) = &first_target_remote_ids {
                for (m, (artifact, descriptor)) in members.iter().enumerate() {
                    let already = self
                        .history
                        .is_uploaded(&descriptor.source, descriptor.message_id, &target.canonical, &artifact.path)
                        .await
                        .unwrap_or(false);
                    if already {
                        per_member_outcomes[m].push(UploadOutcome {
                            target: target.canonical.clone(),
                            remote_message_ids: Vec::new(),
                            succeeded: true,
                        });
                        continue;
                    }

                    let Some(source_remote_id) = remote_ids.get(m).copied().flatten() else {
                        continue;
                    };
                    match self
                        .gateway
                        .copy_message(source_chat_id, source_remote_id, target_chat_id)
                        .await
                    {
                        Ok(remote_id) => {
                            let _ = self
                                .history
                                .mark_uploaded(
                                    &descriptor.source,
                                    descriptor.message_id,
                                    &target.canonical,
                                    &artifact.path,
                                    &[remote_id],
                                    artifact.size,
                                )
                                .await;
                            per_member_outcomes[m].push(UploadOutcome {
                                target: target.canonical.clone(),
                                remote_message_ids: vec![remote_id],
                                succeeded: true,
                            });
                        }
                        Err(e) => {
                            warn!(msg_id = descriptor.message_id, target = %target.display, error = %e, "copy to target failed");
                            per_member_outcomes[m].push(UploadOutcome {
                                target: target.canonical.clone(),
                                remote_message_ids: Vec::new(),
                                succeeded: false,
                            });
                        }
                    }
                }
            }
        }

        per_member_outcomes
    }
}

pub fn kind_can_album(kind: MessageKind) -> bool {
    matches!(kind, MessageKind::Photo | MessageKind::Video)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_policy_removes_when_requested() {
        let policy = CaptionPolicy {
            remove_captions: true,
            template: None,
            include_attribution: false,
        };
        assert_eq!(policy.build("hello", 0, 1, 2), "");
    }

    #[test]
    fn caption_policy_substitutes_template_tokens() {
        let policy = CaptionPolicy {
            remove_captions: false,
            template: Some("{original_caption} (from {source_chat_id}/{source_message_id})".into()),
            include_attribution: false,
        };
        assert_eq!(policy.build("hi", 0, 100, 5), "hi (from 100/5)");
    }

    #[test]
    fn caption_policy_preserves_when_no_template() {
        let policy = CaptionPolicy {
            remove_captions: false,
            template: None,
            include_attribution: false,
        };
        assert_eq!(policy.build("plain", 0, 1, 2), "plain");
    }

    #[test]
    fn attribution_skipped_when_it_would_overflow() {
        let long_caption = "x".repeat(MAX_CAPTION_LEN - 5);
        let policy = CaptionPolicy {
            remove_captions: false,
            template: None,
            include_attribution: true,
        };
        let result = policy.build(&long_caption, 0, 1, 2);
        assert!(result.len() <= MAX_CAPTION_LEN);
        assert!(!result.contains("Forwarded from"));
    }
}
