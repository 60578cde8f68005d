//! Forwarding Engine: orchestrates direct-forward and download-upload modes,
//! enforcing at-most-once delivery per target.

use crate::domain::{
    CanonicalKey, ChannelRef, DeliveryMode, DomainError, ForwardRunConfig, MessageDescriptor,
    RunStats,
};
use crate::ports::{HistoryStorePort, TgGateway};
use crate::shared::rate_limiter::RateLimiter;
use crate::usecases::capability_prober::{sort_by_forward_allowed, CapabilityProber};
use crate::usecases::channel_resolver::ChannelResolver;
use crate::usecases::media_downloader::MediaDownloader;
use crate::usecases::media_uploader::{CaptionPolicy, MediaUploader};
use crate::usecases::message_fetcher::MessageFetcher;
use crate::usecases::pipeline_controller::PipelineController;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ForwardingEngine {
    gateway: Arc<dyn TgGateway>,
    history: Arc<dyn HistoryStorePort>,
    resolver: Arc<ChannelResolver>,
    prober: Arc<CapabilityProber>,
    pipeline: Arc<PipelineController>,
    upload_workers: usize,
}

impl ForwardingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn TgGateway>,
        history: Arc<dyn HistoryStorePort>,
        resolver: Arc<ChannelResolver>,
        prober: Arc<CapabilityProber>,
        pipeline: Arc<PipelineController>,
        upload_workers: usize,
    ) -> Self {
        Self {
            gateway,
            history,
            resolver,
            prober,
            pipeline,
            upload_workers,
        }
    }

    pub async fn run(&self, config: &ForwardRunConfig) -> Result<RunStats, DomainError> {
        let mut stats = RunStats::default();

        for pair in &config.forward_channel_pairs {
            let source = match self.resolver.resolve(&pair.source_channel).await {
                Ok(source) => source,
                Err(e) => {
                    stats.push_error(format!("source {}: {e}", pair.source_channel));
                    continue;
                }
            };

            let mut targets = self.resolver.resolve_list(&pair.target_channels).await;
            dedupe_by_canonical(&mut targets);

            let Some(source_chat_id) = source.numeric_id else {
                stats.push_error(format!("source {} has no numeric id", pair.source_channel));
                continue;
            };

            let source_cap = match self.prober.probe(&source).await {
                Ok(cap) => cap,
                Err(e) => {
                    stats.push_error(format!("probing source {}: {e}", pair.source_channel));
                    continue;
                }
            };

            if targets.is_empty() {
                info!(source = %source.display, "source probed but target list is empty, no delivery");
                continue;
            }

            let target_caps = self.prober.probe_all(&targets).await;
            let ordered_targets: Vec<ChannelRef> = sort_by_forward_allowed(target_caps)
                .into_iter()
                .map(|(channel, _)| channel)
                .collect();

            let mode = if source_cap.forward_allowed {
                DeliveryMode::DirectForward
            } else {
                DeliveryMode::DownloadUpload
            };

            info!(source = %source.display, ?mode, targets = ordered_targets.len(), "dispatching source");

            let pair_stats = match mode {
                DeliveryMode::DirectForward => {
                    self.run_direct_forward(source_chat_id, &source.canonical, &ordered_targets, config)
                        .await
                }
                DeliveryMode::DownloadUpload => {
                    self.pipeline
                        .run(source_chat_id, config.start_id, config.end_id, config.limit, ordered_targets)
                        .await
                }
            };

            stats.merge(pair_stats);
        }

        Ok(stats)
    }

    async fn run_direct_forward(
        &self,
        source_chat_id: i64,
        source_key: &CanonicalKey,
        targets: &[ChannelRef],
        config: &ForwardRunConfig,
    ) -> RunStats {
        let fetcher = Arc::new(MessageFetcher::new(self.gateway.clone()));
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let fetcher_clone = fetcher.clone();
        let start_id = config.start_id;
        let end_id = config.end_id;
        let limit = config.limit;
        let fetch_task = tokio::spawn(async move {
            let _ = fetcher_clone.stream(source_chat_id, start_id, end_id, limit, tx).await;
        });

        let rate_limiter = RateLimiter::new(config.max_retries);
        let mut stats = RunStats::default();

        while let Some(batch) = rx.recv().await {
            for descriptor in batch.singles {
                self.forward_single(
                    source_chat_id,
                    source_key,
                    &descriptor,
                    targets,
                    config,
                    &rate_limiter,
                    &mut stats,
                )
                .await;
                if config.forward_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(config.forward_delay_ms)).await;
                }
            }

            for mut album in batch.albums {
                album.sort_by_key(|d| d.message_id);
                self.forward_album(
                    source_chat_id,
                    source_key,
                    &album,
                    targets,
                    config,
                    &rate_limiter,
                    &mut stats,
                )
                .await;
                if config.forward_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(config.forward_delay_ms)).await;
                }
            }
        }

        let _ = fetch_task.await;
        stats
    }

    async fn forward_single(
        &self,
        source_chat_id: i64,
        source_key: &CanonicalKey,
        descriptor: &MessageDescriptor,
        targets: &[ChannelRef],
        config: &ForwardRunConfig,
        rate_limiter: &RateLimiter,
        stats: &mut RunStats,
    ) {
        stats.total += 1;

        if !config.allowed_kind(descriptor.kind) {
            stats.skipped += 1;
            return;
        }

        let mut pending = Vec::with_capacity(targets.len());
        for target in targets {
            let already = self
                .history
                .is_forwarded(source_key, descriptor.message_id, &target.canonical)
                .await
                .unwrap_or(false);
            if !already {
                pending.push(target);
            }
        }

        if pending.is_empty() {
            stats.skipped += 1;
            stats.success += 1;
            return;
        }

        let mut all_ok = true;
        for target in pending {
            let Some(target_chat_id) = target.numeric_id else {
                all_ok = false;
                stats.push_error(format!("target {} has no numeric id", target.display));
                continue;
            };

            let msg_id = descriptor.message_id;
            let remove_captions = config.remove_captions;
            let gateway = self.gateway.clone();
            let result = rate_limiter
                .with_retry(
                    || {
                        let gateway = gateway.clone();
                        async move {
                            if remove_captions {
                                gateway.copy_message(source_chat_id, msg_id, target_chat_id).await
                            } else {
                                gateway.forward_message(source_chat_id, msg_id, target_chat_id).await
                            }
                        }
                    },
                    || async { Ok(()) },
                )
                .await;

            match result {
                Ok(remote_id) => {
                    let _ = self
                        .history
                        .mark_forwarded(source_key, descriptor.message_id, &target.canonical, remote_id)
                        .await;
                }
                Err(e) => {
                    all_ok = false;
                    warn!(msg_id, target = %target.display, error = %e, "direct forward failed");
                    stats.push_error(format!("forward {msg_id} -> {}: {e}", target.display));
                }
            }
        }

        if all_ok {
            stats.success += 1;
        } else {
            stats.failed += 1;
        }
    }

    async fn forward_album(
        &self,
        source_chat_id: i64,
        source_key: &CanonicalKey,
        members: &[MessageDescriptor],
        targets: &[ChannelRef],
        config: &ForwardRunConfig,
        rate_limiter: &RateLimiter,
        stats: &mut RunStats,
    ) {
        stats.total += 1;

        let Some(representative) = members.first() else {
            return;
        };
        if !config.allowed_kind(representative.kind) {
            stats.skipped += 1;
            return;
        }

        let mut any_attempted = false;
        let mut all_ok = true;

        for descriptor in members {
            for target in targets {
                let already = self
                    .history
                    .is_forwarded(source_key, descriptor.message_id, &target.canonical)
                    .await
                    .unwrap_or(false);
                if already {
                    continue;
                }
                any_attempted = true;
                let Some(target_chat_id) = target.numeric_id else {
                    all_ok = false;
                    continue;
                };

                let msg_id = descriptor.message_id;
                let remove_captions = config.remove_captions;
                let gateway = self.gateway.clone();
                let result = rate_limiter
                    .with_retry(
                        || {
                            let gateway = gateway.clone();
                            async move {
                                if remove_captions {
                                    gateway.copy_message(source_chat_id, msg_id, target_chat_id).await
                                } else {
                                    gateway.forward_message(source_chat_id, msg_id, target_chat_id).await
                                }
                            }
                        },
                        || async { Ok(()) },
                    )
                    .await;

                match result {
                    Ok(remote_id) => {
                        let _ = self
                            .history
                            .mark_forwarded(source_key, descriptor.message_id, &target.canonical, remote_id)
                            .await;
                    }
                    Err(e) => {
                        all_ok = false;
                        warn!(msg_id, target = %target.display, error = %e, "album member forward failed");
                        stats.push_error(format!("forward album member {msg_id} -> {}: {e}", target.display));
                    }
                }
            }
        }

        if !any_attempted {
            stats.skipped += 1;
            stats.success += 1;
        } else if all_ok {
            stats.success += 1;
        } else {
            stats.failed += 1;
        }
    }
}

fn dedupe_by_canonical(targets: &mut Vec<ChannelRef>) {
    let mut seen = HashSet::new();
    targets.retain(|t| seen.insert(t.canonical.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::json_history::JsonHistoryStore;
    use crate::adapters::persistence::metadata_store::JsonlMetadataStore;
    use crate::domain::{CaptionEntity, MediaAttrs, MessageKind, RawCapability, ResolvedChat, UploadItem};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct FakeDirectForwardGateway {
        forward_calls: StdMutex<u32>,
        messages: Vec<MessageDescriptor>,
    }

    #[async_trait]
    impl TgGateway for FakeDirectForwardGateway {
        async fn resolve_chat(
            &self,
            parsed: &crate::domain::ParsedChannel,
        ) -> Result<ResolvedChat, DomainError> {
            let numeric_id = match &parsed.key {
                CanonicalKey::Id(id) => *id,
                CanonicalKey::Name(name) => name.len() as i64 * -1,
            };
            Ok(ResolvedChat {
                numeric_id,
                display: format!("{:?}", parsed.key),
            })
        }
        async fn join_if_needed(&self, _parsed: &crate::domain::ParsedChannel) -> Result<(), DomainError> {
            Ok(())
        }
        async fn probe_capability(&self, _chat_id: i64) -> Result<RawCapability, DomainError> {
            Ok(RawCapability {
                readable: true,
                writable: true,
                forward_allowed: true,
            })
        }
        async fn list_messages(
            &self,
            _chat_id: i64,
            _start_id: i32,
            _end_id: i32,
            _limit: i32,
        ) -> Result<Vec<MessageDescriptor>, DomainError> {
            Ok(self.messages.clone())
        }
        async fn get_media_group(
            &self,
            _chat_id: i64,
            _message_id: i32,
        ) -> Result<Vec<MessageDescriptor>, DomainError> {
            Ok(vec![])
        }
        async fn download_media(
            &self,
            _chat_id: i64,
            _descriptor: &MessageDescriptor,
            _dest_path: &std::path::Path,
        ) -> Result<(), DomainError> {
            Ok(())
        }
        async fn forward_message(
            &self,
            _source_chat_id: i64,
            _message_id: i32,
            _target_chat_id: i64,
        ) -> Result<i32, DomainError> {
            let mut calls = self.forward_calls.lock().unwrap();
            *calls += 1;
            Ok(*calls as i32)
        }
        async fn send_single(&self, _target_chat_id: i64, _item: &UploadItem) -> Result<i32, DomainError> {
            Ok(1)
        }
        async fn send_media_group(
            &self,
            _target_chat_id: i64,
            _items: &[UploadItem],
        ) -> Result<Vec<i32>, DomainError> {
            Ok(vec![])
        }
        async fn copy_message(
            &self,
            _source_chat_id: i64,
            _message_id: i32,
            _target_chat_id: i64,
        ) -> Result<i32, DomainError> {
            Ok(1)
        }
    }

    fn descriptor(id: i32) -> MessageDescriptor {
        MessageDescriptor {
            source: CanonicalKey::Id(1),
            message_id: id,
            kind: MessageKind::Text,
            album_key: None,
            caption: String::new(),
            caption_entities: Vec::<CaptionEntity>::new(),
            date: 0,
            attrs: MediaAttrs::default(),
        }
    }

    #[tokio::test]
    async fn scenario_forward_allowed_three_messages_two_targets() {
        let dir = tempdir().unwrap();
        let gateway: Arc<dyn TgGateway> = Arc::new(FakeDirectForwardGateway {
            forward_calls: StdMutex::new(0),
            messages: vec![descriptor(100), descriptor(99), descriptor(98)],
        });
        let history: Arc<dyn HistoryStorePort> =
            Arc::new(JsonHistoryStore::new(dir.path().to_path_buf()));
        let resolver = Arc::new(ChannelResolver::new(gateway.clone()));
        let prober = Arc::new(CapabilityProber::new(gateway.clone()));
        let metadata = Arc::new(JsonlMetadataStore::new(dir.path().to_path_buf()));
        let fetcher = Arc::new(MessageFetcher::new(gateway.clone()));
        let downloader = Arc::new(MediaDownloader::new(
            gateway.clone(),
            history.clone(),
            metadata,
            dir.path().to_path_buf(),
        ));
        let uploader = Arc::new(MediaUploader::new(
            gateway.clone(),
            history.clone(),
            CaptionPolicy {
                remove_captions: false,
                template: None,
                include_attribution: false,
            },
        ));
        let pipeline = Arc::new(PipelineController::new(fetcher, downloader, uploader));

        let engine = ForwardingEngine::new(gateway, history, resolver, prober, pipeline, 3);

        let config = ForwardRunConfig {
            forward_channel_pairs: vec![crate::domain::ForwardPair {
                source_channel: "@src".to_string(),
                target_channels: vec!["@a".to_string(), "@b".to_string()],
            }],
            start_id: 100,
            end_id: 98,
            limit: 10,
            media_types: vec![],
            remove_captions: false,
            forward_delay_ms: 0,
            max_retries: 3,
            caption_template: None,
            include_attribution: false,
        };

        let stats = engine.run(&config).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.skipped, 0);

        // Re-run: should be fully idempotent (all skipped+success, no new platform calls needed).
        let stats2 = engine.run(&config).await.unwrap();
        assert_eq!(stats2.total, 3);
        assert_eq!(stats2.success, 3);
        assert_eq!(stats2.skipped, 3);
    }
}
