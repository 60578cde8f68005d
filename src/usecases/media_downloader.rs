//! Media Downloader: downloads message media to local storage, serially per
//! source by design, with retry, a zero-byte guard, and metadata capture for
//! later album reassembly.

use crate::domain::{
    CanonicalKey, DomainError, DownloadBatchResult, LocalArtifact, MessageDescriptor,
};
use crate::ports::{HistoryStorePort, MetadataStorePort, TgGateway};
use crate::usecases::message_fetcher::Batch;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
pub const RATE_LIMIT_CEILING_SECS: u64 = 300;

pub struct MediaDownloader {
    gateway: Arc<dyn TgGateway>,
    history: Arc<dyn HistoryStorePort>,
    metadata: Arc<dyn MetadataStorePort>,
    download_dir: PathBuf,
    retry_count: u32,
    retry_delay: Duration,
}

impl MediaDownloader {
    pub fn new(
        gateway: Arc<dyn TgGateway>,
        history: Arc<dyn HistoryStorePort>,
        metadata: Arc<dyn MetadataStorePort>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            gateway,
            history,
            metadata,
            download_dir,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }

    /// Synthesize the deterministic on-disk path for a descriptor:
    /// `{chat-id}_{msg-id}[_group_{album-key}].{ext}`.
    pub fn artifact_path(&self, chat_id: i64, descriptor: &MessageDescriptor) -> PathBuf {
        let mut name = format!("{chat_id}_{}", descriptor.message_id);
        if let Some(album_key) = descriptor.album_key {
            name.push_str(&format!("_group_{album_key}"));
        }
        if let Some(original) = &descriptor.attrs.file_name {
            let sanitized: String = original
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
                .collect();
            name.push('_');
            name.push_str(&sanitized);
        } else {
            name.push('.');
            name.push_str(descriptor.kind.default_extension());
        }
        self.download_dir.join(name)
    }

    pub async fn download_one(
        &self,
        chat_id: i64,
        descriptor: MessageDescriptor,
    ) -> Result<Option<LocalArtifact>, DomainError> {
        let source = descriptor.source.clone();

        if self
            .history
            .is_downloaded(&source, descriptor.message_id)
            .await?
        {
            let existing = self.artifact_path(chat_id, &descriptor);
            if file_nonempty(&existing).await {
                debug!(msg_id = descriptor.message_id, "already downloaded, skipping");
                return Ok(None);
            }
        }

        let path = self.artifact_path(chat_id, &descriptor);
        let mut attempt = 0u32;

        loop {
            match self.gateway.download_media(chat_id, &descriptor, &path).await {
                Ok(()) => {
                    if !file_nonempty(&path).await {
                        warn!(msg_id = descriptor.message_id, "zero-byte download, retrying");
                        let _ = tokio::fs::remove_file(&path).await;
                        if attempt >= self.retry_count {
                            return Err(DomainError::Media(format!(
                                "zero-byte download for message {}",
                                descriptor.message_id
                            )));
                        }
                        attempt += 1;
                        tokio::time::sleep(self.retry_delay * (attempt + 1)).await;
                        continue;
                    }
                    break;
                }
                Err(DomainError::RateLimit { seconds }) => {
                    if seconds > RATE_LIMIT_CEILING_SECS {
                        return Err(DomainError::RateLimit { seconds });
                    }
                    debug!(msg_id = descriptor.message_id, wait_secs = seconds, "download rate limited");
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                    continue;
                }
                Err(e) => {
                    if attempt >= self.retry_count {
                        return Err(e);
                    }
                    let delay = self.retry_delay * (attempt + 1);
                    warn!(msg_id = descriptor.message_id, attempt, error = %e, "download failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
        }

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| DomainError::Media(format!("stat downloaded file: {e}")))?;

        self.history
            .mark_downloaded(&source, descriptor.message_id, &path)
            .await?;
        self.metadata.append(&source, &descriptor).await?;

        info!(msg_id = descriptor.message_id, bytes = metadata.len(), "downloaded");

        Ok(Some(LocalArtifact {
            path: path.clone(),
            size: metadata.len(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source,
            message_id: descriptor.message_id,
        }))
    }

    /// Download every message in `batch` as its own minimal work-unit (an
    /// album downloads as a whole, a single as one message).
    pub async fn download_batch(
        &self,
        chat_id: i64,
        batch: Batch,
    ) -> DownloadBatchResult {
        let mut result = DownloadBatchResult::default();

        for descriptor in batch.singles {
            let msg_id = descriptor.message_id;
            match self.download_one(chat_id, descriptor.clone()).await {
                Ok(Some(artifact)) => result.success.push((artifact, descriptor)),
                Ok(None) => result.skipped.push(msg_id),
                Err(e) => result.failed.push((msg_id, e.to_string())),
            }
        }

        for album in batch.albums {
            for descriptor in album {
                let msg_id = descriptor.message_id;
                match self.download_one(chat_id, descriptor.clone()).await {
                    Ok(Some(artifact)) => result.success.push((artifact, descriptor)),
                    Ok(None) => result.skipped.push(msg_id),
                    Err(e) => result.failed.push((msg_id, e.to_string())),
                }
            }
        }

        result
    }
}

async fn file_nonempty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::json_history::JsonHistoryStore;
    use crate::adapters::persistence::metadata_store::JsonlMetadataStore;
    use crate::domain::{CaptionEntity, MediaAttrs, MessageKind, RawCapability};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct FlakyGateway {
        fail_times: AtomicU32,
        write_empty: bool,
    }

    #[async_trait]
    impl TgGateway for FlakyGateway {
        async fn resolve_chat(
            &self,
            _parsed: &crate::domain::ParsedChannel,
        ) -> Result<crate::domain::ResolvedChat, DomainError> {
            unimplemented!()
        }
        async fn join_if_needed(
            &self,
            _parsed: &crate::domain::ParsedChannel,
        ) -> Result<(), DomainError> {
            Ok(())
        }
        async fn probe_capability(&self, _chat_id: i64) -> Result<RawCapability, DomainError> {
            Ok(RawCapability::default())
        }
        async fn list_messages(
            &self,
            _chat_id: i64,
            _start_id: i32,
            _end_id: i32,
            _limit: i32,
        ) -> Result<Vec<MessageDescriptor>, DomainError> {
            Ok(vec![])
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
            dest_path: &Path,
        ) -> Result<(), DomainError> {
            let remaining = self.fail_times.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                if self.write_empty {
                    tokio::fs::write(dest_path, b"").await.unwrap();
                    return Ok(());
                }
                return Err(DomainError::TgGateway("transient".into()));
            }
            tokio::fs::write(dest_path, b"some bytes").await.unwrap();
            Ok(())
        }
        async fn forward_message(
            &self,
            _source_chat_id: i64,
            _message_id: i32,
            _target_chat_id: i64,
        ) -> Result<i32, DomainError> {
            Ok(1)
        }
        async fn send_single(
            &self,
            _target_chat_id: i64,
            _item: &crate::domain::UploadItem,
        ) -> Result<i32, DomainError> {
            Ok(1)
        }
        async fn send_media_group(
            &self,
            _target_chat_id: i64,
            _items: &[crate::domain::UploadItem],
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
            kind: MessageKind::Photo,
            album_key: None,
            caption: String::new(),
            caption_entities: Vec::<CaptionEntity>::new(),
            date: 0,
            attrs: MediaAttrs::default(),
        }
    }

    #[tokio::test]
    async fn zero_byte_then_success_records_once() {
        let dir = tempdir().unwrap();
        let gateway = Arc::new(FlakyGateway {
            fail_times: AtomicU32::new(1),
            write_empty: true,
        });
        let history = Arc::new(JsonHistoryStore::new(dir.path().to_path_buf()));
        let metadata = Arc::new(JsonlMetadataStore::new(dir.path().to_path_buf()));
        let downloader = MediaDownloader::new(
            gateway,
            history.clone(),
            metadata,
            dir.path().to_path_buf(),
        );

        let result = downloader
            .download_one(1, descriptor(7))
            .await
            .unwrap()
            .expect("should produce an artifact");
        assert!(result.size > 0);
        assert!(history.is_downloaded(&CanonicalKey::Id(1), 7).await.unwrap());
    }

    #[tokio::test]
    async fn already_downloaded_is_skipped() {
        let dir = tempdir().unwrap();
        let gateway = Arc::new(FlakyGateway {
            fail_times: AtomicU32::new(0),
            write_empty: false,
        });
        let history = Arc::new(JsonHistoryStore::new(dir.path().to_path_buf()));
        let metadata = Arc::new(JsonlMetadataStore::new(dir.path().to_path_buf()));
        let downloader = MediaDownloader::new(
            gateway,
            history.clone(),
            metadata,
            dir.path().to_path_buf(),
        );

        let first = downloader.download_one(1, descriptor(8)).await.unwrap();
        assert!(first.is_some());

        let second = downloader.download_one(1, descriptor(8)).await.unwrap();
        assert!(second.is_none());
    }
}
