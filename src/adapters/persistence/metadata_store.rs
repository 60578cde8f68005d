//! JSONL append-only side-file of `MessageDescriptor` records, one line per
//! message, keyed by source channel. Lets the pipeline reassemble albums and
//! resume fetch progress across restarts without re-hitting the platform.

use crate::domain::{CanonicalKey, DomainError, MessageDescriptor};
use crate::ports::MetadataStorePort;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

pub struct JsonlMetadataStore {
    base_dir: PathBuf,
    locks: Mutex<()>,
}

impl JsonlMetadataStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            locks: Mutex::new(()),
        }
    }

    fn path_for(&self, source: &CanonicalKey) -> PathBuf {
        let safe_key = source.history_key().replace(['/', '\\'], "_");
        self.base_dir.join(format!("{safe_key}.jsonl"))
    }
}

#[async_trait::async_trait]
impl MetadataStorePort for JsonlMetadataStore {
    async fn append(
        &self,
        source: &CanonicalKey,
        descriptor: &MessageDescriptor,
    ) -> Result<(), DomainError> {
        let _guard = self.locks.lock().await;
        let path = self.path_for(source);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::History(format!("create metadata dir: {e}")))?;
        }

        let line = serde_json::to_string(descriptor)
            .map_err(|e| DomainError::History(e.to_string()))?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| DomainError::History(format!("open metadata file: {e}")))?;
        f.write_all(line.as_bytes())
            .await
            .map_err(|e| DomainError::History(format!("write metadata line: {e}")))?;
        f.write_all(b"\n")
            .await
            .map_err(|e| DomainError::History(format!("write metadata newline: {e}")))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::History(format!("sync metadata file: {e}")))?;
        Ok(())
    }

    async fn load_pending(
        &self,
        source: &CanonicalKey,
    ) -> Result<Vec<MessageDescriptor>, DomainError> {
        let _guard = self.locks.lock().await;
        let path = self.path_for(source);
        let Ok(f) = fs::File::open(&path).await else {
            return Ok(Vec::new());
        };

        let mut reader = BufReader::new(f).lines();
        let mut by_id = std::collections::HashMap::new();
        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| DomainError::History(format!("read metadata line: {e}")))?
        {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MessageDescriptor>(&line) {
                Ok(descriptor) => {
                    by_id.insert(descriptor.message_id, descriptor);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed metadata line");
                }
            }
        }

        let mut result: Vec<_> = by_id.into_values().collect();
        result.sort_by_key(|d| d.message_id);
        Ok(result)
    }

    async fn remove(
        &self,
        source: &CanonicalKey,
        message_ids: &[i32],
    ) -> Result<(), DomainError> {
        let _guard = self.locks.lock().await;
        let path = self.path_for(source);
        let Ok(f) = fs::File::open(&path).await else {
            return Ok(());
        };

        let remove_set: HashSet<i32> = message_ids.iter().copied().collect();
        let mut reader = BufReader::new(f).lines();
        let mut kept = Vec::new();
        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| DomainError::History(format!("read metadata line: {e}")))?
        {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(descriptor) = serde_json::from_str::<MessageDescriptor>(&line) {
                if !remove_set.contains(&descriptor.message_id) {
                    kept.push(line);
                }
            }
        }

        let temp_path = path.with_extension("jsonl.tmp");
        let mut out = fs::File::create(&temp_path)
            .await
            .map_err(|e| DomainError::History(format!("create temp metadata file: {e}")))?;
        for line in &kept {
            out.write_all(line.as_bytes())
                .await
                .map_err(|e| DomainError::History(format!("write temp metadata line: {e}")))?;
            out.write_all(b"\n")
                .await
                .map_err(|e| DomainError::History(format!("write temp metadata newline: {e}")))?;
        }
        out.sync_all()
            .await
            .map_err(|e| DomainError::History(format!("sync temp metadata file: {e}")))?;
        drop(out);
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| DomainError::History(format!("atomic rename failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageKind;
    use tempfile::tempdir;

    fn descriptor(message_id: i32) -> MessageDescriptor {
        MessageDescriptor {
            source: CanonicalKey::Id(1),
            message_id,
            kind: MessageKind::Text,
            album_key: None,
            caption: String::new(),
            caption_entities: Vec::new(),
            date: 0,
            attrs: Default::default(),
        }
    }

    #[tokio::test]
    async fn append_then_load_pending_dedups_by_id() {
        let dir = tempdir().unwrap();
        let store = JsonlMetadataStore::new(dir.path().to_path_buf());
        let source = CanonicalKey::Id(1);

        store.append(&source, &descriptor(1)).await.unwrap();
        store.append(&source, &descriptor(2)).await.unwrap();
        store.append(&source, &descriptor(1)).await.unwrap();

        let pending = store.load_pending(&source).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].message_id, 1);
        assert_eq!(pending[1].message_id, 2);
    }

    #[tokio::test]
    async fn remove_drops_entries_from_file() {
        let dir = tempdir().unwrap();
        let store = JsonlMetadataStore::new(dir.path().to_path_buf());
        let source = CanonicalKey::Id(1);

        store.append(&source, &descriptor(1)).await.unwrap();
        store.append(&source, &descriptor(2)).await.unwrap();
        store.remove(&source, &[1]).await.unwrap();

        let pending = store.load_pending(&source).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, 2);
    }

    #[tokio::test]
    async fn load_pending_on_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonlMetadataStore::new(dir.path().to_path_buf());
        let pending = store.load_pending(&CanonicalKey::Id(99)).await.unwrap();
        assert!(pending.is_empty());
    }
}
