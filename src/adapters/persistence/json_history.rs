//! Implements HistoryStorePort using three JSON documents: download, upload,
//! and forward history. Each is held in an in-memory cache guarded by a
//! single mutex, mutated, then written back with a write-temp-file +
//! `sync_all` + atomic-rename pattern so a crash mid-write never corrupts
//! the previous durable snapshot.

use crate::domain::{CanonicalKey, DomainError};
use crate::ports::HistoryStorePort;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelDownloads {
    channel_id: i64,
    downloaded_messages: Vec<i32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DownloadHistory {
    #[serde(default)]
    channels: HashMap<String, ChannelDownloads>,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UploadFileEntry {
    uploaded_to: Vec<String>,
    upload_time: DateTime<Utc>,
    file_size: u64,
    media_type: String,
    /// Extension beyond the literal shown shape: per-target remote message
    /// ids assigned by the platform, as required by the UploadRecord contract.
    #[serde(default)]
    remote_message_ids: HashMap<String, Vec<i32>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UploadHistory {
    #[serde(default)]
    files: HashMap<String, UploadFileEntry>,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelForwards {
    channel_id: i64,
    #[serde(default)]
    forwarded_messages: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ForwardHistory {
    #[serde(default)]
    channels: HashMap<String, ChannelForwards>,
    last_updated: Option<DateTime<Utc>>,
}

struct HistoryState {
    downloads: DownloadHistory,
    uploads: UploadHistory,
    forwards: ForwardHistory,
}

pub struct JsonHistoryStore {
    download_path: PathBuf,
    upload_path: PathBuf,
    forward_path: PathBuf,
    state: Mutex<HistoryState>,
}

fn load_or_default<T: Default + serde::de::DeserializeOwned>(path: &Path) -> T {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

async fn atomic_write(path: &Path, json: &str) -> Result<(), DomainError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DomainError::History(format!("create history dir: {e}")))?;
    }
    let temp_path = path.with_extension("json.tmp");
    let mut f = fs::File::create(&temp_path)
        .await
        .map_err(|e| DomainError::History(format!("create temp file: {e}")))?;
    f.write_all(json.as_bytes())
        .await
        .map_err(|e| DomainError::History(format!("write temp file: {e}")))?;
    f.sync_all()
        .await
        .map_err(|e| DomainError::History(format!("sync temp file: {e}")))?;
    drop(f);
    fs::rename(&temp_path, path)
        .await
        .map_err(|e| DomainError::History(format!("atomic rename failed: {e}")))?;
    Ok(())
}

impl JsonHistoryStore {
    pub fn new(base_dir: PathBuf) -> Self {
        let download_path = base_dir.join("download_history.json");
        let upload_path = base_dir.join("upload_history.json");
        let forward_path = base_dir.join("forward_history.json");

        let state = HistoryState {
            downloads: load_or_default(&download_path),
            uploads: load_or_default(&upload_path),
            forwards: load_or_default(&forward_path),
        };

        Self {
            download_path,
            upload_path,
            forward_path,
            state: Mutex::new(state),
        }
    }

    async fn save_downloads(&self, downloads: &DownloadHistory) -> Result<(), DomainError> {
        let json = serde_json::to_string_pretty(downloads)
            .map_err(|e| DomainError::History(e.to_string()))?;
        atomic_write(&self.download_path, &json).await
    }

    async fn save_uploads(&self, uploads: &UploadHistory) -> Result<(), DomainError> {
        let json = serde_json::to_string_pretty(uploads)
            .map_err(|e| DomainError::History(e.to_string()))?;
        atomic_write(&self.upload_path, &json).await
    }

    async fn save_forwards(&self, forwards: &ForwardHistory) -> Result<(), DomainError> {
        let json = serde_json::to_string_pretty(forwards)
            .map_err(|e| DomainError::History(e.to_string()))?;
        atomic_write(&self.forward_path, &json).await
    }
}

#[async_trait::async_trait]
impl HistoryStorePort for JsonHistoryStore {
    async fn is_forwarded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
        target: &CanonicalKey,
    ) -> Result<bool, DomainError> {
        let state = self.state.lock().await;
        let key = source.history_key();
        let Some(channel) = state.forwards.channels.get(&key) else {
            return Ok(false);
        };
        let Some(targets) = channel.forwarded_messages.get(&message_id.to_string()) else {
            return Ok(false);
        };
        let target_key = target.history_key();
        Ok(targets.iter().any(|t| *t == target_key))
    }

    async fn mark_forwarded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
        target: &CanonicalKey,
        _remote_message_id: i32,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let key = source.history_key();
        let channel = state.forwards.channels.entry(key).or_insert_with(|| ChannelForwards {
            channel_id: numeric_or_zero(source),
            forwarded_messages: HashMap::new(),
        });
        let targets = channel
            .forwarded_messages
            .entry(message_id.to_string())
            .or_default();
        let target_key = target.history_key();
        if !targets.contains(&target_key) {
            targets.push(target_key);
        }
        state.forwards.last_updated = Some(Utc::now());
        self.save_forwards(&state.forwards).await
    }

    async fn is_downloaded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
    ) -> Result<bool, DomainError> {
        let state = self.state.lock().await;
        let key = source.history_key();
        Ok(state
            .downloads
            .channels
            .get(&key)
            .map(|c| c.downloaded_messages.contains(&message_id))
            .unwrap_or(false))
    }

    async fn mark_downloaded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
        _file_path: &Path,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let key = source.history_key();
        let channel = state.downloads.channels.entry(key).or_insert_with(|| ChannelDownloads {
            channel_id: numeric_or_zero(source),
            downloaded_messages: Vec::new(),
        });
        if !channel.downloaded_messages.contains(&message_id) {
            channel.downloaded_messages.push(message_id);
        }
        state.downloads.last_updated = Some(Utc::now());
        self.save_downloads(&state.downloads).await
    }

    async fn is_uploaded(
        &self,
        _source: &CanonicalKey,
        _message_id: i32,
        target: &CanonicalKey,
        file_path: &Path,
    ) -> Result<bool, DomainError> {
        let state = self.state.lock().await;
        let target_key = target.history_key();
        let path_key = path_key(file_path);
        Ok(state
            .uploads
            .files
            .get(&path_key)
            .map(|entry| entry.uploaded_to.iter().any(|t| *t == target_key))
            .unwrap_or(false))
    }

    async fn mark_uploaded(
        &self,
        _source: &CanonicalKey,
        _message_id: i32,
        target: &CanonicalKey,
        file_path: &Path,
        remote_message_ids: &[i32],
        file_size: u64,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let path_key = path_key(file_path);
        let entry = state.uploads.files.entry(path_key).or_insert_with(|| UploadFileEntry {
            uploaded_to: Vec::new(),
            upload_time: Utc::now(),
            file_size,
            media_type: String::new(),
            remote_message_ids: HashMap::new(),
        });
        let target_key = target.history_key();
        if !entry.uploaded_to.contains(&target_key) {
            entry.uploaded_to.push(target_key.clone());
        }
        entry.remote_message_ids.insert(target_key, remote_message_ids.to_vec());
        entry.upload_time = Utc::now();
        entry.file_size = file_size;
        state.uploads.last_updated = Some(Utc::now());
        self.save_uploads(&state.uploads).await
    }

    async fn cleanup(&self, source: &CanonicalKey, max_age_days: u64) -> Result<(), DomainError> {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days as i64);
        let mut state = self.state.lock().await;
        let key = source.history_key();

        if state
            .downloads
            .last_updated
            .map(|t| t < cutoff)
            .unwrap_or(false)
        {
            state.downloads.channels.remove(&key);
            self.save_downloads(&state.downloads).await?;
        }

        if state
            .forwards
            .last_updated
            .map(|t| t < cutoff)
            .unwrap_or(false)
        {
            state.forwards.channels.remove(&key);
            self.save_forwards(&state.forwards).await?;
        }

        state.uploads.files.retain(|_, entry| entry.upload_time >= cutoff);
        self.save_uploads(&state.uploads).await?;

        Ok(())
    }

    async fn clear_history(&self, source: &CanonicalKey) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let key = source.history_key();
        state.downloads.channels.remove(&key);
        state.forwards.channels.remove(&key);
        state.downloads.last_updated = Some(Utc::now());
        state.forwards.last_updated = Some(Utc::now());
        self.save_downloads(&state.downloads).await?;
        self.save_forwards(&state.forwards).await?;
        Ok(())
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn numeric_or_zero(key: &CanonicalKey) -> i64 {
    match key {
        CanonicalKey::Id(id) => *id,
        CanonicalKey::Name(_) => 0,
    }
}
