//! Application configuration. Credentials, channel pairs, paths, tuning knobs.

use crate::domain::{ForwardPair, ForwardRunConfig, MessageKind};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub api_id: i32,
    pub api_hash: String,
    #[serde(default = "default_session_name")]
    pub session_name: String,
}

fn default_session_name() -> String {
    "tg-forward".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ForwardConfig {
    pub forward_channel_pairs: Vec<ForwardPair>,
    #[serde(default)]
    pub start_id: i32,
    #[serde(default)]
    pub end_id: i32,
    #[serde(default)]
    pub limit: i32,
    #[serde(default)]
    pub media_types: Vec<MessageKind>,
    #[serde(default)]
    pub remove_captions: bool,
    /// Inter-message sleep, in seconds. Read as a float in config files.
    #[serde(default = "default_forward_delay")]
    pub forward_delay: f64,
    /// Extra pause inserted every N messages to further spread out load.
    #[serde(default)]
    pub pause_time: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-call timeout in seconds, passed to the rate-limit adapter.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    pub caption_template: Option<String>,
    #[serde(default)]
    pub include_attribution: bool,
}

fn default_forward_delay() -> f64 {
    1.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    30
}

impl ForwardConfig {
    /// Project onto the subset the Forwarding Engine actually consumes.
    pub fn to_run_config(&self) -> ForwardRunConfig {
        ForwardRunConfig {
            forward_channel_pairs: self.forward_channel_pairs.clone(),
            start_id: self.start_id,
            end_id: self.end_id,
            limit: self.limit,
            media_types: self.media_types.clone(),
            remove_captions: self.remove_captions,
            forward_delay_ms: (self.forward_delay * 1000.0) as u64,
            max_retries: self.max_retries,
            caption_template: self.caption_template.clone(),
            include_attribution: self.include_attribution,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_directory")]
    pub directory: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Linear back-off base, in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    /// Concurrency knob. Default and recommended value is 1 — kept serial to
    /// minimize rate-limit triggering.
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,
    #[serde(default = "default_download_history")]
    pub download_history: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            retry_count: default_retry_count(),
            retry_delay: default_retry_delay(),
            concurrent_downloads: default_concurrent_downloads(),
            download_history: default_download_history(),
        }
    }
}

fn default_directory() -> String {
    "downloads".to_string()
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    2.0
}

fn default_concurrent_downloads() -> usize {
    1
}

fn default_download_history() -> String {
    "download_history.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Wait, in seconds, between consecutive uploads of the same item to
    /// different targets (distinct from `forward_delay`, which paces messages).
    #[serde(default = "default_wait_between_messages")]
    pub wait_between_messages: f64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    #[serde(default = "default_concurrent_uploads")]
    pub concurrent_uploads: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            wait_between_messages: default_wait_between_messages(),
            retry_count: default_retry_count(),
            retry_delay: default_retry_delay(),
            concurrent_uploads: default_concurrent_uploads(),
        }
    }
}

fn default_wait_between_messages() -> f64 {
    1.0
}

fn default_concurrent_uploads() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_tmp_path")]
    pub tmp_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tmp_path: default_tmp_path(),
        }
    }
}

fn default_tmp_path() -> String {
    "tmp".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("TGFWD").separator("__"));
        if let Ok(path) = std::env::var("TGFWD_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c.build()?.try_deserialize()
    }

    /// Upload worker pool size (default N=3, per the concurrency model).
    pub fn upload_workers(&self) -> usize {
        self.upload.concurrent_uploads.max(1)
    }
}
