//! Domain entities. Pure data structures for the core business.
//!
//! No Telegram/IO types here — these are mapped from adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

/// Resolver output: an integer once the platform has assigned one, else a
/// normalized string (bare username, or invite URL with scheme).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalKey {
    Id(i64),
    Name(String),
}

impl CanonicalKey {
    /// Key used to index the three history documents (see the history shapes).
    pub fn history_key(&self) -> String {
        match self {
            CanonicalKey::Id(id) => id.to_string(),
            CanonicalKey::Name(name) => name.clone(),
        }
    }
}

impl std::fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanonicalKey::Id(id) => write!(f, "{}", id),
            CanonicalKey::Name(name) => write!(f, "@{}", name),
        }
    }
}

/// A user-supplied channel identifier, resolved to a canonical key.
///
/// Invariant: resolution is pure for the cache TTL window — equal `raw`
/// inputs yield equal `canonical` values within that window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub raw: String,
    pub canonical: CanonicalKey,
    pub numeric_id: Option<i64>,
    pub display: String,
    /// Message id embedded in a URL form, e.g. `t.me/c/123/456`.
    pub embedded_message_id: Option<i32>,
}

impl ChannelRef {
    pub fn history_key(&self) -> String {
        self.canonical.history_key()
    }
}

/// Result of parsing a raw channel identifier, before any platform lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChannel {
    pub key: CanonicalKey,
    pub embedded_message_id: Option<i32>,
}

/// Capability snapshot for a channel, cached with a TTL by
/// [`crate::usecases::capability_prober`].
#[derive(Debug, Clone, Copy)]
pub struct CapabilityRecord {
    pub readable: bool,
    pub writable: bool,
    pub forward_allowed: bool,
    pub fetched_at: Instant,
}

/// Tagged union over the message kinds the uploader/downloader dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Photo,
    Video,
    Document,
    Audio,
    Animation,
    Voice,
    Sticker,
}

impl MessageKind {
    /// File extension used when synthesizing a download path for this kind.
    pub fn default_extension(self) -> &'static str {
        match self {
            MessageKind::Text => "txt",
            MessageKind::Photo => "jpg",
            MessageKind::Video => "mp4",
            MessageKind::Document => "bin",
            MessageKind::Audio => "ogg",
            MessageKind::Animation => "mp4",
            MessageKind::Voice => "ogg",
            MessageKind::Sticker => "webp",
        }
    }

    pub fn is_media(self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

/// Kind-specific attributes carried by a [`MessageDescriptor`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaAttrs {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<u32>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

/// A single caption entity (bold/italic/link/etc. span). Offsets are in
/// UTF-16 code units, matching the platform's own convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionEntity {
    pub kind: String,
    pub offset: i32,
    pub length: i32,
}

/// Identifies a concrete message by (source, message-id). Carries everything
/// needed to download, reassemble, and re-upload it without further platform
/// calls — this is the record persisted to the metadata side-file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub source: CanonicalKey,
    pub message_id: i32,
    pub kind: MessageKind,
    /// Album membership is immutable once observed: a message known to
    /// belong to an album keeps that binding for its lifetime.
    pub album_key: Option<i64>,
    pub caption: String,
    pub caption_entities: Vec<CaptionEntity>,
    pub date: i64,
    pub attrs: MediaAttrs,
}

/// A successfully downloaded file for a [`MessageDescriptor`].
///
/// Invariant: the file on disk has non-zero size and matches `path`.
#[derive(Debug, Clone)]
pub struct LocalArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub file_name: String,
    pub source: CanonicalKey,
    pub message_id: i32,
}

/// Result of a download batch (successes, failures with reason, already-seen skips).
#[derive(Debug, Default)]
pub struct DownloadBatchResult {
    pub success: Vec<(LocalArtifact, MessageDescriptor)>,
    pub failed: Vec<(i32, String)>,
    pub skipped: Vec<i32>,
}

/// Output of the album reassembler: albums keep source-order, singles keep
/// their own caption untouched.
#[derive(Debug, Default)]
pub struct Reassembled {
    pub albums: Vec<Vec<(LocalArtifact, MessageDescriptor)>>,
    pub singles: Vec<(LocalArtifact, MessageDescriptor)>,
}

/// Which delivery mode the Forwarding Engine picked for a source, based on
/// the source's `forward_allowed` capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    DirectForward,
    DownloadUpload,
}

/// One configured (source, targets) replication pair.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardPair {
    pub source_channel: String,
    pub target_channels: Vec<String>,
}

/// The `forward.*` configuration section, as consumed by the Engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardRunConfig {
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
    #[serde(default = "default_forward_delay_ms")]
    pub forward_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub caption_template: Option<String>,
    /// Optional source-attribution line, appended only if it keeps the total
    /// caption within the 1024-character platform limit.
    #[serde(default)]
    pub include_attribution: bool,
}

fn default_forward_delay_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

impl ForwardRunConfig {
    /// An empty allow-list means "allow every kind".
    pub fn allowed_kind(&self, kind: MessageKind) -> bool {
        self.media_types.is_empty() || self.media_types.contains(&kind)
    }
}

/// Run summary returned by the Forwarding Engine.
///
/// `error_messages` is bounded to the first [`RunStats::MAX_ERROR_MESSAGES`]
/// entries; beyond that, only `error_overflow` is incremented.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub error_messages: Vec<String>,
    pub error_overflow: u64,
}

impl RunStats {
    pub const MAX_ERROR_MESSAGES: usize = 50;

    pub fn push_error(&mut self, message: impl Into<String>) {
        if self.error_messages.len() < Self::MAX_ERROR_MESSAGES {
            self.error_messages.push(message.into());
        } else {
            self.error_overflow += 1;
        }
    }

    pub fn merge(&mut self, other: RunStats) {
        self.total += other.total;
        self.success += other.success;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.error_overflow += other.error_overflow;
        for msg in other.error_messages {
            self.push_error(msg);
        }
    }
}

/// Per-target remote-send outcome.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub target: CanonicalKey,
    pub remote_message_ids: Vec<i32>,
    pub succeeded: bool,
}

/// Snapshot of raw platform permissions, before TTL caching and
/// [`CapabilityRecord`] derivation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCapability {
    pub readable: bool,
    pub writable: bool,
    pub forward_allowed: bool,
}

/// A chat as resolved by the platform client (numeric id + display name).
#[derive(Debug, Clone)]
pub struct ResolvedChat {
    pub numeric_id: i64,
    pub display: String,
}

/// A fully-prepared upload item (single message or album member) handed to
/// the gateway's send methods.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub path: PathBuf,
    pub kind: MessageKind,
    pub caption: String,
    pub caption_entities: Vec<CaptionEntity>,
}

pub fn now_iso() -> DateTime<Utc> {
    Utc::now()
}
