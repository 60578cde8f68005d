//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    CanonicalKey, DomainError, MessageDescriptor, ParsedChannel, RawCapability, ResolvedChat,
    UploadItem,
};
use std::path::Path;

/// Telegram API gateway: resolution, permission probing, message listing,
/// media transfer, and the two delivery primitives (direct forward and
/// upload-from-disk).
#[async_trait::async_trait]
pub trait TgGateway: Send + Sync {
    /// Resolve a parsed channel reference to a live chat (numeric id + display name).
    async fn resolve_chat(&self, parsed: &ParsedChannel) -> Result<ResolvedChat, DomainError>;

    /// Join a public channel or accept an invite link, if not already a member.
    async fn join_if_needed(&self, parsed: &ParsedChannel) -> Result<(), DomainError>;

    /// Probe read/write/forward permissions for a resolved chat.
    async fn probe_capability(&self, chat_id: i64) -> Result<RawCapability, DomainError>;

    /// List messages in `(start_id, end_id]`, oldest first, capped at `limit`
    /// (0 = unbounded).
    async fn list_messages(
        &self,
        chat_id: i64,
        start_id: i32,
        end_id: i32,
        limit: i32,
    ) -> Result<Vec<MessageDescriptor>, DomainError>;

    /// Resolve the full member set of an album given any one member's id.
    async fn get_media_group(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<Vec<MessageDescriptor>, DomainError>;

    /// Download a message's media to `dest_path`. No-op target for text messages.
    async fn download_media(
        &self,
        chat_id: i64,
        descriptor: &MessageDescriptor,
        dest_path: &Path,
    ) -> Result<(), DomainError>;

    /// Forward a message natively, without re-uploading bytes.
    async fn forward_message(
        &self,
        source_chat_id: i64,
        message_id: i32,
        target_chat_id: i64,
    ) -> Result<i32, DomainError>;

    /// Upload a single local file as a new message, returning the remote message id.
    async fn send_single(&self, target_chat_id: i64, item: &UploadItem) -> Result<i32, DomainError>;

    /// Upload an album (2-10 items) as a single media group, returning remote message ids
    /// in the same order as `items`.
    async fn send_media_group(
        &self,
        target_chat_id: i64,
        items: &[UploadItem],
    ) -> Result<Vec<i32>, DomainError>;

    /// Server-side copy of an already-uploaded message into another chat
    /// (used for target 2..N after the first full upload).
    async fn copy_message(
        &self,
        source_chat_id: i64,
        message_id: i32,
        target_chat_id: i64,
    ) -> Result<i32, DomainError>;
}

/// History store: idempotence bookkeeping for forward/download/upload
/// operations. One JSON document per source channel, keyed by history kind.
#[async_trait::async_trait]
pub trait HistoryStorePort: Send + Sync {
    async fn is_forwarded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
        target: &CanonicalKey,
    ) -> Result<bool, DomainError>;

    async fn mark_forwarded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
        target: &CanonicalKey,
        remote_message_id: i32,
    ) -> Result<(), DomainError>;

    async fn is_downloaded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
    ) -> Result<bool, DomainError>;

    async fn mark_downloaded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
        file_path: &Path,
    ) -> Result<(), DomainError>;

    async fn is_uploaded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
        target: &CanonicalKey,
        file_path: &Path,
    ) -> Result<bool, DomainError>;

    async fn mark_uploaded(
        &self,
        source: &CanonicalKey,
        message_id: i32,
        target: &CanonicalKey,
        file_path: &Path,
        remote_message_ids: &[i32],
        file_size: u64,
    ) -> Result<(), DomainError>;

    /// Remove history entries older than `max_age_days`.
    async fn cleanup(&self, source: &CanonicalKey, max_age_days: u64) -> Result<(), DomainError>;

    /// Drop all recorded history for a source (used by the `--reset-history` flow).
    async fn clear_history(&self, source: &CanonicalKey) -> Result<(), DomainError>;
}

/// Metadata store: the JSONL side-file of [`MessageDescriptor`]s, used to
/// reassemble albums across process restarts without re-hitting the platform.
#[async_trait::async_trait]
pub trait MetadataStorePort: Send + Sync {
    async fn append(
        &self,
        source: &CanonicalKey,
        descriptor: &MessageDescriptor,
    ) -> Result<(), DomainError>;

    async fn load_pending(
        &self,
        source: &CanonicalKey,
    ) -> Result<Vec<MessageDescriptor>, DomainError>;

    async fn remove(
        &self,
        source: &CanonicalKey,
        message_ids: &[i32],
    ) -> Result<(), DomainError>;
}

/// Authentication port: login/2FA flow against the MTProto session.
#[async_trait::async_trait]
pub trait AuthPort: Send + Sync {
    async fn is_authenticated(&self) -> Result<bool, DomainError>;

    async fn request_login_code(&self, phone: &str) -> Result<(), DomainError>;

    async fn sign_in(&self, code: &str) -> Result<bool, DomainError>;

    async fn check_password(&self, password: &str) -> Result<(), DomainError>;
}

