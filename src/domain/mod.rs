//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;

pub use entities::{
    CanonicalKey, CaptionEntity, CapabilityRecord, ChannelRef, DeliveryMode, DownloadBatchResult,
    ForwardPair, ForwardRunConfig, LocalArtifact, MediaAttrs, MessageDescriptor, MessageKind,
    ParsedChannel, RawCapability, Reassembled, ResolvedChat, RunStats, UploadItem, UploadOutcome,
};
pub use errors::DomainError;
