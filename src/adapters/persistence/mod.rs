//! Filesystem-backed persistence adapters: JSON history documents and the
//! JSONL metadata side-file.

pub mod json_history;
pub mod metadata_store;

pub use json_history::JsonHistoryStore;
pub use metadata_store::JsonlMetadataStore;
