//! Application use cases. Orchestrate domain logic via ports.

pub mod album_reassembler;
pub mod capability_prober;
pub mod channel_resolver;
pub mod forwarding_engine;
pub mod media_downloader;
pub mod media_uploader;
pub mod message_fetcher;
pub mod pipeline_controller;

pub use capability_prober::CapabilityProber;
pub use channel_resolver::ChannelResolver;
pub use forwarding_engine::ForwardingEngine;
pub use media_downloader::MediaDownloader;
pub use media_uploader::MediaUploader;
pub use message_fetcher::MessageFetcher;
pub use pipeline_controller::PipelineController;
