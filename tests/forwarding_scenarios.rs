//! End-to-end scenarios driving the Forwarding Engine against an in-memory
//! fake of the platform client and a temp-directory-backed History Store.
//! Scenarios 1 and 2 (forward-allowed happy path, idempotent re-run) live
//! next to the engine in `forwarding_engine.rs`; this suite covers the
//! remaining ones: restricted-source album upload, mid-run rate limiting,
//! an unresolvable target, and a zero-byte download retry.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tempfile::tempdir;

use tg_forward::adapters::persistence::{JsonHistoryStore, JsonlMetadataStore};
use tg_forward::domain::{
    CanonicalKey, CaptionEntity, DomainError, ForwardPair, ForwardRunConfig, MediaAttrs,
    MessageDescriptor, MessageKind, ParsedChannel, RawCapability, ResolvedChat, UploadItem,
};
use tg_forward::ports::{HistoryStorePort, TgGateway};
use tg_forward::usecases::media_uploader::CaptionPolicy;
use tg_forward::usecases::{
    CapabilityProber, ChannelResolver, ForwardingEngine, MediaDownloader, MediaUploader,
    MessageFetcher, PipelineController,
};

/// One gateway fake covering every scenario below. Each test configures the
/// fields it needs and leaves the rest at their defaults.
struct FakeGateway {
    forward_allowed: bool,
    resolvable: HashMap<String, i64>,
    deny: HashSet<String>,
    messages: Vec<MessageDescriptor>,
    send_media_group_result: Vec<i32>,
    /// message_id -> seconds; returned as RateLimit on first attempt only.
    rate_limited_ids: HashMap<i32, u64>,
    rate_limit_consumed: StdMutex<HashSet<i32>>,
    /// message_id -> writes a zero-byte file on first attempt only.
    zero_byte_ids: HashSet<i32>,
    zero_byte_consumed: StdMutex<HashSet<i32>>,
    download_calls: StdMutex<u32>,
    forward_calls: StdMutex<u32>,
    copy_calls: StdMutex<u32>,
    send_media_group_calls: StdMutex<Vec<usize>>,
    send_single_calls: StdMutex<u32>,
    next_remote_id: AtomicU32,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            forward_allowed: true,
            resolvable: HashMap::new(),
            deny: HashSet::new(),
            messages: Vec::new(),
            send_media_group_result: Vec::new(),
            rate_limited_ids: HashMap::new(),
            rate_limit_consumed: StdMutex::new(HashSet::new()),
            zero_byte_ids: HashSet::new(),
            zero_byte_consumed: StdMutex::new(HashSet::new()),
            download_calls: StdMutex::new(0),
            forward_calls: StdMutex::new(0),
            copy_calls: StdMutex::new(0),
            send_media_group_calls: StdMutex::new(Vec::new()),
            send_single_calls: StdMutex::new(0),
            next_remote_id: AtomicU32::new(1000),
        }
    }
}

#[async_trait]
impl TgGateway for FakeGateway {
    async fn resolve_chat(&self, parsed: &ParsedChannel) -> Result<ResolvedChat, DomainError> {
        match &parsed.key {
            CanonicalKey::Id(id) => Ok(ResolvedChat {
                numeric_id: *id,
                display: id.to_string(),
            }),
            CanonicalKey::Name(name) => {
                if self.deny.contains(name) {
                    return Err(DomainError::TgGateway(format!("no such channel: {name}")));
                }
                let numeric_id = *self
                    .resolvable
                    .get(name)
                    .unwrap_or(&(-(name.len() as i64)));
                Ok(ResolvedChat {
                    numeric_id,
                    display: format!("@{name}"),
                })
            }
        }
    }

    async fn join_if_needed(&self, _parsed: &ParsedChannel) -> Result<(), DomainError> {
        Ok(())
    }

    async fn probe_capability(&self, _chat_id: i64) -> Result<RawCapability, DomainError> {
        Ok(RawCapability {
            readable: true,
            writable: true,
            forward_allowed: self.forward_allowed,
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
        descriptor: &MessageDescriptor,
        dest_path: &Path,
    ) -> Result<(), DomainError> {
        *self.download_calls.lock().unwrap() += 1;
        let msg_id = descriptor.message_id;

        if let Some(seconds) = self.rate_limited_ids.get(&msg_id) {
            let mut consumed = self.rate_limit_consumed.lock().unwrap();
            if consumed.insert(msg_id) {
                return Err(DomainError::RateLimit { seconds: *seconds });
            }
        }

        if self.zero_byte_ids.contains(&msg_id) {
            let mut consumed = self.zero_byte_consumed.lock().unwrap();
            if consumed.insert(msg_id) {
                tokio::fs::write(dest_path, b"").await.unwrap();
                return Ok(());
            }
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
        *self.forward_calls.lock().unwrap() += 1;
        Ok(self.next_remote_id.fetch_add(1, Ordering::SeqCst) as i32)
    }

    async fn send_single(&self, _target_chat_id: i64, _item: &UploadItem) -> Result<i32, DomainError> {
        *self.send_single_calls.lock().unwrap() += 1;
        Ok(self.next_remote_id.fetch_add(1, Ordering::SeqCst) as i32)
    }

    async fn send_media_group(
        &self,
        _target_chat_id: i64,
        items: &[UploadItem],
    ) -> Result<Vec<i32>, DomainError> {
        self.send_media_group_calls.lock().unwrap().push(items.len());
        Ok(self.send_media_group_result.clone())
    }

    async fn copy_message(
        &self,
        _source_chat_id: i64,
        _message_id: i32,
        _target_chat_id: i64,
    ) -> Result<i32, DomainError> {
        *self.copy_calls.lock().unwrap() += 1;
        Ok(self.next_remote_id.fetch_add(1, Ordering::SeqCst) as i32)
    }
}

fn descriptor(id: i32, kind: MessageKind, album_key: Option<i64>) -> MessageDescriptor {
    MessageDescriptor {
        source: CanonicalKey::Id(1),
        message_id: id,
        kind,
        album_key,
        caption: String::new(),
        caption_entities: Vec::<CaptionEntity>::new(),
        date: 0,
        attrs: MediaAttrs::default(),
    }
}

/// Wires fetcher/downloader/uploader/pipeline/resolver/prober/engine around
/// one shared gateway and a temp-directory-backed history store.
struct Harness {
    engine: ForwardingEngine,
    history: Arc<dyn HistoryStorePort>,
    downloader: Arc<MediaDownloader>,
    _download_dir: tempfile::TempDir,
    _storage_dir: tempfile::TempDir,
}

fn build_harness(gateway: Arc<dyn TgGateway>) -> Harness {
    let storage_dir = tempdir().unwrap();
    let download_dir = tempdir().unwrap();

    let history: Arc<dyn HistoryStorePort> =
        Arc::new(JsonHistoryStore::new(storage_dir.path().to_path_buf()));
    let metadata = Arc::new(JsonlMetadataStore::new(storage_dir.path().join("metadata")));

    let resolver = Arc::new(ChannelResolver::new(gateway.clone()));
    let prober = Arc::new(CapabilityProber::new(gateway.clone()));

    let fetcher = Arc::new(MessageFetcher::new(gateway.clone()));
    let downloader = Arc::new(MediaDownloader::new(
        gateway.clone(),
        history.clone(),
        metadata,
        download_dir.path().to_path_buf(),
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

    let engine = ForwardingEngine::new(gateway, history.clone(), resolver, prober, pipeline, 3);

    Harness {
        engine,
        history,
        downloader,
        _download_dir: download_dir,
        _storage_dir: storage_dir,
    }
}

fn base_config(source: &str, targets: &[&str], start_id: i32, end_id: i32) -> ForwardRunConfig {
    ForwardRunConfig {
        forward_channel_pairs: vec![ForwardPair {
            source_channel: source.to_string(),
            target_channels: targets.iter().map(|s| s.to_string()).collect(),
        }],
        start_id,
        end_id,
        limit: 10,
        media_types: vec![],
        remove_captions: false,
        forward_delay_ms: 0,
        max_retries: 3,
        caption_template: None,
        include_attribution: false,
    }
}

/// Scenario 3: forward-restricted source, album of 3 photos, 2 targets.
#[tokio::test]
async fn restricted_source_album_downloads_then_uploads_to_both_targets() {
    let mut resolvable = HashMap::new();
    resolvable.insert("src".to_string(), 1);
    resolvable.insert("t0".to_string(), 101);
    resolvable.insert("t1".to_string(), 102);

    let gateway = Arc::new(FakeGateway {
        forward_allowed: false,
        resolvable,
        messages: vec![
            descriptor(10, MessageKind::Photo, Some(999)),
            descriptor(11, MessageKind::Photo, Some(999)),
            descriptor(12, MessageKind::Photo, Some(999)),
        ],
        send_media_group_result: vec![501, 502, 503],
        ..Default::default()
    });

    let harness = build_harness(gateway.clone());
    let config = base_config("@src", &["@t0", "@t1"], 12, 9);

    let stats = harness.engine.run(&config).await.unwrap();

    assert_eq!(*gateway.download_calls.lock().unwrap(), 3);
    assert_eq!(
        gateway.send_media_group_calls.lock().unwrap().as_slice(),
        &[3]
    );
    // No native group-copy primitive exists; the second target is delivered
    // via one copy_message per album member.
    assert_eq!(*gateway.copy_calls.lock().unwrap(), 3);
    assert_eq!(stats.total, 1);
    assert_eq!(stats.success, 1);
    assert_eq!(stats.failed, 0);

    for msg_id in [10, 11, 12] {
        let path = harness
            .downloader
            .artifact_path(1, &descriptor(msg_id, MessageKind::Photo, Some(999)));
        assert!(harness
            .history
            .is_downloaded(&CanonicalKey::Id(1), msg_id)
            .await
            .unwrap());
        assert!(harness
            .history
            .is_uploaded(&CanonicalKey::Id(1), msg_id, &CanonicalKey::Id(101), &path)
            .await
            .unwrap());
        assert!(harness
            .history
            .is_uploaded(&CanonicalKey::Id(1), msg_id, &CanonicalKey::Id(102), &path)
            .await
            .unwrap());
    }
}

/// Scenario 4: rate-limit mid-run. The third download returns retry-after=7;
/// the downloader sleeps and retries the same message without burning a
/// retry attempt, and the final success count is unaffected.
#[tokio::test]
async fn rate_limited_download_retries_same_message_without_consuming_attempt() {
    let mut resolvable = HashMap::new();
    resolvable.insert("src".to_string(), 1);
    resolvable.insert("t0".to_string(), 101);

    let mut rate_limited_ids = HashMap::new();
    rate_limited_ids.insert(3, 7);

    let gateway = Arc::new(FakeGateway {
        forward_allowed: false,
        resolvable,
        messages: vec![
            descriptor(1, MessageKind::Photo, None),
            descriptor(2, MessageKind::Photo, None),
            descriptor(3, MessageKind::Photo, None),
        ],
        rate_limited_ids,
        ..Default::default()
    });

    let harness = build_harness(gateway.clone());
    let config = base_config("@src", &["@t0"], 3, 0);

    let stats = harness.engine.run(&config).await.unwrap();

    // 3 messages, one retried once after a rate-limit signal.
    assert_eq!(*gateway.download_calls.lock().unwrap(), 4);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.success, 3);
    assert_eq!(stats.failed, 0);

    for msg_id in [1, 2, 3] {
        assert!(harness
            .history
            .is_downloaded(&CanonicalKey::Id(1), msg_id)
            .await
            .unwrap());
    }
}

/// Scenario 5: one invalid target among three. The resolver drops it before
/// delivery starts (visible via a tracing warning, not via RunStats), and
/// the run proceeds normally against the two valid targets.
#[tokio::test]
async fn invalid_target_is_dropped_delivery_continues_to_valid_targets() {
    let mut resolvable = HashMap::new();
    resolvable.insert("src".to_string(), 1);
    resolvable.insert("valid1".to_string(), 201);
    resolvable.insert("valid2".to_string(), 202);
    let mut deny = HashSet::new();
    deny.insert("nonexistent".to_string());

    let gateway = Arc::new(FakeGateway {
        forward_allowed: true,
        resolvable,
        deny,
        messages: vec![
            descriptor(100, MessageKind::Text, None),
            descriptor(99, MessageKind::Text, None),
            descriptor(98, MessageKind::Text, None),
        ],
        ..Default::default()
    });

    let harness = build_harness(gateway.clone());
    let config = base_config("@src", &["@valid1", "@nonexistent", "@valid2"], 100, 97);

    let stats = harness.engine.run(&config).await.unwrap();

    assert_eq!(stats.total, 3);
    assert_eq!(stats.success, 3);
    assert_eq!(stats.failed, 0);
    // 3 messages x 2 surviving targets.
    assert_eq!(*gateway.forward_calls.lock().unwrap(), 6);

    for msg_id in [100, 99, 98] {
        assert!(harness
            .history
            .is_forwarded(&CanonicalKey::Id(1), msg_id, &CanonicalKey::Id(201))
            .await
            .unwrap());
        assert!(harness
            .history
            .is_forwarded(&CanonicalKey::Id(1), msg_id, &CanonicalKey::Id(202))
            .await
            .unwrap());
    }
}

/// Scenario 6: a zero-byte download is discarded and retried; the retry
/// succeeds and the history records the message exactly once, with no
/// upload-history pollution from the failed first attempt.
#[tokio::test]
async fn zero_byte_download_is_discarded_and_retried_end_to_end() {
    let mut resolvable = HashMap::new();
    resolvable.insert("src".to_string(), 1);
    resolvable.insert("t0".to_string(), 101);

    let mut zero_byte_ids = HashSet::new();
    zero_byte_ids.insert(7);

    let gateway = Arc::new(FakeGateway {
        forward_allowed: false,
        resolvable,
        messages: vec![descriptor(7, MessageKind::Photo, None)],
        zero_byte_ids,
        ..Default::default()
    });

    let harness = build_harness(gateway.clone());
    let config = base_config("@src", &["@t0"], 7, 6);

    let stats = harness.engine.run(&config).await.unwrap();

    assert_eq!(*gateway.download_calls.lock().unwrap(), 2);
    assert_eq!(stats.total, 1);
    assert_eq!(stats.success, 1);
    assert_eq!(stats.failed, 0);

    let path = harness
        .downloader
        .artifact_path(1, &descriptor(7, MessageKind::Photo, None));

    assert!(harness
        .history
        .is_downloaded(&CanonicalKey::Id(1), 7)
        .await
        .unwrap());
    assert!(harness
        .history
        .is_uploaded(&CanonicalKey::Id(1), 7, &CanonicalKey::Id(101), &path)
        .await
        .unwrap());
    assert_eq!(*gateway.send_single_calls.lock().unwrap(), 1);
}
