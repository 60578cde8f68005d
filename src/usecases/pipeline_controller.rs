//! Pipeline Controller: wires Fetcher -> Downloader -> Reassembler -> Uploader
//! with two bounded queues and a shared downloads-complete signal.

use crate::domain::{ChannelRef, LocalArtifact, MessageDescriptor, RunStats};
use crate::usecases::album_reassembler;
use crate::usecases::media_downloader::MediaDownloader;
use crate::usecases::media_uploader::MediaUploader;
use crate::usecases::message_fetcher::{Batch, MessageFetcher};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const Q1_CAPACITY: usize = 4;
pub const Q2_CAPACITY: usize = 8;
pub const DEFAULT_UPLOAD_WORKERS: usize = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Minimal unit of upload work: one single message or one whole album.
enum UploadUnit {
    Single(Box<(LocalArtifact, MessageDescriptor)>),
    Album(Vec<(LocalArtifact, MessageDescriptor)>),
}

impl UploadUnit {
    fn dedup_key(&self) -> i32 {
        match self {
            UploadUnit::Single(boxed) => boxed.1.message_id,
            UploadUnit::Album(members) => members.first().map(|(_, d)| d.message_id).unwrap_or(0),
        }
    }
}

pub struct PipelineController {
    fetcher: Arc<MessageFetcher>,
    downloader: Arc<MediaDownloader>,
    uploader: Arc<MediaUploader>,
    upload_workers: usize,
    timeout: Duration,
}

impl PipelineController {
    pub fn new(
        fetcher: Arc<MessageFetcher>,
        downloader: Arc<MediaDownloader>,
        uploader: Arc<MediaUploader>,
    ) -> Self {
        Self {
            fetcher,
            downloader,
            uploader,
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_upload_workers(mut self, workers: usize) -> Self {
        self.upload_workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(
        &self,
        source_chat_id: i64,
        start_id: i32,
        end_id: i32,
        limit: i32,
        targets: Vec<ChannelRef>,
    ) -> RunStats {
        match tokio::time::timeout(
            self.timeout,
            self.run_inner(source_chat_id, start_id, end_id, limit, targets),
        )
        .await
        {
            Ok(stats) => stats,
            Err(_) => {
                warn!(source_chat_id, "pipeline run exceeded timeout ceiling, reporting partial success");
                RunStats::default()
            }
        }
    }

    async fn run_inner(
        &self,
        source_chat_id: i64,
        start_id: i32,
        end_id: i32,
        limit: i32,
        targets: Vec<ChannelRef>,
    ) -> RunStats {
        let (tx1, mut rx1) = mpsc::channel::<Batch>(Q1_CAPACITY);
        let (tx2, rx2) = mpsc::channel::<UploadUnit>(Q2_CAPACITY);

        let fetcher = self.fetcher.clone();
        let fetch_task = tokio::spawn(async move {
            if let Err(e) = fetcher.stream(source_chat_id, start_id, end_id, limit, tx1).await {
                warn!(error = %e, "fetcher task ended with error");
            }
        });

        let downloader = self.downloader.clone();
        let downloads_complete = Arc::new(AtomicBool::new(false));
        let downloads_complete_writer = downloads_complete.clone();
        let download_task = tokio::spawn(async move {
            while let Some(batch) = rx1.recv().await {
                for single in batch.singles {
                    let msg_id = single.message_id;
                    match downloader.download_one(source_chat_id, single.clone()).await {
                        Ok(Some(artifact)) => {
                            if tx2
                                .send(UploadUnit::Single(Box::new((artifact, single))))
                                .await
                                .is_err()
                            {
                                warn!(msg_id, "upload queue closed, stopping downloader");
                                break;
                            }
                        }
                        Ok(None) => info!(msg_id, "already downloaded, skipping"),
                        Err(e) => warn!(msg_id, error = %e, "download failed"),
                    }
                }

                let mut members = Vec::new();
                for album in batch.albums {
                    for descriptor in album {
                        let msg_id = descriptor.message_id;
                        match downloader.download_one(source_chat_id, descriptor.clone()).await {
                            Ok(Some(artifact)) => members.push((artifact, descriptor)),
                            Ok(None) => info!(msg_id, "album member already downloaded"),
                            Err(e) => warn!(msg_id, error = %e, "album member download failed"),
                        }
                    }
                    if !members.is_empty() {
                        let reassembled = album_reassembler::assemble(std::mem::take(&mut members));
                        for single in reassembled.singles {
                            if tx2.send(UploadUnit::Single(Box::new(single))).await.is_err() {
                                warn!("upload queue closed, stopping downloader");
                                break;
                            }
                        }
                        for album in reassembled.albums {
                            if tx2.send(UploadUnit::Album(album)).await.is_err() {
                                warn!("upload queue closed, stopping downloader");
                                break;
                            }
                        }
                    }
                }
            }
            downloads_complete_writer.store(true, Ordering::SeqCst);
        });

        let rx2 = Arc::new(tokio::sync::Mutex::new(rx2));
        let processed: Arc<Mutex<HashSet<i32>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut upload_handles = Vec::with_capacity(self.upload_workers);

        for worker_id in 0..self.upload_workers {
            let rx2 = rx2.clone();
            let processed = processed.clone();
            let uploader = self.uploader.clone();
            let targets = targets.clone();
            let downloads_complete = downloads_complete.clone();

            upload_handles.push(tokio::spawn(async move {
                let mut stats = RunStats::default();
                loop {
                    let unit = {
                        let mut guard = rx2.lock().await;
                        guard.recv().await
                    };
                    let Some(unit) = unit else {
                        // Queue is drained and every sender has been dropped, which
                        // only happens once the download task has run to completion.
                        // The done-flag is the explicit record of that fact; a closed,
                        // empty queue with the flag unset would mean a sender panicked
                        // mid-run rather than finishing normally.
                        if !downloads_complete.load(Ordering::SeqCst) {
                            warn!(worker_id, "upload queue closed before downloads completed");
                        }
                        break;
                    };

                    let key = unit.dedup_key();
                    if !processed.lock().unwrap().insert(key) {
                        continue;
                    }

                    stats.total += 1;
                    match unit {
                        UploadUnit::Single(boxed) => {
                            let (artifact, descriptor) = *boxed;
                            let outcomes = uploader
                                .upload_single(source_chat_id, &artifact, &descriptor, &targets)
                                .await;
                            record_outcome(&mut stats, &outcomes.iter().map(|o| o.succeeded).collect::<Vec<_>>());
                        }
                        UploadUnit::Album(members) => {
                            let per_member = uploader
                                .upload_album(source_chat_id, &members, &targets)
                                .await;
                            let all_ok = per_member
                                .iter()
                                .flatten()
                                .all(|o| o.succeeded);
                            if all_ok {
                                stats.success += 1;
                            } else {
                                stats.failed += 1;
                            }
                        }
                    }
                }
                debug_worker(worker_id);
                stats
            }));
        }

        let _ = fetch_task.await;
        let _ = download_task.await;

        let mut total_stats = RunStats::default();
        for handle in upload_handles {
            if let Ok(stats) = handle.await {
                total_stats.merge(stats);
            }
        }
        total_stats
    }
}

fn record_outcome(stats: &mut RunStats, successes: &[bool]) {
    if successes.is_empty() || successes.iter().all(|s| *s) {
        stats.success += 1;
    } else {
        stats.failed += 1;
    }
}

fn debug_worker(worker_id: usize) {
    tracing::debug!(worker_id, "upload worker drained");
}
