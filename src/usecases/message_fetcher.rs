//! Message Fetcher: pulls messages from a source by ID range in bounded
//! batches, groups messages sharing an album key, and streams batches
//! downstream through a bounded channel.

use crate::domain::{DomainError, MessageDescriptor};
use crate::ports::TgGateway;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: i32 = 50;

/// One fetched unit of work: single messages plus fully-resolved albums.
#[derive(Debug, Default)]
pub struct Batch {
    pub singles: Vec<MessageDescriptor>,
    pub albums: Vec<Vec<MessageDescriptor>>,
}

pub struct MessageFetcher {
    gateway: Arc<dyn TgGateway>,
    batch_size: i32,
}

impl MessageFetcher {
    pub fn new(gateway: Arc<dyn TgGateway>) -> Self {
        Self {
            gateway,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(gateway: Arc<dyn TgGateway>, batch_size: i32) -> Self {
        Self {
            gateway,
            batch_size,
        }
    }

    /// Stream messages from `chat_id` in `(end_id, start_id]`, newest to
    /// oldest, honoring `limit` (0 = zero delivery attempts), sending
    /// batches to `tx`.
    pub async fn stream(
        &self,
        chat_id: i64,
        start_id: i32,
        end_id: i32,
        limit: i32,
        tx: Sender<Batch>,
    ) -> Result<(), DomainError> {
        if limit == 0 {
            return Ok(());
        }

        let mut seen: HashSet<i32> = HashSet::new();
        let mut cursor = start_id;
        let mut emitted = 0i32;

        loop {
            if cursor <= end_id {
                break;
            }
            if limit > 0 && emitted >= limit {
                break;
            }

            let window_limit = if limit > 0 {
                self.batch_size.min(limit - emitted)
            } else {
                self.batch_size
            };

            let descriptors = match self
                .gateway
                .list_messages(chat_id, end_id, cursor, window_limit)
                .await
            {
                Ok(d) => d,
                Err(DomainError::RateLimit { seconds }) => {
                    debug!(chat_id, wait_secs = seconds, "fetcher rate limited, retrying same window");
                    tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if descriptors.is_empty() {
                break;
            }

            let min_id = descriptors.iter().map(|d| d.message_id).min().unwrap();
            let max_id = descriptors.iter().map(|d| d.message_id).max().unwrap();

            let fresh: Vec<MessageDescriptor> = descriptors
                .into_iter()
                .filter(|d| seen.insert(d.message_id))
                .collect();

            let batch = self.group_batch(chat_id, fresh, min_id, max_id).await?;
            emitted += (batch.singles.len() + batch.albums.iter().map(|a| a.len()).sum::<usize>())
                as i32;

            info!(
                chat_id,
                singles = batch.singles.len(),
                albums = batch.albums.len(),
                "fetched batch"
            );

            if tx.send(batch).await.is_err() {
                warn!(chat_id, "fetcher downstream closed, stopping early");
                break;
            }

            // min_id is inclusive of the bottom of this window; the next
            // query's end_id is also inclusive, so the cursor must drop
            // one below it or the same message gets re-fetched forever.
            cursor = min_id - 1;
        }

        Ok(())
    }

    /// Group a fetched window into singles and albums. When an album member
    /// sits at the batch boundary, confirm the full group via a follow-up
    /// `get_media_group` call before emitting.
    async fn group_batch(
        &self,
        chat_id: i64,
        descriptors: Vec<MessageDescriptor>,
        min_id: i32,
        max_id: i32,
    ) -> Result<Batch, DomainError> {
        let mut by_album: HashMap<i64, Vec<MessageDescriptor>> = HashMap::new();
        let mut singles = Vec::new();

        for d in descriptors {
            match d.album_key {
                Some(key) => by_album.entry(key).or_default().push(d),
                None => singles.push(d),
            }
        }

        let mut albums = Vec::with_capacity(by_album.len());
        for (_, mut members) in by_album {
            if members.len() == 1 {
                let only = &members[0];
                let straddles = only.message_id == min_id || only.message_id == max_id;
                if straddles {
                    let confirmed = self
                        .gateway
                        .get_media_group(chat_id, only.message_id)
                        .await?;
                    if confirmed.len() > 1 {
                        let mut confirmed = confirmed;
                        confirmed.sort_by_key(|d| d.message_id);
                        albums.push(confirmed);
                        continue;
                    }
                }
                // Genuinely a single-member group: treated as a single, not an album call.
                singles.push(members.remove(0));
            } else {
                members.sort_by_key(|d| d.message_id);
                albums.push(members);
            }
        }

        Ok(Batch { singles, albums })
    }
}
