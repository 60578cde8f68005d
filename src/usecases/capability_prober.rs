//! Capability Prober: determines read/write/forward permissions for a
//! resolved channel and caches the result with a TTL.

use crate::domain::{CapabilityRecord, ChannelRef, DomainError};
use crate::ports::TgGateway;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

pub struct CapabilityProber {
    gateway: std::sync::Arc<dyn TgGateway>,
    ttl: Duration,
    cache: Mutex<HashMap<i64, CapabilityRecord>>,
}

impl CapabilityProber {
    pub fn new(gateway: std::sync::Arc<dyn TgGateway>) -> Self {
        Self::with_ttl(gateway, DEFAULT_TTL)
    }

    pub fn with_ttl(gateway: std::sync::Arc<dyn TgGateway>, ttl: Duration) -> Self {
        Self {
            gateway,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn probe(&self, channel: &ChannelRef) -> Result<CapabilityRecord, DomainError> {
        let chat_id = channel
            .numeric_id
            .ok_or_else(|| DomainError::Parse("channel has no numeric id to probe".into()))?;

        if let Some(record) = self.cache.lock().unwrap().get(&chat_id) {
            if record.fetched_at.elapsed() < self.ttl {
                debug!(chat_id, "capability cache hit");
                return Ok(*record);
            }
        }

        let raw = self.gateway.probe_capability(chat_id).await?;
        let record = CapabilityRecord {
            readable: raw.readable,
            writable: raw.writable,
            forward_allowed: raw.forward_allowed,
            fetched_at: Instant::now(),
        };
        self.cache.lock().unwrap().insert(chat_id, record);
        Ok(record)
    }

    pub async fn probe_all(
        &self,
        channels: &[ChannelRef],
    ) -> Vec<(ChannelRef, CapabilityRecord)> {
        let mut out = Vec::with_capacity(channels.len());
        for channel in channels {
            match self.probe(channel).await {
                Ok(record) => out.push((channel.clone(), record)),
                Err(e) => {
                    tracing::warn!(channel = %channel.display, error = %e, "capability probe failed");
                }
            }
        }
        out
    }
}

/// Order targets by `forward_allowed` descending, stable on ties — prefers
/// unrestricted targets as the first delivery in fan-out.
pub fn sort_by_forward_allowed(mut targets: Vec<(ChannelRef, CapabilityRecord)>) -> Vec<(ChannelRef, CapabilityRecord)> {
    targets.sort_by_key(|(_, record)| std::cmp::Reverse(record.forward_allowed));
    targets
}
