//! Maintenance jobs. Age-based cleanup, invoked explicitly from the binary's
//! periodic-maintenance loop — never run implicitly inside the hot path.

use crate::domain::{CanonicalKey, DomainError};
use crate::ports::HistoryStorePort;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

pub const DEFAULT_TEMP_MAX_AGE_HOURS: u64 = 24;
pub const DEFAULT_HISTORY_MAX_AGE_DAYS: u64 = 30;

/// Remove files under `dir` whose modification time is older than `max_age`.
/// Returns the number of files removed.
pub async fn cleanup_temp_artifacts(dir: &Path, max_age: Duration) -> Result<u64, DomainError> {
    let mut removed = 0u64;
    let now = SystemTime::now();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(DomainError::Media(format!("reading temp dir: {e}"))),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DomainError::Media(format!("iterating temp dir: {e}")))?
    {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                warn!(?path, error = %e, "skipping unreadable temp entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age >= max_age {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    info!(?path, "removed stale temp artifact");
                }
                Err(e) => warn!(?path, error = %e, "failed to remove stale temp artifact"),
            }
        }
    }

    Ok(removed)
}

/// Drop history entries older than `max_age_days` for every given source.
pub async fn cleanup_history(
    history: &dyn HistoryStorePort,
    sources: &[CanonicalKey],
    max_age_days: u64,
) -> Result<(), DomainError> {
    for source in sources {
        history.cleanup(source, max_age_days).await?;
        info!(source = %source, max_age_days, "history cleanup pass complete");
    }
    Ok(())
}
