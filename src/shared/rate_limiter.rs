//! Rate-limit adapter. Wraps every platform call with a uniform retry policy.
//!
//! Three signal classes, handled independently:
//! - rate-limit (`DomainError::RateLimit`): sleep the signaled duration and
//!   retry without consuming an attempt, unless it exceeds the 300s ceiling.
//! - transient (`DomainError::TgGateway`): exponential back-off `2^attempt`,
//!   capped at `max_retries`.
//! - auth-invalid (`DomainError::Auth`): a single reconnect attempt, then fatal.

use crate::domain::DomainError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Calls beyond this wait are not worth sleeping for; the item fails instead.
pub const RATE_LIMIT_CEILING_SECS: u64 = 300;

pub struct RateLimiter {
    max_retries: u32,
}

impl RateLimiter {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Run `op`, retrying per the policy above. `reconnect` is invoked at
    /// most once, the first time an auth-invalid error is observed.
    pub async fn with_retry<T, F, Fut, R, RFut>(
        &self,
        mut op: F,
        mut reconnect: R,
    ) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
        R: FnMut() -> RFut,
        RFut: Future<Output = Result<(), DomainError>>,
    {
        let mut attempt: u32 = 0;
        let reconnected = AtomicBool::new(false);

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(DomainError::RateLimit { seconds }) => {
                    if seconds > RATE_LIMIT_CEILING_SECS {
                        warn!(wait_secs = seconds, "rate limit exceeds ceiling, failing item");
                        return Err(DomainError::RateLimit { seconds });
                    }
                    debug!(wait_secs = seconds, "rate limited, sleeping");
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                    continue;
                }
                Err(DomainError::Auth(msg)) => {
                    if reconnected.swap(true, Ordering::SeqCst) {
                        return Err(DomainError::Fatal(format!(
                            "authorization invalid after reconnect: {msg}"
                        )));
                    }
                    warn!("authorization invalid, attempting one-shot reconnect");
                    reconnect().await?;
                    continue;
                }
                Err(DomainError::TgGateway(msg)) => {
                    if attempt >= self.max_retries {
                        return Err(DomainError::TgGateway(msg));
                    }
                    let backoff = 2u64.saturating_pow(attempt);
                    warn!(attempt, wait_secs = backoff, %msg, "transient error, backing off");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    attempt += 1;
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
    }
}
