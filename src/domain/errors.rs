//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these at the boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("channel identifier parse error: {0}")]
    Parse(String),

    #[error("Telegram gateway error: {0}")]
    TgGateway(String),

    #[error("history store error: {0}")]
    History(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("config error: {0}")]
    Config(String),

    /// FloodWait-style error: caller should reschedule the call after `seconds`
    /// seconds without consuming a retry attempt.
    #[error("rate limited: retry after {seconds} seconds")]
    RateLimit { seconds: u64 },

    #[error("fatal error: {0}")]
    Fatal(String),
}
