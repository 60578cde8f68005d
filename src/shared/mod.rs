//! Cross-cutting concerns: configuration, rate limiting, maintenance jobs.

pub mod config;
pub mod maintenance;
pub mod rate_limiter;

pub use config::AppConfig;
pub use rate_limiter::RateLimiter;
