//! grammers-backed Telegram adapters: gateway, auth, session storage, and
//! the raw-type-to-domain mapper.

pub mod auth_adapter;
pub mod client;
pub mod mapper;
pub mod session;

pub use auth_adapter::GrammersAuthAdapter;
pub use client::GrammersTgGateway;
