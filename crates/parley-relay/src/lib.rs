//! # parley-relay
//!
//! Stateless websocket fan-out between topic subscribers. Chat payloads are
//! forwarded verbatim to every other connection; joins and leaves are
//! announced on the `user` topic. Nothing is stored or validated.

pub mod config;
pub mod error;
pub mod hub;
pub mod server;

pub use config::RelayConfig;
pub use error::RelayError;
pub use hub::Hub;
pub use server::{router, serve, serve_with};
