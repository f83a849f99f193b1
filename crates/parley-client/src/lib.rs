//! # parley-client
//!
//! Client side of Parley: the sync engine that reconciles relay traffic
//! with the local message cache, plus the configuration and identity it
//! starts from.

pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod runtime;

pub use config::ClientConfig;
pub use engine::{InboundOutcome, SyncEngine};
pub use error::{Result, SyncError};
pub use identity::LocalIdentity;
pub use runtime::{spawn_engine, start, start_with, SyncCommand, SyncHandle, SyncSnapshot};
