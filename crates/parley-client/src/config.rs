//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so `parley` starts against a local relay
//! with no configuration at all.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parley_net::{AddressResolver, ConnectionConfig};
use parley_shared::constants::{
    DEFAULT_CHANNEL, DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_MAX_RETRIES, DEFAULT_RELAY_PORT,
};
use parley_shared::WireFormat;

use crate::error::Result;

pub const ENV_RELAY_URL: &str = "PARLEY_RELAY_URL";
pub const ENV_MAX_RETRIES: &str = "PARLEY_MAX_RETRIES";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "PARLEY_CONNECT_TIMEOUT_MS";
pub const ENV_DATA_DIR: &str = "PARLEY_DATA_DIR";
pub const ENV_USERNAME: &str = "PARLEY_USERNAME";
pub const ENV_CHANNEL: &str = "PARLEY_CHANNEL";
pub const ENV_WIRE_FORMAT: &str = "PARLEY_WIRE_FORMAT";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay websocket endpoint.
    /// Env: `PARLEY_RELAY_URL`
    /// Default: `ws://127.0.0.1:8080/ws`
    pub relay_url: String,

    /// Consecutive failed connects tolerated before giving up.
    /// Env: `PARLEY_MAX_RETRIES`
    /// Default: `5`
    pub max_retries: u32,

    /// Env: `PARLEY_CONNECT_TIMEOUT_MS`
    /// Default: `5000`
    pub connect_timeout: Duration,

    /// Directory for the message cache and identity file.
    /// Env: `PARLEY_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Env: `PARLEY_USERNAME`
    /// Default: `anonymous`
    pub username: String,

    /// Channel new messages are posted to.
    /// Env: `PARLEY_CHANNEL`
    /// Default: `general`
    pub channel: String,

    /// Env: `PARLEY_WIRE_FORMAT` (`legacy` or `tagged`)
    /// Default: `legacy`
    pub wire_format: WireFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: format!("ws://127.0.0.1:{DEFAULT_RELAY_PORT}/ws"),
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS),
            data_dir: None,
            username: "anonymous".to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            wire_format: WireFormat::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_RELAY_URL).filter(|v| !v.is_empty()) {
            config.relay_url = url;
        }

        if let Some(val) = lookup(ENV_MAX_RETRIES) {
            match val.parse::<u32>() {
                Ok(n) => config.max_retries = n,
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid {ENV_MAX_RETRIES}, using default");
                }
            }
        }

        if let Some(val) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.connect_timeout = Duration::from_millis(ms),
                _ => {
                    tracing::warn!(value = %val, "Invalid {ENV_CONNECT_TIMEOUT_MS}, using default");
                }
            }
        }

        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(name) = lookup(ENV_USERNAME).filter(|v| !v.trim().is_empty()) {
            config.username = name.trim().to_string();
        }

        if let Some(channel) = lookup(ENV_CHANNEL).filter(|v| !v.is_empty()) {
            config.channel = channel;
        }

        if let Some(val) = lookup(ENV_WIRE_FORMAT) {
            match val.parse::<WireFormat>() {
                Ok(format) => config.wire_format = format,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid {ENV_WIRE_FORMAT}, using default");
                }
            }
        }

        config
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_retries: self.max_retries,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Resolver that re-reads `PARLEY_RELAY_URL` on every connect attempt,
    /// falling back to the configured URL.
    pub fn address_resolver(&self) -> AddressResolver {
        let fallback = self.relay_url.clone();
        Arc::new(move || {
            std::env::var(ENV_RELAY_URL)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.clone())
        })
    }

    /// The configured data directory, or the platform default.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(parley_store::database::default_data_dir()?),
        }
    }
}
