//! Relay configuration loaded from environment variables.

use std::net::SocketAddr;

use parley_shared::constants::{DEFAULT_RELAY_PORT, TOPIC_CHAT, TOPIC_USER};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address for the HTTP/websocket listener.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Topics a connection joins when it names none itself.
    /// Env: `DEFAULT_TOPICS` (comma separated)
    /// Default: `chat,user`
    pub default_topics: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_RELAY_PORT).into(),
            default_topics: vec![TOPIC_CHAT.to_string(), TOPIC_USER.to_string()],
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(topics) = std::env::var("DEFAULT_TOPICS") {
            let parsed = parse_topics(&topics);
            if parsed.is_empty() {
                tracing::warn!(value = %topics, "Empty DEFAULT_TOPICS, using default");
            } else {
                config.default_topics = parsed;
            }
        }

        config
    }
}

/// Split a comma separated topic list, dropping blanks and repeats.
pub fn parse_topics(raw: &str) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for topic in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }
    topics
}
