/// Maximum message text length, counted in UTF-16 code units
pub const MAX_TEXT_UNITS: usize = 1000;

/// Consecutive failed reconnect attempts before giving up
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Budget for a single connect attempt, in milliseconds
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 5000;

/// First reconnect delay, in milliseconds; doubled on every further failure
pub const BACKOFF_BASE_MS: u64 = 1000;

/// Upper bound on the reconnect delay, in milliseconds
pub const BACKOFF_CAP_MS: u64 = 10_000;

/// Relay topic carrying chat payloads
pub const TOPIC_CHAT: &str = "chat";

/// Relay topic carrying join/leave presence events
pub const TOPIC_USER: &str = "user";

/// Default relay HTTP port
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// Default channel id for messages authored by this client
pub const DEFAULT_CHANNEL: &str = "general";
