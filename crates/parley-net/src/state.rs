use std::fmt;

/// Lifecycle of the relay channel.
///
/// `Idle -> Connecting -> Open -> Closing -> Idle`, with `Reconnecting`
/// entered from any unclean closure while a retry is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable snapshot of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl ConnectionStatus {
    pub fn idle(max_retries: u32) -> Self {
        Self {
            state: ConnectionState::Idle,
            retry_count: 0,
            max_retries,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }
}
