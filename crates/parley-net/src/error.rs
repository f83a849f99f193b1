use std::time::Duration;

use thiserror::Error;

use crate::state::ConnectionState;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("channel is not open (state: {0})")]
    NotOpen(ConnectionState),

    #[error("channel closed before the payload was written")]
    ChannelClosed,

    #[error("connection manager has stopped")]
    ManagerStopped,
}

pub type Result<T> = std::result::Result<T, NetError>;
