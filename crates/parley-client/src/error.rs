use parley_net::NetError;
use parley_shared::{Message, ProtocolError};
use parley_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid message: {0}")]
    Invalid(#[from] ProtocolError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The message never reached the relay. It is handed back untouched so
    /// the caller can offer a retry.
    #[error("message {} was not sent: {source}", .message.id)]
    Send {
        message: Box<Message>,
        #[source]
        source: NetError,
    },

    #[error("connection manager error: {0}")]
    Net(#[from] NetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity file is corrupt: {0}")]
    Identity(#[from] serde_json::Error),

    #[error("sync engine has stopped")]
    EngineStopped,
}

impl SyncError {
    /// The unsent message, for send failures.
    pub fn unsent_message(&self) -> Option<&Message> {
        match self {
            Self::Send { message, .. } => Some(message.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
