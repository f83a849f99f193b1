// Relay channel management: one websocket at a time, reconnect with
// capped exponential backoff.

pub mod backoff;
pub mod channel;
pub mod connection;
pub mod error;
pub mod state;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backoff::backoff_delay;
pub use channel::{ChannelFrame, ChannelIo, Connector, WebSocketConnector};
pub use connection::{
    spawn_connection, AddressResolver, ConnectionConfig, ConnectionHandle,
    ConnectionNotification,
};
pub use error::{NetError, Result};
pub use state::{ConnectionState, ConnectionStatus};
