//! The physical channel behind the connection manager.
//!
//! A [`Connector`] opens one channel and hands back a pair of queues: text
//! frames to write, and [`ChannelFrame`]s read from the peer. Whatever drives
//! the socket lives in a background task that is aborted when the
//! [`ChannelIo`] is dropped.

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::NetError;

const CHANNEL_CAPACITY: usize = 256;

/// How long a sent close frame waits for the peer's reply.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Something read from an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFrame {
    Text(String),
    /// The peer closed the channel. `clean` is true for a normal closure.
    Closed { clean: bool },
    /// Transport failure; the channel is gone.
    Error(String),
}

/// Both halves of an open channel.
#[derive(Debug)]
pub struct ChannelIo {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<ChannelFrame>,
    pub driver: Option<DriverGuard>,
}

impl ChannelIo {
    pub fn new(outgoing: mpsc::Sender<String>, incoming: mpsc::Receiver<ChannelFrame>) -> Self {
        Self {
            outgoing,
            incoming,
            driver: None,
        }
    }

    /// Tie a background task to the lifetime of this channel.
    pub fn with_driver(mut self, task: JoinHandle<()>) -> Self {
        self.driver = Some(DriverGuard(task));
        self
    }
}

/// Aborts the task driving a channel when dropped.
#[derive(Debug)]
pub struct DriverGuard(JoinHandle<()>);

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Opens channels to a relay address.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<ChannelIo, NetError>> + Send;
}

/// Connector for `ws://` and `wss://` relays.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str) -> impl Future<Output = Result<ChannelIo, NetError>> + Send {
        let url = url.to_string();
        async move {
            let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| NetError::Connection(e.to_string()))?;

            debug!(url = %url, "websocket handshake complete");

            let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let driver = tokio::spawn(drive_websocket(stream, out_rx, in_tx, CLOSE_TIMEOUT));

            Ok(ChannelIo::new(out_tx, in_rx).with_driver(driver))
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pump frames between the socket and the channel queues.
///
/// When every outgoing sender is gone a normal close frame is sent and the
/// loop waits up to `close_timeout` for the peer's close reply. A peer that
/// never answers still counts as a clean close.
async fn drive_websocket(
    stream: WsStream,
    mut outgoing: mpsc::Receiver<String>,
    incoming: mpsc::Sender<ChannelFrame>,
    close_timeout: Duration,
) {
    let (mut sink, mut source) = stream.split();
    let mut closing = false;
    let close_wait = tokio::time::sleep(close_timeout);
    tokio::pin!(close_wait);

    loop {
        tokio::select! {
            _ = &mut close_wait, if closing => {
                debug!(timeout = ?close_timeout, "peer did not answer close");
                let _ = incoming.send(ChannelFrame::Closed { clean: true }).await;
                return;
            }

            payload = outgoing.recv(), if !closing => match payload {
                Some(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        warn!(error = %e, "websocket write failed");
                        let _ = incoming.send(ChannelFrame::Error(e.to_string())).await;
                        return;
                    }
                }
                None => {
                    closing = true;
                    close_wait.as_mut().reset(Instant::now() + close_timeout);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                        debug!(error = %e, "close frame not delivered");
                        let _ = incoming.send(ChannelFrame::Closed { clean: true }).await;
                        return;
                    }
                }
            },

            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if incoming.send(ChannelFrame::Text(text)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame.as_ref().map(|f| f.code);
                    let clean = closing || code == Some(CloseCode::Normal);
                    debug!(code = ?code, clean, "websocket closed by peer");
                    let _ = incoming.send(ChannelFrame::Closed { clean }).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = incoming.send(ChannelFrame::Error(e.to_string())).await;
                    return;
                }
                None => {
                    let _ = incoming.send(ChannelFrame::Closed { clean: closing }).await;
                    return;
                }
            },
        }
    }
}
