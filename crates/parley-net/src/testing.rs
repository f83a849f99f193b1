//! In-memory connector for tests.
//!
//! Each accepted attempt yields a [`MockServer`] holding the far ends of the
//! channel queues, so a test can read what the client wrote and inject
//! frames of its own.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::channel::{ChannelFrame, ChannelIo, Connector};
use crate::error::NetError;

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Accept,
    /// Completes the handshake after the given delay.
    AcceptAfter(Duration),
    Refuse,
    /// Never completes; only the connect timeout ends it.
    Hang,
}

/// The relay side of one accepted channel.
#[derive(Debug)]
pub struct MockServer {
    /// Frames written by the client.
    pub outgoing: mpsc::Receiver<String>,
    /// Frames delivered to the client.
    pub incoming: mpsc::Sender<ChannelFrame>,
}

#[derive(Default)]
struct Shared {
    plans: VecDeque<Plan>,
    urls: Vec<String>,
    attempts: Vec<Instant>,
    servers_rx: Option<mpsc::UnboundedReceiver<MockServer>>,
}

/// Connector whose attempts follow a scripted list of [`Plan`]s, accepting
/// once the list is exhausted.
#[derive(Clone)]
pub struct MockConnector {
    shared: Arc<Mutex<Shared>>,
    servers_tx: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_plans(Vec::new())
    }

    pub fn with_plans(plans: Vec<Plan>) -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            plans: plans.into(),
            servers_rx: Some(servers_rx),
            ..Shared::default()
        };
        Self {
            shared: Arc::new(Mutex::new(shared)),
            servers_tx,
        }
    }

    /// Receiver of accepted channels. Can be taken once.
    pub fn servers(&self) -> mpsc::UnboundedReceiver<MockServer> {
        self.lock()
            .servers_rx
            .take()
            .expect("servers receiver already taken")
    }

    pub fn attempts(&self) -> usize {
        self.lock().attempts.len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> impl Future<Output = Result<ChannelIo, NetError>> + Send {
        let plan = {
            let mut shared = self.lock();
            shared.urls.push(url.to_string());
            shared.attempts.push(Instant::now());
            shared.plans.pop_front().unwrap_or(Plan::Accept)
        };
        let servers_tx = self.servers_tx.clone();

        async move {
            match plan {
                Plan::Accept | Plan::AcceptAfter(_) => {
                    if let Plan::AcceptAfter(delay) = plan {
                        tokio::time::sleep(delay).await;
                    }
                    let (out_tx, out_rx) = mpsc::channel(64);
                    let (in_tx, in_rx) = mpsc::channel(64);
                    let _ = servers_tx.send(MockServer {
                        outgoing: out_rx,
                        incoming: in_tx,
                    });
                    Ok(ChannelIo::new(out_tx, in_rx))
                }
                Plan::Refuse => Err(NetError::Connection("connection refused".into())),
                Plan::Hang => std::future::pending().await,
            }
        }
    }
}
