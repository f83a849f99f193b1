//! Connection manager actor.
//!
//! The manager owns the relay channel and runs in a dedicated tokio task.
//! Collaborators talk to it through a cloneable [`ConnectionHandle`] and
//! receive [`ConnectionNotification`]s on an unbounded queue; the current
//! [`ConnectionStatus`] is also published on a `watch` channel.
//!
//! Every channel attempt gets a fresh generation number. Events and retry
//! timers carry the generation they were created for and are dropped once
//! a newer attempt exists.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_shared::constants::{DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_MAX_RETRIES};

use crate::backoff::backoff_delay;
use crate::channel::{ChannelFrame, ChannelIo, Connector};
use crate::error::{NetError, Result};
use crate::state::{ConnectionState, ConnectionStatus};

/// Produces the relay address. Called on every attempt, so a changed
/// setting takes effect on the next connect.
pub type AddressResolver = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_retries: u32,
    /// Upper bound for a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS),
        }
    }
}

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ConnectionCommand {
    Connect,
    Send {
        payload: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
    Shutdown,
}

/// Notifications sent *from* the manager task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotification {
    /// State or retry counter changed.
    StateChanged(ConnectionStatus),
    /// A text frame arrived on the live channel.
    Payload(String),
    /// Retries are exhausted; nothing happens until a manual connect.
    Disconnected,
}

/// Events produced by per-attempt tasks, tagged with their generation.
#[derive(Debug)]
enum ChannelEvent {
    Opened {
        generation: u64,
        outgoing: mpsc::Sender<String>,
    },
    Frame {
        generation: u64,
        frame: ChannelFrame,
    },
    Failed {
        generation: u64,
        error: NetError,
    },
    RetryDue {
        generation: u64,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap, cloneable access to a running connection manager.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<ConnectionCommand>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    /// Open a new channel, replacing any live or pending one.
    pub async fn connect(&self) -> Result<()> {
        self.command(ConnectionCommand::Connect).await
    }

    /// Write one text frame. Fails unless the channel is open; a failed send
    /// also kicks off a connect attempt.
    pub async fn send(&self, payload: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(ConnectionCommand::Send {
            payload: payload.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| NetError::ManagerStopped)?
    }

    /// Close the channel cleanly. No reconnect follows.
    pub async fn close(&self) -> Result<()> {
        self.command(ConnectionCommand::Close).await
    }

    /// Stop the manager task, dropping the channel.
    pub async fn shutdown(&self) -> Result<()> {
        self.command(ConnectionCommand::Shutdown).await
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    async fn command(&self, command: ConnectionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NetError::ManagerStopped)
    }
}

/// Spawn the connection manager in a background tokio task.
///
/// The manager starts `Idle`; call [`ConnectionHandle::connect`] to open the
/// first channel.
pub fn spawn_connection<C: Connector>(
    config: ConnectionConfig,
    resolver: AddressResolver,
    connector: C,
) -> (
    ConnectionHandle,
    mpsc::UnboundedReceiver<ConnectionNotification>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<ConnectionCommand>(256);
    let (notif_tx, notif_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::idle(config.max_retries));

    let manager = Manager {
        config,
        resolver,
        connector: Arc::new(connector),
        state: ConnectionState::Idle,
        retry_count: 0,
        generation: 0,
        outgoing: None,
        channel_task: None,
        retry_timer: None,
        events: event_tx,
        status: status_tx,
        notifications: notif_tx,
    };
    tokio::spawn(manager.run(cmd_rx, event_rx));

    (
        ConnectionHandle {
            commands: cmd_tx,
            status: status_rx,
        },
        notif_rx,
    )
}

// ---------------------------------------------------------------------------
// Manager task
// ---------------------------------------------------------------------------

struct Manager<C> {
    config: ConnectionConfig,
    resolver: AddressResolver,
    connector: Arc<C>,
    state: ConnectionState,
    retry_count: u32,
    generation: u64,
    outgoing: Option<mpsc::Sender<String>>,
    channel_task: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    status: watch::Sender<ConnectionStatus>,
    notifications: mpsc::UnboundedSender<ConnectionNotification>,
}

impl<C: Connector> Manager<C> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ConnectionCommand>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(ConnectionCommand::Connect) => self.connect(),
                        Some(ConnectionCommand::Send { payload, reply }) => {
                            let result = self.send(payload).await;
                            let _ = reply.send(result);
                        }
                        Some(ConnectionCommand::Close) => self.close(),
                        Some(ConnectionCommand::Shutdown) => {
                            info!("connection manager shutdown requested");
                            break;
                        }
                        None => {
                            info!("all connection handles dropped, shutting down");
                            break;
                        }
                    }
                }

                Some(event) = events.recv() => self.on_event(event),
            }
        }

        self.cancel_retry();
        self.release_channel();
        info!("connection manager terminated");
    }

    fn connect(&mut self) {
        self.cancel_retry();
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
        ) {
            debug!(state = %self.state, "replacing current channel");
        }
        self.open_channel();
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        if self.state == ConnectionState::Open {
            if let Some(outgoing) = &self.outgoing {
                return outgoing
                    .send(payload)
                    .await
                    .map_err(|_| NetError::ChannelClosed);
            }
        }

        let state = self.state;
        debug!(state = %state, "send while not open");
        if state != ConnectionState::Connecting {
            self.connect();
        }
        Err(NetError::NotOpen(state))
    }

    fn close(&mut self) {
        self.cancel_retry();
        match self.state {
            ConnectionState::Open => {
                // Dropping the writer asks the driver for a normal close.
                self.outgoing = None;
                self.set_state(ConnectionState::Closing);
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.release_channel();
                self.generation += 1;
                self.retry_count = 0;
                self.set_state(ConnectionState::Idle);
            }
            ConnectionState::Idle | ConnectionState::Closing => {}
        }
    }

    fn open_channel(&mut self) {
        self.release_channel();
        self.generation += 1;

        let url = (self.resolver)();
        info!(url = %url, generation = self.generation, attempt = self.retry_count, "connecting");
        self.set_state(ConnectionState::Connecting);

        self.channel_task = Some(tokio::spawn(run_channel(
            Arc::clone(&self.connector),
            url,
            self.config.connect_timeout,
            self.generation,
            self.events.clone(),
        )));
    }

    fn on_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened {
                generation,
                outgoing,
            } => {
                if !self.is_current(generation) || self.state != ConnectionState::Connecting {
                    return;
                }
                self.outgoing = Some(outgoing);
                self.retry_count = 0;
                self.set_state(ConnectionState::Open);
                info!(generation, "channel open");
            }

            ChannelEvent::Frame { generation, frame } => {
                if !self.is_current(generation) {
                    return;
                }
                match frame {
                    ChannelFrame::Text(payload) => {
                        let _ = self
                            .notifications
                            .send(ConnectionNotification::Payload(payload));
                    }
                    ChannelFrame::Closed { clean } => {
                        if clean || self.state == ConnectionState::Closing {
                            info!(generation, "channel closed");
                            self.release_channel();
                            self.retry_count = 0;
                            self.set_state(ConnectionState::Idle);
                        } else {
                            warn!(generation, "channel closed uncleanly");
                            self.schedule_retry();
                        }
                    }
                    ChannelFrame::Error(reason) => {
                        if self.state == ConnectionState::Closing {
                            self.release_channel();
                            self.set_state(ConnectionState::Idle);
                        } else {
                            warn!(generation, error = %reason, "channel error");
                            self.schedule_retry();
                        }
                    }
                }
            }

            ChannelEvent::Failed { generation, error } => {
                if !self.is_current(generation) {
                    return;
                }
                warn!(generation, error = %error, "connect attempt failed");
                self.schedule_retry();
            }

            ChannelEvent::RetryDue { generation } => {
                if !self.is_current(generation) || self.state != ConnectionState::Reconnecting {
                    debug!(generation, "ignoring stale retry timer");
                    return;
                }
                self.retry_timer = None;
                self.retry_count += 1;
                self.open_channel();
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale channel event");
            return false;
        }
        true
    }

    /// Enter `Reconnecting` with a backoff timer, or give up once the
    /// consecutive failure budget is spent.
    fn schedule_retry(&mut self) {
        self.release_channel();
        self.cancel_retry();

        if self.retry_count >= self.config.max_retries {
            warn!(
                max_retries = self.config.max_retries,
                "reconnect attempts exhausted"
            );
            self.retry_count = 0;
            self.set_state(ConnectionState::Idle);
            let _ = self
                .notifications
                .send(ConnectionNotification::Disconnected);
            return;
        }

        let delay = backoff_delay(self.retry_count);
        info!(
            retry = self.retry_count + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.set_state(ConnectionState::Reconnecting);

        let generation = self.generation;
        let events = self.events.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ChannelEvent::RetryDue { generation });
        }));
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn release_channel(&mut self) {
        self.outgoing = None;
        if let Some(task) = self.channel_task.take() {
            task.abort();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        let status = ConnectionStatus {
            state,
            retry_count: self.retry_count,
            max_retries: self.config.max_retries,
        };
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            let _ = self
                .notifications
                .send(ConnectionNotification::StateChanged(status));
        }
    }
}

/// One channel attempt: connect under a timeout, then forward frames until
/// the channel ends.
async fn run_channel<C: Connector>(
    connector: Arc<C>,
    url: String,
    timeout: Duration,
    generation: u64,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let io = match tokio::time::timeout(timeout, connector.connect(&url)).await {
        Ok(Ok(io)) => io,
        Ok(Err(error)) => {
            let _ = events.send(ChannelEvent::Failed { generation, error });
            return;
        }
        Err(_) => {
            let _ = events.send(ChannelEvent::Failed {
                generation,
                error: NetError::ConnectTimeout(timeout),
            });
            return;
        }
    };

    // The driver guard lives as long as this task.
    let ChannelIo {
        outgoing,
        mut incoming,
        driver: _driver,
    } = io;

    if events
        .send(ChannelEvent::Opened {
            generation,
            outgoing,
        })
        .is_err()
    {
        return;
    }

    while let Some(frame) = incoming.recv().await {
        let terminal = !matches!(frame, ChannelFrame::Text(_));
        if events.send(ChannelEvent::Frame { generation, frame }).is_err() || terminal {
            return;
        }
    }

    let _ = events.send(ChannelEvent::Frame {
        generation,
        frame: ChannelFrame::Closed { clean: false },
    });
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::testing::{MockConnector, Plan};

    fn fixed_address() -> AddressResolver {
        Arc::new(|| "ws://relay.test/ws".to_string())
    }

    fn spawn_mock(
        connector: MockConnector,
    ) -> (
        ConnectionHandle,
        mpsc::UnboundedReceiver<ConnectionNotification>,
    ) {
        spawn_connection(ConnectionConfig::default(), fixed_address(), connector)
    }

    async fn wait_for(handle: &ConnectionHandle, state: ConnectionState) -> ConnectionStatus {
        let mut rx = handle.watch_status();
        let status = *rx.wait_for(|s| s.state == state).await.unwrap();
        status
    }

    #[tokio::test(start_paused = true)]
    async fn opens_and_forwards_payloads() {
        let connector = MockConnector::new();
        let mut servers = connector.servers();
        let (handle, mut notifications) = spawn_mock(connector.clone());

        handle.connect().await.unwrap();
        let mut server = servers.recv().await.unwrap();
        let status = wait_for(&handle, ConnectionState::Open).await;
        assert!(status.is_connected());
        assert_eq!(status.max_retries, 5);

        handle.send("ping").await.unwrap();
        assert_eq!(server.outgoing.recv().await.unwrap(), "ping");

        server
            .incoming
            .send(ChannelFrame::Text("pong".into()))
            .await
            .unwrap();
        loop {
            match notifications.recv().await.unwrap() {
                ConnectionNotification::Payload(p) => {
                    assert_eq!(p, "pong");
                    break;
                }
                ConnectionNotification::StateChanged(_) => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(connector.urls(), vec!["ws://relay.test/ws".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replaces_the_live_channel() {
        let connector = MockConnector::new();
        let mut servers = connector.servers();
        let (handle, mut notifications) = spawn_mock(connector.clone());

        handle.connect().await.unwrap();
        let mut first = servers.recv().await.unwrap();
        wait_for(&handle, ConnectionState::Open).await;

        handle.connect().await.unwrap();
        let mut second = servers.recv().await.unwrap();
        wait_for(&handle, ConnectionState::Open).await;

        // The first channel lost its writer.
        assert!(first.outgoing.recv().await.is_none());

        // Whatever the old channel still emits is ignored.
        let _ = first.incoming.send(ChannelFrame::Text("stale".into())).await;
        let _ = first.incoming.send(ChannelFrame::Closed { clean: false }).await;

        second
            .incoming
            .send(ChannelFrame::Text("fresh".into()))
            .await
            .unwrap();
        loop {
            match notifications.recv().await.unwrap() {
                ConnectionNotification::Payload(p) => {
                    assert_eq!(p, "fresh");
                    break;
                }
                ConnectionNotification::StateChanged(s) => {
                    assert_ne!(s.state, ConnectionState::Reconnecting)
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        handle.send("only-second").await.unwrap();
        assert_eq!(second.outgoing.recv().await.unwrap(), "only-second");
        assert_eq!(connector.attempts(), 2);
        assert_eq!(handle.status().state, ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_connecting_supersedes_the_attempt() {
        let connector = MockConnector::with_plans(vec![
            Plan::AcceptAfter(Duration::from_millis(3000)),
            Plan::AcceptAfter(Duration::from_millis(500)),
        ]);
        let mut servers = connector.servers();
        let (handle, mut notifications) = spawn_mock(connector.clone());

        handle.connect().await.unwrap();
        wait_for(&handle, ConnectionState::Connecting).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 1);

        handle.connect().await.unwrap();
        let mut server = servers.recv().await.unwrap();
        wait_for(&handle, ConnectionState::Open).await;
        assert_eq!(connector.attempts(), 2);

        // Well past the first attempt's handshake delay.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(servers.try_recv().is_err());
        assert_eq!(handle.status().state, ConnectionState::Open);

        let mut opened = 0;
        while let Ok(notification) = notifications.try_recv() {
            if let ConnectionNotification::StateChanged(status) = notification {
                if status.state == ConnectionState::Open {
                    opened += 1;
                }
            }
        }
        assert_eq!(opened, 1);

        handle.send("to-second").await.unwrap();
        assert_eq!(server.outgoing.recv().await.unwrap(), "to-second");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_schedule_and_retry_cap() {
        let connector = MockConnector::with_plans(vec![Plan::Refuse; 6]);
        let (handle, mut notifications) = spawn_mock(connector.clone());
        let started = Instant::now();

        handle.connect().await.unwrap();

        let mut statuses = Vec::new();
        loop {
            match notifications.recv().await.unwrap() {
                ConnectionNotification::StateChanged(s) => statuses.push(s),
                ConnectionNotification::Disconnected => break,
                ConnectionNotification::Payload(_) => panic!("no channel should open"),
            }
        }

        let offsets: Vec<u64> = connector
            .attempt_times()
            .iter()
            .map(|t| t.duration_since(started).as_millis() as u64)
            .collect();
        assert_eq!(offsets, vec![0, 1000, 3000, 7000, 15_000, 25_000]);

        let reconnecting: Vec<u32> = statuses
            .iter()
            .filter(|s| s.state == ConnectionState::Reconnecting)
            .map(|s| s.retry_count)
            .collect();
        assert_eq!(reconnecting, vec![0, 1, 2, 3, 4]);

        let last = statuses.last().unwrap();
        assert_eq!(last.state, ConnectionState::Idle);
        assert_eq!(last.retry_count, 0);

        // Nothing else is scheduled after giving up.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 6);
        assert_eq!(handle.status(), ConnectionStatus::idle(5));
    }

    #[tokio::test(start_paused = true)]
    async fn last_retry_waits_ten_seconds_then_gives_up() {
        // Open once, then fail four reconnects so the counter sits at 4.
        let mut plans = vec![Plan::Accept];
        plans.extend(vec![Plan::Refuse; 5]);
        let connector = MockConnector::with_plans(plans);
        let mut servers = connector.servers();
        let (handle, mut notifications) = spawn_mock(connector.clone());

        handle.connect().await.unwrap();
        let server = servers.recv().await.unwrap();
        wait_for(&handle, ConnectionState::Open).await;
        server
            .incoming
            .send(ChannelFrame::Closed { clean: false })
            .await
            .unwrap();

        let mut at_four = None;
        loop {
            match notifications.recv().await.unwrap() {
                ConnectionNotification::StateChanged(s)
                    if s.state == ConnectionState::Reconnecting && s.retry_count == 4 =>
                {
                    at_four = Some(Instant::now());
                }
                ConnectionNotification::Disconnected => break,
                _ => {}
            }
        }

        let scheduled_at = at_four.expect("retry counter should reach 4");
        let last_attempt = *connector.attempt_times().last().unwrap();
        assert_eq!(
            last_attempt.duration_since(scheduled_at),
            Duration::from_millis(10_000)
        );
        assert_eq!(connector.attempts(), 6);
        let status = handle.status();
        assert_eq!(status.state, ConnectionState::Idle);
        assert_eq!(status.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_feeds_backoff() {
        let connector = MockConnector::with_plans(vec![Plan::Hang, Plan::Accept]);
        let mut servers = connector.servers();
        let (handle, _notifications) = spawn_mock(connector.clone());
        let started = Instant::now();

        handle.connect().await.unwrap();
        let reconnecting = wait_for(&handle, ConnectionState::Reconnecting).await;
        assert_eq!(reconnecting.retry_count, 0);
        assert_eq!(started.elapsed(), Duration::from_millis(5000));

        let _server = servers.recv().await.unwrap();
        let open = wait_for(&handle, ConnectionState::Open).await;
        assert_eq!(open.retry_count, 0);
        assert_eq!(started.elapsed(), Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn send_when_not_open_fails_and_connects() {
        let connector = MockConnector::new();
        let mut servers = connector.servers();
        let (handle, _notifications) = spawn_mock(connector.clone());

        let err = handle.send("early").await.unwrap_err();
        assert!(matches!(err, NetError::NotOpen(ConnectionState::Idle)));

        let mut server = servers.recv().await.unwrap();
        wait_for(&handle, ConnectionState::Open).await;
        assert_eq!(connector.attempts(), 1);

        // The failed payload was not queued.
        handle.send("later").await.unwrap();
        assert_eq!(server.outgoing.recv().await.unwrap(), "later");
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_connecting_does_not_restart() {
        let connector = MockConnector::with_plans(vec![Plan::Hang]);
        let (handle, _notifications) = spawn_mock(connector.clone());

        handle.connect().await.unwrap();
        wait_for(&handle, ConnectionState::Connecting).await;
        let err = handle.send("x").await.unwrap_err();
        assert!(matches!(err, NetError::NotOpen(ConnectionState::Connecting)));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_close_from_peer_does_not_reconnect() {
        let connector = MockConnector::new();
        let mut servers = connector.servers();
        let (handle, _notifications) = spawn_mock(connector.clone());

        handle.connect().await.unwrap();
        let server = servers.recv().await.unwrap();
        wait_for(&handle, ConnectionState::Open).await;

        server
            .incoming
            .send(ChannelFrame::Closed { clean: true })
            .await
            .unwrap();
        wait_for(&handle, ConnectionState::Idle).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_close_goes_through_closing() {
        let connector = MockConnector::new();
        let mut servers = connector.servers();
        let (handle, _notifications) = spawn_mock(connector.clone());

        handle.connect().await.unwrap();
        let mut server = servers.recv().await.unwrap();
        wait_for(&handle, ConnectionState::Open).await;

        handle.close().await.unwrap();
        wait_for(&handle, ConnectionState::Closing).await;
        assert!(server.outgoing.recv().await.is_none());

        // Even an abrupt end while closing is final.
        server
            .incoming
            .send(ChannelFrame::Closed { clean: false })
            .await
            .unwrap();
        wait_for(&handle, ConnectionState::Idle).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unclean_close_reconnects_after_one_second() {
        let connector = MockConnector::new();
        let mut servers = connector.servers();
        let (handle, _notifications) = spawn_mock(connector.clone());

        handle.connect().await.unwrap();
        let first = servers.recv().await.unwrap();
        wait_for(&handle, ConnectionState::Open).await;

        let dropped_at = Instant::now();
        drop(first);
        wait_for(&handle, ConnectionState::Reconnecting).await;

        let _second = servers.recv().await.unwrap();
        wait_for(&handle, ConnectionState::Open).await;
        assert_eq!(dropped_at.elapsed(), Duration::from_millis(1000));
        assert_eq!(handle.status().retry_count, 0);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_connect_cancels_pending_retry() {
        let connector = MockConnector::with_plans(vec![Plan::Refuse, Plan::Hang]);
        let (handle, _notifications) = spawn_mock(connector.clone());

        handle.connect().await.unwrap();
        wait_for(&handle, ConnectionState::Reconnecting).await;

        handle.connect().await.unwrap();
        wait_for(&handle, ConnectionState::Connecting).await;

        // The old timer must not start a third attempt.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn address_is_resolved_per_attempt() {
        let target = Arc::new(std::sync::Mutex::new("ws://a/ws".to_string()));
        let resolver: AddressResolver = {
            let target = Arc::clone(&target);
            Arc::new(move || target.lock().unwrap().clone())
        };
        let connector = MockConnector::new();
        let mut servers = connector.servers();
        let (handle, _notifications) =
            spawn_connection(ConnectionConfig::default(), resolver, connector.clone());

        handle.connect().await.unwrap();
        let _a = servers.recv().await.unwrap();
        *target.lock().unwrap() = "ws://b/ws".to_string();
        handle.connect().await.unwrap();
        let _b = servers.recv().await.unwrap();

        assert_eq!(
            connector.urls(),
            vec!["ws://a/ws".to_string(), "ws://b/ws".to_string()]
        );
    }
}
