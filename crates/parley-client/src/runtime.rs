//! Runs the [`SyncEngine`] in its own task.
//!
//! The presentation layer holds a [`SyncHandle`]: intents go in as
//! [`SyncCommand`]s, and the rendered state comes back as a
//! [`SyncSnapshot`] on a `watch` channel, republished after every change.

use std::path::Path;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use parley_net::{
    spawn_connection, ConnectionHandle, ConnectionNotification, ConnectionStatus, Connector,
    WebSocketConnector,
};
use parley_shared::{Message, MessageDraft, MessageStatus};
use parley_store::database::DATABASE_FILE;
use parley_store::Database;

use crate::config::ClientConfig;
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::identity::LocalIdentity;

/// What the UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub messages: Vec<Message>,
    pub online_count: u32,
    pub connection: ConnectionStatus,
    /// Set when reconnects were exhausted; cleared by the next open.
    pub disconnected: bool,
}

type Reply<T> = oneshot::Sender<Result<T>>;

/// Commands sent *into* the engine task.
#[derive(Debug)]
pub enum SyncCommand {
    Send {
        draft: MessageDraft,
        reply: Reply<Message>,
    },
    Retry {
        message: Message,
        reply: Reply<Message>,
    },
    Delete {
        id: String,
        reply: Reply<bool>,
    },
    Purge {
        sender_id: String,
        reply: Reply<usize>,
    },
    MarkStatus {
        id: String,
        status: MessageStatus,
        reply: Reply<Message>,
    },
    Connect,
    Shutdown,
}

#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    snapshot: watch::Receiver<SyncSnapshot>,
    identity: LocalIdentity,
    channel: String,
}

impl SyncHandle {
    /// Send `text` to the configured channel as the local user.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<Message> {
        let draft = MessageDraft::text(
            text,
            self.identity.sender_id.as_str(),
            self.identity.username.as_str(),
            self.channel.as_str(),
        );
        self.send(draft).await
    }

    pub async fn send(&self, draft: MessageDraft) -> Result<Message> {
        self.request(|reply| SyncCommand::Send { draft, reply }).await
    }

    pub async fn retry(&self, message: Message) -> Result<Message> {
        self.request(|reply| SyncCommand::Retry { message, reply })
            .await
    }

    pub async fn delete(&self, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        self.request(|reply| SyncCommand::Delete { id, reply }).await
    }

    pub async fn purge_sender(&self, sender_id: impl Into<String>) -> Result<usize> {
        let sender_id = sender_id.into();
        self.request(|reply| SyncCommand::Purge { sender_id, reply })
            .await
    }

    pub async fn mark_status(&self, id: impl Into<String>, status: MessageStatus) -> Result<Message> {
        let id = id.into();
        self.request(|reply| SyncCommand::MarkStatus { id, status, reply })
            .await
    }

    /// Manual reconnect, e.g. after retries were exhausted.
    pub async fn connect(&self) -> Result<()> {
        self.commands
            .send(SyncCommand::Connect)
            .await
            .map_err(|_| SyncError::EngineStopped)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(SyncCommand::Shutdown)
            .await
            .map_err(|_| SyncError::EngineStopped)
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.clone()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> SyncCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }
}

/// Spawn the engine task. `channel` is where [`SyncHandle::send_text`]
/// posts.
pub fn spawn_engine(
    engine: SyncEngine,
    notifications: mpsc::UnboundedReceiver<ConnectionNotification>,
    channel: impl Into<String>,
) -> SyncHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let initial = SyncSnapshot {
        messages: engine.messages().to_vec(),
        online_count: engine.online_count(),
        connection: engine.connection_status(),
        disconnected: false,
    };
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);
    let identity = engine.identity().clone();

    tokio::spawn(run_engine(engine, cmd_rx, notifications, snapshot_tx));

    SyncHandle {
        commands: cmd_tx,
        snapshot: snapshot_rx,
        identity,
        channel: channel.into(),
    }
}

async fn run_engine(
    mut engine: SyncEngine,
    mut commands: mpsc::Receiver<SyncCommand>,
    mut notifications: mpsc::UnboundedReceiver<ConnectionNotification>,
    snapshot: watch::Sender<SyncSnapshot>,
) {
    let connection = engine.connection().clone();
    let mut disconnected = false;
    info!("sync engine started");

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    // The snapshot is published before replying so a caller
                    // that awaited the command sees its effect.
                    Some(SyncCommand::Send { draft, reply }) => {
                        let result = engine.send_intent(draft).await;
                        publish(&engine, disconnected, &snapshot);
                        let _ = reply.send(result);
                    }
                    Some(SyncCommand::Retry { message, reply }) => {
                        let result = engine.retry_send(message).await;
                        publish(&engine, disconnected, &snapshot);
                        let _ = reply.send(result);
                    }
                    Some(SyncCommand::Delete { id, reply }) => {
                        let result = engine.delete_message(&id);
                        publish(&engine, disconnected, &snapshot);
                        let _ = reply.send(result);
                    }
                    Some(SyncCommand::Purge { sender_id, reply }) => {
                        let result = engine.purge_sender(&sender_id);
                        publish(&engine, disconnected, &snapshot);
                        let _ = reply.send(result);
                    }
                    Some(SyncCommand::MarkStatus { id, status, reply }) => {
                        let result = engine.mark_status(&id, status);
                        publish(&engine, disconnected, &snapshot);
                        let _ = reply.send(result);
                    }
                    Some(SyncCommand::Connect) => {
                        if let Err(e) = connection.connect().await {
                            warn!(error = %e, "manual connect failed");
                        }
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                }
            }

            notification = notifications.recv() => {
                match notification {
                    Some(ConnectionNotification::Payload(raw)) => {
                        let outcome = engine.handle_inbound(&raw);
                        debug!(?outcome, "inbound payload");
                    }
                    Some(ConnectionNotification::StateChanged(status)) => {
                        debug!(state = %status.state, retry = status.retry_count, "connection state");
                        if status.is_connected() {
                            disconnected = false;
                        }
                    }
                    Some(ConnectionNotification::Disconnected) => {
                        warn!("relay unreachable, waiting for manual reconnect");
                        disconnected = true;
                    }
                    None => {
                        info!("connection manager gone");
                        break;
                    }
                }
            }
        }

        publish(&engine, disconnected, &snapshot);
    }

    let _ = connection.shutdown().await;
    info!("sync engine stopped");
}

fn publish(engine: &SyncEngine, disconnected: bool, snapshot: &watch::Sender<SyncSnapshot>) {
    let next = SyncSnapshot {
        messages: engine.messages().to_vec(),
        online_count: engine.online_count(),
        connection: engine.connection_status(),
        disconnected,
    };
    snapshot.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Open the store and identity under `data_dir`, start the connection
/// manager with `connector` and the engine on top, then connect.
pub async fn start_with<C: Connector>(
    config: &ClientConfig,
    data_dir: &Path,
    connector: C,
) -> Result<SyncHandle> {
    std::fs::create_dir_all(data_dir)?;
    let db = Database::open_at(&data_dir.join(DATABASE_FILE))?;

    let identity = LocalIdentity::load_or_create(data_dir, &config.username)?;
    identity.register(&db)?;
    info!(sender_id = %identity.sender_id, username = %identity.username, "local identity");

    let (connection, notifications) = spawn_connection(
        config.connection_config(),
        config.address_resolver(),
        connector,
    );
    start_engine(db, connection, notifications, identity, config).await
}

async fn start_engine(
    db: Database,
    connection: ConnectionHandle,
    notifications: mpsc::UnboundedReceiver<ConnectionNotification>,
    identity: LocalIdentity,
    config: &ClientConfig,
) -> Result<SyncHandle> {
    let mut engine = SyncEngine::new(db, connection.clone(), identity, config.wire_format);
    engine.load_from_store()?;

    let handle = spawn_engine(engine, notifications, config.channel.clone());
    connection.connect().await?;
    Ok(handle)
}

/// Start a client against the relay over websockets.
pub async fn start(config: &ClientConfig) -> Result<SyncHandle> {
    let data_dir = config.resolve_data_dir()?;
    start_with(config, &data_dir, WebSocketConnector).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_net::testing::{MockConnector, Plan};
    use parley_net::ConnectionState;
    use parley_shared::{PresenceEvent, WireEvent, WireFormat};

    use super::*;

    fn test_config() -> ClientConfig {
        ClientConfig {
            relay_url: "ws://relay.test/ws".into(),
            username: "tester".into(),
            channel: "c1".into(),
            ..ClientConfig::default()
        }
    }

    async fn wait_until(handle: &SyncHandle, check: impl Fn(&SyncSnapshot) -> bool) -> SyncSnapshot {
        let mut rx = handle.watch();
        let snapshot = rx.wait_for(|s| check(s)).await.unwrap().clone();
        snapshot
    }

    #[tokio::test]
    async fn snapshot_follows_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MockConnector::new();
        let mut servers = connector.servers();

        let handle = start_with(&test_config(), dir.path(), connector).await.unwrap();
        let mut server = servers.recv().await.unwrap();
        wait_until(&handle, |s| s.connection.is_connected()).await;

        let join = WireEvent::Presence(PresenceEvent::join("p2"))
            .encode(WireFormat::Legacy)
            .unwrap();
        server
            .incoming
            .send(parley_net::ChannelFrame::Text(join))
            .await
            .unwrap();
        wait_until(&handle, |s| s.online_count == 1).await;

        let sent = handle.send_text("hello relay").await.unwrap();
        assert_eq!(sent.channel_id, "c1");
        assert_eq!(sent.sender_name, "tester");
        assert_eq!(&sent.sender_id, &handle.identity().sender_id);
        assert!(server.outgoing.recv().await.unwrap().contains("hello relay"));

        let snapshot = wait_until(&handle, |s| s.messages.len() == 1).await;
        assert_eq!(snapshot.messages[0].id, sent.id);

        assert!(handle.delete(&sent.id).await.unwrap());
        wait_until(&handle, |s| s.messages.is_empty()).await;

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn restart_rehydrates_view_and_keeps_identity() {
        let dir = tempfile::tempdir().unwrap();

        let connector = MockConnector::new();
        let mut servers = connector.servers();
        let first = start_with(&test_config(), dir.path(), connector).await.unwrap();
        let _server = servers.recv().await.unwrap();
        wait_until(&first, |s| s.connection.is_connected()).await;
        let sent = first.send_text("persist me").await.unwrap();
        let sender_id = first.identity().sender_id.clone();
        first.shutdown().await.unwrap();

        // Let the first engine release the database.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = start_with(&test_config(), dir.path(), MockConnector::new())
            .await
            .unwrap();
        assert_eq!(second.identity().sender_id, sender_id);
        let snapshot = second.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].id, sent.id);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_as_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            max_retries: 2,
            ..test_config()
        };
        let connector = MockConnector::with_plans(vec![Plan::Refuse; 3]);
        let mut servers = connector.servers();

        let handle = start_with(&config, dir.path(), connector).await.unwrap();
        let snapshot = wait_until(&handle, |s| s.disconnected).await;
        assert_eq!(snapshot.connection.state, ConnectionState::Idle);
        assert_eq!(snapshot.connection.retry_count, 0);

        let err = handle.send_text("anyone?").await.unwrap_err();
        assert!(err.unsent_message().is_some());

        // The failed send already triggered a reconnect; the next plan accepts.
        let _server = servers.recv().await.unwrap();
        let snapshot = wait_until(&handle, |s| s.connection.is_connected()).await;
        assert!(!snapshot.disconnected);
    }
}
