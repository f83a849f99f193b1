//! The sync engine: reconciles relay traffic, local intents and the store
//! into one ordered view.
//!
//! Messages are shown in arrival order. Nothing is reordered by
//! `created_at`, so a gap after a reconnect can leave late arrivals at the
//! end of the view.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use parley_net::{ConnectionHandle, ConnectionStatus};
use parley_shared::{
    Message, MessageDraft, MessageStatus, PresenceKind, WireEvent, WireFormat,
};
use parley_store::{Database, MessageFilter, MessagePatch, StoreError};

use crate::error::{Result, SyncError};
use crate::identity::LocalIdentity;

/// What [`SyncEngine::handle_inbound`] did with a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Presence event applied; carries the new online count.
    Presence { online_count: u32 },
    /// Chat message appended to the view.
    Appended { id: String },
    /// Already known, either in the view or in the store.
    Duplicate { id: String },
    /// Malformed or invalid payload, dropped.
    Dropped,
}

pub struct SyncEngine {
    db: Database,
    connection: ConnectionHandle,
    identity: LocalIdentity,
    wire_format: WireFormat,
    view: Vec<Message>,
    view_ids: HashSet<String>,
    online_count: u32,
}

impl SyncEngine {
    pub fn new(
        db: Database,
        connection: ConnectionHandle,
        identity: LocalIdentity,
        wire_format: WireFormat,
    ) -> Self {
        Self {
            db,
            connection,
            identity,
            wire_format,
            view: Vec::new(),
            view_ids: HashSet::new(),
            online_count: 0,
        }
    }

    /// Replace the view with every visible message in the store.
    pub fn load_from_store(&mut self) -> Result<usize> {
        let messages = self.db.visible_messages()?;
        self.view_ids = messages.iter().map(|m| m.id.clone()).collect();
        self.view = messages;
        info!(count = self.view.len(), "view hydrated from store");
        Ok(self.view.len())
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Apply one raw relay payload. Never fails: problems are logged and
    /// reported through the outcome.
    pub fn handle_inbound(&mut self, raw: &str) -> InboundOutcome {
        let event = match WireEvent::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping malformed payload");
                return InboundOutcome::Dropped;
            }
        };

        match event {
            WireEvent::Presence(presence) => {
                self.online_count = match presence.kind {
                    PresenceKind::Join => self.online_count.saturating_add(1),
                    PresenceKind::Leave => self.online_count.saturating_sub(1),
                };
                debug!(
                    user = %presence.user_id,
                    kind = ?presence.kind,
                    online = self.online_count,
                    "presence"
                );
                InboundOutcome::Presence {
                    online_count: self.online_count,
                }
            }
            WireEvent::Chat { message } => self.accept_remote(message),
        }
    }

    fn accept_remote(&mut self, mut message: Message) -> InboundOutcome {
        message.ensure_id();
        if let Err(e) = message.validate() {
            warn!(id = %message.id, error = %e, "dropping invalid message");
            return InboundOutcome::Dropped;
        }
        if self.view_ids.contains(&message.id) {
            debug!(id = %message.id, "duplicate delivery");
            return InboundOutcome::Duplicate { id: message.id };
        }

        message.is_local = false;
        message.deleted_at = None;
        if message.status == MessageStatus::Sent {
            message.status = MessageStatus::inbound_default();
        }

        if message.sender_id != self.identity.sender_id {
            match self.db.add_message(&message) {
                Ok(_) => {}
                Err(StoreError::Constraint(id)) => {
                    // Known to the store: already shown or deleted here.
                    debug!(id = %id, "duplicate delivery");
                    return InboundOutcome::Duplicate { id };
                }
                Err(e) => {
                    error!(id = %message.id, error = %e, "failed to persist inbound message");
                }
            }
        }

        let id = message.id.clone();
        self.append(message);
        InboundOutcome::Appended { id }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// A draft authored by the local identity in `channel_id`.
    pub fn draft(&self, text: impl Into<String>, channel_id: impl Into<String>) -> MessageDraft {
        MessageDraft::text(
            text,
            self.identity.sender_id.as_str(),
            self.identity.username.as_str(),
            channel_id,
        )
    }

    /// Send a new message: assign id and creation time, put it on the wire,
    /// then persist and append it. On a send failure the message is returned
    /// inside [`SyncError::Send`] and nothing is stored.
    pub async fn send_intent(&mut self, draft: MessageDraft) -> Result<Message> {
        draft.validate()?;
        self.transmit(Message::from_draft(draft)).await
    }

    /// Resend a message that failed earlier, keeping its id and creation
    /// time. A message already in the view or in the store, deleted ones
    /// included, is returned as is and not sent again.
    pub async fn retry_send(&mut self, mut message: Message) -> Result<Message> {
        if let Some(existing) = self.find(&message.id) {
            debug!(id = %message.id, "retry of a message already sent");
            return Ok(existing.clone());
        }
        match self.db.get_message(&message.id) {
            Ok(stored) => {
                debug!(id = %stored.id, deleted = stored.is_deleted(), "retry of a stored message");
                return Ok(stored);
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        message.validate()?;
        message.status = MessageStatus::Sent;
        message.is_local = true;
        self.transmit(message).await
    }

    async fn transmit(&mut self, mut message: Message) -> Result<Message> {
        let mut wire = message.clone();
        wire.is_local = false;
        let payload = WireEvent::chat(wire).encode(self.wire_format)?;

        if let Err(source) = self.connection.send(payload).await {
            warn!(id = %message.id, error = %source, "send failed");
            return Err(SyncError::Send {
                message: Box::new(message),
                source,
            });
        }

        message.is_local = false;
        match self.db.add_message(&message) {
            Ok(_) => {}
            Err(StoreError::Constraint(id)) => {
                debug!(id = %id, "message already stored");
                // A soft-deleted row stays hidden.
                if self.db.get_message(&id).map_or(false, |m| m.is_deleted()) {
                    return Ok(message);
                }
            }
            Err(e) => error!(id = %message.id, error = %e, "sent message not persisted"),
        }

        debug!(id = %message.id, "message sent");
        self.append(message.clone());
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Local edits
    // ------------------------------------------------------------------

    /// Soft-delete one message and drop it from the view. Local only.
    pub fn delete_message(&mut self, id: &str) -> Result<bool> {
        let deleted = self.db.soft_delete_message(id)?;
        let before = self.view.len();
        self.view.retain(|m| m.id != id);
        info!(id = %id, deleted, "message deleted");
        Ok(deleted || self.view.len() != before)
    }

    /// Soft-delete everything from one sender. Local only.
    pub fn purge_sender(&mut self, sender_id: &str) -> Result<usize> {
        let filter = MessageFilter::from_sender(sender_id);
        let purged = self.db.soft_delete_messages_where(&filter)?;
        self.view.retain(|m| !filter.matches(m));
        info!(sender = %sender_id, purged, "sender purged");
        Ok(purged)
    }

    /// Move a message forward in the `sent -> delivered -> seen`
    /// progression, in the store and in the view.
    ///
    /// Own echoes are rendered without a store row; for those only the view
    /// entry changes.
    pub fn mark_status(&mut self, id: &str, status: MessageStatus) -> Result<Message> {
        let updated = match self.db.update_message(id, &MessagePatch::status(status)) {
            Ok(updated) => updated,
            Err(StoreError::NotFound(missing)) => {
                let Some(entry) = self.view.iter_mut().find(|m| m.id == id) else {
                    return Err(StoreError::NotFound(missing).into());
                };
                if !entry.status.can_advance_to(status) {
                    return Err(StoreError::InvalidTransition {
                        id: missing,
                        from: entry.status,
                        to: status,
                    }
                    .into());
                }
                entry.status = status;
                return Ok(entry.clone());
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(entry) = self.view.iter_mut().find(|m| m.id == id) {
            entry.status = updated.status;
        }
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn messages(&self) -> &[Message] {
        &self.view
    }

    pub fn online_count(&self) -> u32 {
        self.online_count
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn find(&self, id: &str) -> Option<&Message> {
        self.view.iter().find(|m| m.id == id)
    }

    fn append(&mut self, message: Message) {
        self.view_ids.insert(message.id.clone());
        self.view.push(message);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use parley_net::testing::{MockConnector, MockServer, Plan};
    use parley_net::{spawn_connection, ConnectionConfig, ConnectionState, NetError};
    use parley_shared::PresenceEvent;
    use tokio::sync::mpsc;

    use super::*;

    struct Harness {
        engine: SyncEngine,
        server: Option<MockServer>,
        _servers: mpsc::UnboundedReceiver<MockServer>,
    }

    async fn harness(open: bool) -> Harness {
        let plans = if open { vec![Plan::Accept] } else { vec![Plan::Hang] };
        let connector = MockConnector::with_plans(plans);
        let mut servers = connector.servers();
        let (handle, _notifications) = spawn_connection(
            ConnectionConfig::default(),
            Arc::new(|| "ws://relay.test/ws".to_string()),
            connector,
        );

        let mut server = None;
        if open {
            handle.connect().await.unwrap();
            server = servers.recv().await;
            let mut status = handle.watch_status();
            status
                .wait_for(|s| s.state == ConnectionState::Open)
                .await
                .unwrap();
        }

        let engine = SyncEngine::new(
            Database::open_in_memory().unwrap(),
            handle,
            LocalIdentity::new("me", "Me"),
            WireFormat::Legacy,
        );
        Harness {
            engine,
            server,
            _servers: servers,
        }
    }

    fn remote(id: &str, sender: &str, text: &str) -> String {
        let message = Message {
            id: id.to_string(),
            text: text.to_string(),
            sender_id: sender.to_string(),
            sender_name: sender.to_uppercase(),
            channel_id: "c1".to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 30, 10, 0, 0).unwrap(),
            status: MessageStatus::Sent,
            is_local: false,
            deleted_at: None,
            attachments: Vec::new(),
        };
        WireEvent::chat(message).encode(WireFormat::Legacy).unwrap()
    }

    fn presence(event: PresenceEvent) -> String {
        WireEvent::Presence(event).encode(WireFormat::Legacy).unwrap()
    }

    #[tokio::test]
    async fn optimistic_send_while_open() {
        let mut h = harness(true).await;
        let draft = MessageDraft::text("hi", "u1", "U1", "c1");

        let sent = h.engine.send_intent(draft).await.unwrap();

        assert!(!sent.is_local);
        assert_eq!(sent.status, MessageStatus::Sent);
        assert_eq!(h.engine.messages(), &[sent.clone()]);

        let stored = h.engine.database().get_message(&sent.id).unwrap();
        assert_eq!(stored, sent);

        let server = h.server.as_mut().unwrap();
        let frame = server.outgoing.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["text"], "hi");
        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["channelId"], "c1");
        assert_eq!(json["isLocal"], false);
        assert!(json.get("type").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_returns_the_message_and_stores_nothing() {
        let mut h = harness(false).await;
        let draft = h.engine.draft("hello?", "c1");

        let err = h.engine.send_intent(draft).await.unwrap_err();
        let unsent = err.unsent_message().cloned().unwrap();

        assert!(matches!(
            err,
            SyncError::Send {
                source: NetError::NotOpen(ConnectionState::Idle),
                ..
            }
        ));
        assert_eq!(unsent.text, "hello?");
        assert_eq!(unsent.sender_id, "me");
        assert!(h.engine.messages().is_empty());
        assert_eq!(h.engine.database().message_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_reuses_id_and_created_at() {
        let mut h = harness(true).await;
        let mut failed = Message::from_draft(h.engine.draft("again", "c1"));
        failed.status = MessageStatus::Error;

        let sent = h.engine.retry_send(failed.clone()).await.unwrap();
        assert_eq!(sent.id, failed.id);
        assert_eq!(sent.created_at, failed.created_at);
        assert_eq!(sent.status, MessageStatus::Sent);

        // A second retry is a no-op.
        let again = h.engine.retry_send(failed).await.unwrap();
        assert_eq!(again.id, sent.id);
        assert_eq!(h.engine.messages().len(), 1);
        assert_eq!(h.engine.database().message_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn retry_after_delete_stays_local() {
        let mut h = harness(true).await;
        let draft = h.engine.draft("regret", "c1");
        let sent = h.engine.send_intent(draft).await.unwrap();
        let server = h.server.as_mut().unwrap();
        assert!(server.outgoing.recv().await.unwrap().contains("regret"));

        assert!(h.engine.delete_message(&sent.id).unwrap());
        let again = h.engine.retry_send(sent.clone()).await.unwrap();

        assert_eq!(again.id, sent.id);
        assert!(again.is_deleted());
        assert!(h.engine.messages().is_empty());
        assert!(h.engine.database().get_message(&sent.id).unwrap().is_deleted());
        let server = h.server.as_mut().unwrap();
        assert!(server.outgoing.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_drafts_are_rejected_before_sending() {
        let mut h = harness(true).await;

        let empty = h.engine.draft("   ", "c1");
        assert!(matches!(
            h.engine.send_intent(empty).await,
            Err(SyncError::Invalid(_))
        ));

        let long = h.engine.draft("x".repeat(1001), "c1");
        assert!(matches!(
            h.engine.send_intent(long).await,
            Err(SyncError::Invalid(_))
        ));

        let server = h.server.as_mut().unwrap();
        assert!(server.outgoing.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_then_leave_nets_zero_without_writes() {
        let mut h = harness(false).await;

        assert_eq!(
            h.engine.handle_inbound(&presence(PresenceEvent::join("p1"))),
            InboundOutcome::Presence { online_count: 1 }
        );
        assert_eq!(
            h.engine.handle_inbound(&presence(PresenceEvent::leave("p1"))),
            InboundOutcome::Presence { online_count: 0 }
        );

        assert_eq!(h.engine.online_count(), 0);
        assert_eq!(h.engine.database().message_count().unwrap(), 0);
        assert!(h.engine.database().visible_users().unwrap().is_empty());
        assert!(h.engine.messages().is_empty());
    }

    #[tokio::test]
    async fn online_count_never_goes_negative() {
        let mut h = harness(false).await;
        h.engine
            .handle_inbound(&presence(PresenceEvent::leave("ghost")));
        assert_eq!(h.engine.online_count(), 0);
    }

    #[tokio::test]
    async fn inbound_chat_is_persisted_once() {
        let mut h = harness(false).await;
        let raw = remote("m1", "u2", "hey");

        assert_eq!(
            h.engine.handle_inbound(&raw),
            InboundOutcome::Appended { id: "m1".into() }
        );
        assert_eq!(
            h.engine.handle_inbound(&raw),
            InboundOutcome::Duplicate { id: "m1".into() }
        );

        assert_eq!(h.engine.messages().len(), 1);
        let stored = h.engine.database().get_message("m1").unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert!(!stored.is_local);
    }

    #[tokio::test]
    async fn own_echo_is_shown_but_not_stored() {
        let mut h = harness(false).await;

        let outcome = h.engine.handle_inbound(&remote("m9", "me", "from my other tab"));
        assert_eq!(outcome, InboundOutcome::Appended { id: "m9".into() });
        assert_eq!(h.engine.messages().len(), 1);
        assert_eq!(h.engine.database().message_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn deleted_message_is_not_resurrected_by_redelivery() {
        let mut h = harness(false).await;
        let raw = remote("m1", "u2", "oops");

        h.engine.handle_inbound(&raw);
        assert!(h.engine.delete_message("m1").unwrap());
        assert!(h.engine.messages().is_empty());

        h.engine.load_from_store().unwrap();
        assert_eq!(
            h.engine.handle_inbound(&raw),
            InboundOutcome::Duplicate { id: "m1".into() }
        );
        assert!(h.engine.messages().is_empty());
    }

    #[tokio::test]
    async fn malformed_payloads_are_dropped() {
        let mut h = harness(false).await;
        h.engine.handle_inbound(&remote("m1", "u2", "before"));

        for raw in [
            "not json",
            r#"{"type":"typing","userId":"u2"}"#,
            r#"{"text":"no sender","createdAt":"2025-03-30T10:00:00Z"}"#,
            r#"{"id":"m2","text":"","senderId":"u2","createdAt":"2025-03-30T10:00:00Z"}"#,
        ] {
            assert_eq!(h.engine.handle_inbound(raw), InboundOutcome::Dropped);
        }

        assert_eq!(h.engine.messages().len(), 1);
        assert_eq!(h.engine.database().message_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn legacy_payload_without_id_gets_one() {
        let mut h = harness(false).await;
        let raw = r#"{"text":"old client","senderId":"u3","timestamp":"2025-03-30T10:00:00Z"}"#;

        let InboundOutcome::Appended { id } = h.engine.handle_inbound(raw) else {
            panic!("expected append");
        };
        assert!(!id.is_empty());
        assert_eq!(h.engine.database().get_message(&id).unwrap().text, "old client");
    }

    #[tokio::test]
    async fn purge_sender_leaves_other_senders() {
        let mut h = harness(false).await;
        for (id, sender) in [("a", "u1"), ("b", "u2"), ("c", "u1"), ("d", "u2"), ("e", "u1")] {
            h.engine.handle_inbound(&remote(id, sender, "text"));
        }

        assert_eq!(h.engine.purge_sender("u1").unwrap(), 3);

        let visible = h.engine.database().visible_messages().unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|m| m.sender_id == "u2"));

        let ids: Vec<&str> = h.engine.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[tokio::test]
    async fn view_keeps_arrival_order() {
        let mut h = harness(false).await;
        let late = r#"{"id":"late","text":"written first","senderId":"u2","createdAt":"2020-01-01T00:00:00Z"}"#;

        h.engine.handle_inbound(&remote("early", "u2", "written second"));
        h.engine.handle_inbound(late);

        let ids: Vec<&str> = h.engine.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn mark_status_is_monotonic() {
        let mut h = harness(false).await;
        h.engine.handle_inbound(&remote("m1", "u2", "read me"));

        let seen = h.engine.mark_status("m1", MessageStatus::Seen).unwrap();
        assert_eq!(seen.status, MessageStatus::Seen);
        assert_eq!(h.engine.messages()[0].status, MessageStatus::Seen);

        assert!(matches!(
            h.engine.mark_status("m1", MessageStatus::Delivered),
            Err(SyncError::Store(StoreError::InvalidTransition { .. }))
        ));
        assert_eq!(h.engine.messages()[0].status, MessageStatus::Seen);
    }

    #[tokio::test]
    async fn own_echo_can_be_marked_seen() {
        let mut h = harness(false).await;
        h.engine.handle_inbound(&remote("m9", "me", "from my other tab"));

        let seen = h.engine.mark_status("m9", MessageStatus::Seen).unwrap();
        assert_eq!(seen.status, MessageStatus::Seen);
        assert_eq!(h.engine.messages()[0].status, MessageStatus::Seen);
        assert_eq!(h.engine.database().message_count().unwrap(), 0);

        assert!(matches!(
            h.engine.mark_status("m9", MessageStatus::Delivered),
            Err(SyncError::Store(StoreError::InvalidTransition { .. }))
        ));
        assert!(matches!(
            h.engine.mark_status("unknown", MessageStatus::Seen),
            Err(SyncError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn hydrate_from_store() {
        let mut h = harness(false).await;
        h.engine.handle_inbound(&remote("m1", "u2", "one"));
        h.engine.handle_inbound(&remote("m2", "u2", "two"));
        h.engine.delete_message("m1").unwrap();

        assert_eq!(h.engine.load_from_store().unwrap(), 1);
        assert_eq!(h.engine.messages()[0].id, "m2");
    }
}
