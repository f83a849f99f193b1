//! HTTP and websocket endpoints.
//!
//! - `GET /ws[?topics=a,b]` upgrades to a relay connection.
//! - `GET /health` reports liveness and the connection count.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::constants::{TOPIC_CHAT, TOPIC_USER};
use parley_shared::{PresenceEvent, WireEvent, WireFormat};

use crate::config::{parse_topics, RelayConfig};
use crate::error::RelayError;
use crate::hub::Hub;

#[derive(Clone)]
struct RelayState {
    hub: Hub,
    config: Arc<RelayConfig>,
}

/// Build the relay router on top of `hub`.
pub fn router(hub: Hub, config: RelayConfig) -> Router {
    let state = RelayState {
        hub,
        config: Arc::new(config),
    };

    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the relay on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, config: RelayConfig) -> Result<(), RelayError> {
    serve_with(listener, config, Hub::new()).await
}

/// Like [`serve`], sharing `hub` with the caller.
pub async fn serve_with(
    listener: TcpListener,
    config: RelayConfig,
    hub: Hub,
) -> Result<(), RelayError> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, topics = ?config.default_topics, "relay listening");
    axum::serve(listener, router(hub, config)).await?;
    Ok(())
}

async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.connection_count().await,
    }))
}

async fn ws_upgrade(
    State(state): State<RelayState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let topics = params
        .get("topics")
        .map(|raw| parse_topics(raw))
        .filter(|topics| !topics.is_empty())
        .unwrap_or_else(|| state.config.default_topics.clone());

    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, topics))
}

/// Lifetime of one relay connection from join to leave.
async fn handle_socket(socket: WebSocket, hub: Hub, topics: Vec<String>) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<String>();

    // Publishing skips the sender, so only the others hear the join.
    hub.subscribe(conn_id, &topics, outbox).await;
    announce(&hub, conn_id, PresenceEvent::join(conn_id.to_string())).await;
    info!(conn = %conn_id, topics = ?topics, "peer connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = inbox.recv().await {
            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    let forward_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let delivered = forward_hub.publish(conn_id, TOPIC_CHAT, &text).await;
                    debug!(conn = %conn_id, len = text.len(), delivered, "forwarded");
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Binary(_)) => {
                    warn!(conn = %conn_id, "ignoring binary frame");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(conn = %conn_id, error = %e, "websocket read error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unsubscribe(conn_id).await;
    announce(&hub, conn_id, PresenceEvent::leave(conn_id.to_string())).await;
    info!(conn = %conn_id, "peer disconnected");
}

async fn announce(hub: &Hub, conn_id: Uuid, event: PresenceEvent) {
    match WireEvent::Presence(event).encode(WireFormat::Legacy) {
        Ok(payload) => {
            hub.publish(conn_id, TOPIC_USER, &payload).await;
        }
        Err(e) => warn!(error = %e, "failed to encode presence"),
    }
}
