//! WebSocket push connections, one actor per connection.
//!
//! The handshake carries the identity as `?userId=`. A valid handshake gets
//! a [`ConnectionHandle`] registered in the session registry; the socket is
//! split into a reader loop (client events) and a writer task draining the
//! handle's queue. When the reader loop ends, for whatever reason, the handle
//! is unregistered before anything else happens.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use murmur_shared::constants::CLOSE_INVALID_IDENTITY;
use murmur_shared::{ClientEvent, UserId};

use crate::registry::{ConnectionHandle, Outgoing};
use crate::state::AppState;

/// Server pings every 30 seconds to keep intermediaries from dropping us.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A connection that sends nothing (not even a pong) for this long is dead.
const IDLE_TIMEOUT: Duration = Duration::from_secs(70);

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// GET /ws?userId=<identity>
///
/// Handshakes without a usable identity are upgraded and immediately closed
/// with code 4002; they are never registered.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match params.user_id.as_deref().map(UserId::parse) {
        Some(Ok(identity)) => {
            debug!(user = %identity, "WebSocket handshake accepted");
            ws.on_upgrade(move |socket| run_connection(socket, state, identity))
        }
        _ => {
            warn!(raw = ?params.user_id, "WebSocket handshake without valid identity");
            ws.on_upgrade(|mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_INVALID_IDENTITY,
                        reason: "Missing or invalid identity".into(),
                    })))
                    .await;
            })
        }
    }
}

/// Drive one registered connection until either side ends it.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: UserId) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (handle, rx) = ConnectionHandle::new(identity.clone());

    let mut writer = tokio::spawn(writer_task(ws_sender, rx));
    state.registry.register(handle.clone()).await;

    info!(user = %identity, conn = %handle.id(), "WebSocket actor started");

    loop {
        tokio::select! {
            frame = timeout(IDLE_TIMEOUT, ws_receiver.next()) => match frame {
                Err(_) => {
                    warn!(user = %identity, conn = %handle.id(), "Connection idle, closing");
                    break;
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    handle_client_text(&state, &handle, &text).await;
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    info!(user = %identity, reason = ?frame, "Client initiated close");
                    break;
                }
                Ok(Some(Ok(Message::Binary(_)))) => {
                    debug!(user = %identity, "Ignoring binary frame");
                }
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
                Ok(Some(Err(e))) => {
                    warn!(user = %identity, error = %e, "WebSocket receive error");
                    break;
                }
                Ok(None) => {
                    info!(user = %identity, "WebSocket stream ended");
                    break;
                }
            },
            _ = &mut writer => {
                debug!(user = %identity, conn = %handle.id(), "Writer finished");
                break;
            }
        }
    }

    state.registry.unregister(&handle).await;
    writer.abort();

    info!(user = %identity, conn = %handle.id(), "WebSocket actor stopped");
}

async fn handle_client_text(state: &AppState, handle: &ConnectionHandle, text: &str) {
    match ClientEvent::from_json(text) {
        Ok(event) => {
            let push = event.into_push();
            state.registry.relay_from(handle, push).await;
        }
        Err(e) => {
            debug!(
                user = %handle.identity(),
                error = %e,
                "Ignoring malformed client event: {}",
                text.chars().take(100).collect::<String>()
            );
        }
    }
}

/// Forwards queued events to the socket, and pings on an interval.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    let mut ping = interval(PING_INTERVAL);
    // Skip the first immediate tick
    ping.tick().await;

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Event(event)) => {
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(kind = event.kind(), error = %e, "Failed to encode push event");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close { code, reason }) => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}
