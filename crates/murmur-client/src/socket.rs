//! Client side of the push connection.
//!
//! One background task owns the WebSocket. Incoming push events are fanned
//! out to every live [`Subscription`]; outgoing client events go through an
//! unbounded queue. When the socket ends, all subscriptions see `None`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use murmur_shared::{ClientEvent, PushEvent, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long `close` waits for the server to acknowledge.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Hub {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<PushEvent>>>,
    next_id: AtomicU64,
}

impl Hub {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<PushEvent>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(id, tx);
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    fn dispatch(&self, event: &PushEvent) -> usize {
        let mut subs = self.lock();
        subs.retain(|_, tx| tx.send(event.clone()).is_ok());
        subs.len()
    }

    fn close_all(&self) {
        self.lock().clear();
    }
}

/// A live registration for push events. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<PushEvent>,
    hub: Weak<Hub>,
}

impl Subscription {
    /// Next event, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.lock().remove(&self.id);
        }
    }
}

pub struct PushConnection {
    identity: UserId,
    outbound: mpsc::UnboundedSender<WsMessage>,
    hub: Arc<Hub>,
    close_code: Arc<OnceLock<u16>>,
    task: JoinHandle<()>,
}

impl PushConnection {
    /// Open the push connection for `identity`.
    pub async fn connect(config: &ClientConfig, identity: &UserId) -> Result<Self, ClientError> {
        let url = config.ws_url(identity)?;
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;

        let hub = Arc::new(Hub::default());
        let close_code = Arc::new(OnceLock::new());
        let (outbound, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_socket(
            ws,
            rx,
            hub.clone(),
            close_code.clone(),
            identity.clone(),
        ));

        info!(user = %identity, "Push connection opened");

        Ok(Self {
            identity: identity.clone(),
            outbound,
            hub,
            close_code,
            task,
        })
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Queue a client event for the server to relay to everyone else.
    pub fn send(&self, event: &ClientEvent) -> Result<(), ClientError> {
        let text = event.to_json()?;
        self.outbound
            .send(WsMessage::Text(text))
            .map_err(|_| ClientError::NotReady)
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Close code the server sent, if it closed the connection.
    pub fn close_code(&self) -> Option<u16> {
        self.close_code.get().copied()
    }

    /// Close politely and wait briefly for the socket task to finish.
    pub async fn close(mut self) {
        let _ = self.outbound.send(WsMessage::Close(None));
        if tokio::time::timeout(CLOSE_GRACE, &mut self.task).await.is_err() {
            self.task.abort();
        }
        self.hub.close_all();
        debug!(user = %self.identity, "Push connection closed");
    }
}

async fn run_socket(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    hub: Arc<Hub>,
    close_code: Arc<OnceLock<u16>>,
    identity: UserId,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match PushEvent::from_json(&text) {
                    Ok(event) => {
                        debug!(user = %identity, kind = event.kind(), "Push event");
                        hub.dispatch(&event);
                    }
                    Err(e) => warn!(user = %identity, error = %e, "Unparsable push event"),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    if let Some(ref f) = frame {
                        let _ = close_code.set(u16::from(f.code));
                    }
                    info!(user = %identity, reason = ?frame, "Server closed push connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(user = %identity, error = %e, "Push connection error");
                    break;
                }
                None => break,
            },
            out = outbound.recv() => {
                let msg = out.unwrap_or(WsMessage::Close(None));
                let closing = matches!(msg, WsMessage::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
        }
    }

    hub.close_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(ids: &[&str]) -> PushEvent {
        PushEvent::PresenceSet(ids.iter().map(|s| UserId::from(*s)).collect())
    }

    #[tokio::test]
    async fn every_subscriber_gets_each_event() {
        let hub = Arc::new(Hub::default());
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.dispatch(&presence(&["x"])), 2);
        assert_eq!(a.recv().await, Some(presence(&["x"])));
        assert_eq!(b.recv().await, Some(presence(&["x"])));
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes() {
        let hub = Arc::new(Hub::default());
        let mut kept = hub.subscribe();
        let dropped = hub.subscribe();

        dropped.unsubscribe();
        assert_eq!(hub.lock().len(), 1);

        assert_eq!(hub.dispatch(&presence(&[])), 1);
        assert_eq!(kept.recv().await, Some(presence(&[])));
    }

    #[tokio::test]
    async fn close_all_ends_every_stream() {
        let hub = Arc::new(Hub::default());
        let mut sub = hub.subscribe();
        hub.close_all();
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn subscription_outliving_hub_is_harmless() {
        let hub = Arc::new(Hub::default());
        let sub = hub.subscribe();
        drop(hub);
        drop(sub);
    }
}
