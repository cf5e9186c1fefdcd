//! Message delivery: persist first, then push live if the receiver is
//! connected.
//!
//! Persistence is the only success criterion. The live push is at-most-once
//! and best-effort; a receiver that misses it sees the message on its next
//! history fetch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use murmur_shared::{Message, MessageContent, PushEvent, UserId};

use crate::db::{with_db, Db};
use crate::error::ServerError;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct DeliveryRouter {
    db: Db,
    registry: Arc<SessionRegistry>,
}

impl DeliveryRouter {
    pub fn new(db: Db, registry: Arc<SessionRegistry>) -> Self {
        Self { db, registry }
    }

    /// Validate, persist and deliver one message. Returns the persisted
    /// message whether or not the live push went through.
    pub async fn send(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: MessageContent,
    ) -> Result<Message, ServerError> {
        let content = content
            .validate()
            .map_err(|e| ServerError::Validation(e.to_string()))?;

        if sender == receiver {
            return Err(ServerError::Validation(
                "Cannot send a message to yourself".to_string(),
            ));
        }

        let receiver_known = {
            let receiver = receiver.clone();
            with_db(&self.db, move |db| db.profile_exists(&receiver)).await?
        };
        if !receiver_known {
            return Err(ServerError::NotFound("Receiver not found".to_string()));
        }

        let message = {
            let (sender, receiver) = (sender.clone(), receiver.clone());
            with_db(&self.db, move |db| db.insert_message(&sender, &receiver, &content)).await?
        };

        info!(
            msg_id = %message.id,
            sender = %message.sender_id,
            receiver = %message.receiver_id,
            "Message persisted"
        );

        self.deliver(&message).await;
        Ok(message)
    }

    /// Push an already persisted message to its receiver, if online.
    /// Returns whether the push was handed to a live connection.
    pub async fn deliver(&self, message: &Message) -> bool {
        let Some(handle) = self.registry.lookup(&message.receiver_id).await else {
            debug!(
                msg_id = %message.id,
                receiver = %message.receiver_id,
                "Receiver offline, message waits for next fetch"
            );
            return false;
        };

        match handle.push(PushEvent::MessageCreated(message.clone())) {
            Ok(()) => {
                debug!(msg_id = %message.id, conn = %handle.id(), "Message pushed live");
                true
            }
            Err(e) => {
                warn!(
                    msg_id = %message.id,
                    receiver = %message.receiver_id,
                    error = %e,
                    "Live push failed, receiver will catch up on next fetch"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::registry::{ConnectionHandle, Outgoing};
    use murmur_shared::ProfileUpdate;

    async fn setup() -> (DeliveryRouter, Arc<SessionRegistry>, Db) {
        let db = db::open_in_memory().unwrap();
        for name in ["alice", "bob"] {
            let id = UserId::from(name);
            with_db(&db, move |d| {
                d.upsert_profile(
                    &id,
                    &ProfileUpdate {
                        full_name: name.to_string(),
                        bio: String::new(),
                        profile_pic: None,
                    },
                )
            })
            .await
            .unwrap();
        }
        let registry = Arc::new(SessionRegistry::new());
        (DeliveryRouter::new(db.clone(), registry.clone()), registry, db)
    }

    fn message_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Outgoing>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Outgoing::Event(PushEvent::MessageCreated(m)) = msg {
                out.push(m);
            }
        }
        out
    }

    #[tokio::test]
    async fn empty_payload_is_rejected_before_persisting() {
        let (router, _, db) = setup().await;
        let (a, b) = (UserId::from("alice"), UserId::from("bob"));

        let err = router.send(&a, &b, MessageContent::default()).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        let stored = with_db(&db, move |d| d.get_conversation(&a, &b)).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn unknown_receiver_and_self_send() {
        let (router, _, _) = setup().await;
        let a = UserId::from("alice");

        let err = router
            .send(&a, &UserId::from("nobody"), MessageContent::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        let err = router.send(&a, &a, MessageContent::text("hi")).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn offline_receiver_still_gets_persisted_message() {
        let (router, _, _) = setup().await;
        let (a, b) = (UserId::from("alice"), UserId::from("bob"));

        let msg = router.send(&a, &b, MessageContent::text("hi")).await.unwrap();
        assert!(!msg.seen);
        assert_eq!(msg.text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn online_receiver_gets_push() {
        let (router, registry, _) = setup().await;
        let (a, b) = (UserId::from("alice"), UserId::from("bob"));
        let (handle, mut rx) = ConnectionHandle::new(b.clone());
        registry.register(handle).await;

        let msg = router.send(&a, &b, MessageContent::text("hey")).await.unwrap();
        assert_eq!(message_events(&mut rx), vec![msg]);
    }

    #[tokio::test]
    async fn push_failure_is_swallowed() {
        let (router, registry, _) = setup().await;
        let (a, b) = (UserId::from("alice"), UserId::from("bob"));
        let (handle, rx) = ConnectionHandle::new(b.clone());
        registry.register(handle.clone()).await;
        drop(rx);

        let msg = router.send(&a, &b, MessageContent::text("lost push")).await.unwrap();
        assert!(!router.deliver(&msg).await);
    }
}
