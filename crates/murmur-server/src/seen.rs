//! Seen-state reconciliation.
//!
//! Seen flags only move false → true. Bulk marking happens when the
//! receiver fetches a conversation; single marking covers messages that
//! arrive live while the conversation is open.

use std::collections::HashMap;

use tracing::debug;

use murmur_shared::{Message, MessageId, UserId};

use crate::db::{with_db, Db};
use crate::error::ServerError;

#[derive(Clone)]
pub struct SeenReconciler {
    db: Db,
}

impl SeenReconciler {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Conversation between `viewer` and `peer`, oldest first, with every
    /// message `peer` sent to `viewer` marked seen.
    pub async fn fetch_history(
        &self,
        viewer: &UserId,
        peer: &UserId,
    ) -> Result<Vec<Message>, ServerError> {
        let (v, p) = (viewer.clone(), peer.clone());
        let (messages, marked) =
            with_db(&self.db, move |db| db.fetch_history_marking_seen(&v, &p)).await?;

        debug!(
            viewer = %viewer,
            peer = %peer,
            count = messages.len(),
            marked,
            "Fetched conversation history"
        );
        Ok(messages)
    }

    /// Mark one message seen on behalf of its receiver.
    pub async fn mark_seen(
        &self,
        viewer: &UserId,
        message_id: MessageId,
    ) -> Result<Message, ServerError> {
        let v = viewer.clone();
        with_db(&self.db, move |db| db.mark_message_seen(message_id, &v))
            .await
            .map_err(|e| match e {
                ServerError::NotFound(_) => ServerError::NotFound("Message not found".to_string()),
                other => other,
            })
    }

    /// Unseen messages addressed to `viewer`, per sender.
    pub async fn unseen_counts(&self, viewer: &UserId) -> Result<HashMap<UserId, u32>, ServerError> {
        let v = viewer.clone();
        with_db(&self.db, move |db| db.unseen_counts(&v)).await
    }
}
