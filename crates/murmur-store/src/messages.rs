use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::params;
use uuid::Uuid;

use murmur_shared::{Message, MessageId, UserId, ValidContent};

use crate::database::Database;
use crate::error::{not_found, Result};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, image, seen, created_at";

impl Database {
    /// Append a new message. The store assigns id, timestamp and `seen = false`.
    pub fn insert_message(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        content: &ValidContent,
    ) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
            text: content.text.clone(),
            image: content.image.clone(),
            seen: false,
            created_at: now(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, text, image, seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                message.id.to_string(),
                message.sender_id.as_str(),
                message.receiver_id.as_str(),
                message.text,
                message.image,
                format_ts(&message.created_at),
            ],
        )?;

        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// All messages exchanged between `a` and `b`, oldest first.
    pub fn get_conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Load the conversation between `viewer` and `peer` and mark everything
    /// `peer` sent to `viewer` as seen, in one transaction.
    ///
    /// The returned messages reflect the state after marking.
    pub fn fetch_history_marking_seen(
        &mut self,
        viewer: &UserId,
        peer: &UserId,
    ) -> Result<(Vec<Message>, usize)> {
        let tx = self.conn_mut().transaction()?;

        let marked = tx.execute(
            "UPDATE messages SET seen = 1
             WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
            params![peer.as_str(), viewer.as_str()],
        )?;

        let messages = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![viewer.as_str(), peer.as_str()], row_to_message)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.commit()?;
        Ok((messages, marked))
    }

    /// Mark a single message seen on behalf of its receiver.
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) when the
    /// id is unknown or `viewer` is not the receiver.
    pub fn mark_message_seen(&self, id: MessageId, viewer: &UserId) -> Result<Message> {
        let affected = self.conn().execute(
            "UPDATE messages SET seen = 1 WHERE id = ?1 AND receiver_id = ?2",
            params![id.to_string(), viewer.as_str()],
        )?;
        if affected == 0 {
            return Err(crate::StoreError::NotFound);
        }
        self.get_message(id)
    }

    /// Number of unseen messages addressed to `viewer`, per sender.
    /// Senders with nothing unseen are absent from the map.
    pub fn unseen_counts(&self, viewer: &UserId) -> Result<HashMap<UserId, u32>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender_id, COUNT(*)
             FROM messages
             WHERE receiver_id = ?1 AND seen = 0
             GROUP BY sender_id",
        )?;

        let rows = stmt.query_map(params![viewer.as_str()], |row| {
            let sender: String = row.get(0)?;
            let count: u32 = row.get(1)?;
            Ok((UserId(sender), count))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (sender, count) = row?;
            counts.insert(sender, count);
        }
        Ok(counts)
    }
}

/// Current time truncated to the precision we persist, so a freshly built
/// model compares equal to the row read back.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC-3339 so that lexical order equals chronological order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_id: String = row.get(1)?;
    let receiver_id: String = row.get(2)?;
    let text: Option<String> = row.get(3)?;
    let image: Option<String> = row.get(4)?;
    let seen: bool = row.get(5)?;
    let ts_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: MessageId(id),
        sender_id: UserId(sender_id),
        receiver_id: UserId(receiver_id),
        text,
        image,
        seen,
        created_at: parse_ts(6, &ts_str)?,
    })
}
