use serde::{Deserialize, Serialize};

use crate::models::{Message, Profile};
use crate::types::UserId;

/// Events pushed from the server to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PushEvent {
    /// Complete set of online identities. Replaces whatever the client had.
    PresenceSet(Vec<UserId>),

    /// A message addressed to the receiving client was persisted
    MessageCreated(Message),

    /// Another user signed up
    PeerCreated(Profile),

    /// Another user changed their profile
    PeerUpdated(Profile),
}

/// Events a client may send over its push connection. They only notify:
/// the change itself has already been persisted through REST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    PeerCreated(Profile),
    PeerUpdated(Profile),
}

impl ClientEvent {
    /// The push event relayed verbatim to every other connection.
    pub fn into_push(self) -> PushEvent {
        match self {
            ClientEvent::PeerCreated(p) => PushEvent::PeerCreated(p),
            ClientEvent::PeerUpdated(p) => PushEvent::PeerUpdated(p),
        }
    }
}

impl PushEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PushEvent::PresenceSet(_) => "presence-set",
            PushEvent::MessageCreated(_) => "message-created",
            PushEvent::PeerCreated(_) => "peer-created",
            PushEvent::PeerUpdated(_) => "peer-updated",
        }
    }
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}
