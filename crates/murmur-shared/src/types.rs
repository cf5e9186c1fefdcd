use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MurmurError;

/// Values some clients put in the handshake when they have no identity yet.
const SENTINEL_IDS: &[&str] = &["undefined", "null"];

// User identity = primary key of the account record, owned by the auth layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Parse an identity coming from an untrusted place (query string,
    /// header). Rejects empty values and the JS sentinel strings.
    pub fn parse(raw: &str) -> Result<Self, MurmurError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || SENTINEL_IDS.contains(&trimmed) {
            return Err(MurmurError::InvalidIdentity(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_sentinels() {
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("   ").is_err());
        assert!(UserId::parse("undefined").is_err());
        assert!(UserId::parse("null").is_err());
        assert_eq!(UserId::parse(" alice ").unwrap().as_str(), "alice");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&UserId::from("u1")).unwrap();
        assert_eq!(json, "\"u1\"");
    }
}
