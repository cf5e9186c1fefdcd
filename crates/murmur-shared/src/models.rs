//! Domain models shared by the server, the store and the client.
//!
//! Every struct serializes in camelCase so the JSON matches what browser
//! clients already expect on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_TEXT_LEN;
use crate::error::ContentError;
use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A persisted direct message. Only `seen` ever changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Reference (URL) to an image held by the external media store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Send payload
// ---------------------------------------------------------------------------

/// Body of a send request, as received from the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Content that passed validation: at least one field is non-empty and
/// blank fields are normalised to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidContent {
    pub text: Option<String>,
    pub image: Option<String>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            text: None,
            image: Some(url.into()),
        }
    }

    pub fn validate(self) -> Result<ValidContent, ContentError> {
        let text = non_blank(self.text);
        let image = non_blank(self.image);

        if text.is_none() && image.is_none() {
            return Err(ContentError::Empty);
        }

        if let Some(ref t) = text {
            let len = t.chars().count();
            if len > MAX_TEXT_LEN {
                return Err(ContentError::TextTooLong {
                    len,
                    max: MAX_TEXT_LEN,
                });
            }
        }

        Ok(ValidContent { text, image })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Public profile of an account, as shown in the peer list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a user may change on their own profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub profile_pic: Option<String>,
}
