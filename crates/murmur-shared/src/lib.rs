//! # murmur-shared
//!
//! Types shared by every Murmur crate: identities, the message and profile
//! models, and the JSON events carried over the push connection.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::{ContentError, MurmurError};
pub use models::{Message, MessageContent, Profile, ProfileUpdate, ValidContent};
pub use protocol::{ClientEvent, PushEvent};
pub use types::{MessageId, UserId};
