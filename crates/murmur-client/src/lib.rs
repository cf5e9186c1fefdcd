//! # murmur-client
//!
//! Client-side reconciliation for Murmur: keeps a local picture of peers,
//! unseen counts, presence and the open conversation, and merges REST
//! responses with live push events.

pub mod api;
pub mod config;
pub mod error;
pub mod session;
pub mod socket;
pub mod state;

pub use api::{ApiClient, Credentials, UsersPage};
pub use config::ClientConfig;
pub use error::ClientError;
pub use session::{ChatClient, Notice, NoticeReceiver, Phase};
pub use socket::{PushConnection, Subscription};
pub use state::{ChatState, FollowUp, PeerList};
