//! # murmur-server
//!
//! Real-time core of the Murmur direct-messaging service.
//!
//! - **Session registry**: one live push connection per identity
//! - **Presence**: the online set, re-broadcast on every registry change
//! - **Delivery router**: persist a message, then push it if the receiver
//!   is online
//! - **Seen reconciler**: seen flags and unseen counts
//! - **REST + WebSocket API** (axum)

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod presence;
pub mod registry;
pub mod router;
pub mod seen;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use error::{DeliveryError, ServerError};
pub use state::AppState;
