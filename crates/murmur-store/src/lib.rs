//! # murmur-store
//!
//! Durable storage for Murmur, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the append-only
//! message log and the public profile table. Async callers are expected to
//! run these on a blocking thread.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
