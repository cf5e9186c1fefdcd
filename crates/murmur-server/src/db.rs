//! Shared handle to the message store.
//!
//! `rusqlite` is synchronous, so every call runs on tokio's blocking pool
//! behind one mutex. Calls are not retried: a failure is reported to the
//! caller as-is.

use std::path::Path;
use std::sync::{Arc, Mutex};

use murmur_store::Database;

use crate::error::ServerError;

pub type Db = Arc<Mutex<Database>>;

pub fn open(path: &Path) -> Result<Db, ServerError> {
    let database = Database::open_at(path)?;
    Ok(Arc::new(Mutex::new(database)))
}

pub fn open_in_memory() -> Result<Db, ServerError> {
    let database = Database::open_in_memory()?;
    Ok(Arc::new(Mutex::new(database)))
}

/// Run `f` against the database on a blocking thread.
pub async fn with_db<T, F>(db: &Db, f: F) -> Result<T, ServerError>
where
    F: FnOnce(&mut Database) -> murmur_store::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = db
            .lock()
            .map_err(|_| ServerError::Persistence("database lock poisoned".to_string()))?;
        f(&mut guard).map_err(ServerError::from)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("blocking task failed: {e}")))?
}
