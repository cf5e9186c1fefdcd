use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::db::Db;
use crate::registry::SessionRegistry;
use crate::router::DeliveryRouter;
use crate::seen::SeenReconciler;

/// Shared application state passed to all handlers via axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    /// Live push connections, one per identity
    pub registry: Arc<SessionRegistry>,
    pub router: DeliveryRouter,
    pub seen: SeenReconciler,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Db, config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            router: DeliveryRouter::new(db.clone(), registry.clone()),
            seen: SeenReconciler::new(db.clone()),
            registry,
            db,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}
