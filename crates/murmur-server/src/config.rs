//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use murmur_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_IDENTITY_HEADER};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) server, REST and WebSocket.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./murmur.db`
    pub database_path: PathBuf,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Request header in which the upstream auth layer places the verified
    /// identity. Lower-cased.
    /// Env: `IDENTITY_HEADER`
    /// Default: `x-user-id`
    pub identity_header: String,

    /// Origins allowed by CORS. Empty means any origin.
    /// Env: `ALLOWED_ORIGINS` (comma-separated)
    pub allowed_origins: Vec<String>,

    /// Maximum accepted request body in bytes.
    /// Env: `MAX_BODY_BYTES`
    /// Default: 10 MiB
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./murmur.db"),
            instance_name: "Murmur".to_string(),
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            allowed_origins: Vec::new(),
            max_body_bytes: 10 * 1024 * 1024, // 10 MiB
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = get("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(name) = get("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(header) = get("IDENTITY_HEADER") {
            let header = header.trim().to_ascii_lowercase();
            if !header.is_empty() {
                config.identity_header = header;
            }
        }

        if let Some(origins) = get("ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }

        if let Some(val) = get("MAX_BODY_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_body_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BODY_BYTES, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
