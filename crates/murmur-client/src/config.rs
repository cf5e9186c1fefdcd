//! Client configuration.
//!
//! One `ClientConfig` describes where the server lives. Credentials are not
//! part of it: every call takes its own [`Credentials`](crate::Credentials).

use std::time::Duration;

use reqwest::Url;

use murmur_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_IDENTITY_HEADER, HANDSHAKE_IDENTITY_PARAM};
use murmur_shared::UserId;

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://localhost:5000`
    pub base_url: String,

    /// Upper bound for a single REST call
    pub timeout: Duration,

    /// Header carrying the caller's identity on REST calls
    pub identity_header: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            timeout: Duration::from_secs(10),
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_identity_header(mut self, header: impl Into<String>) -> Self {
        self.identity_header = header.into();
        self
    }

    fn base(&self) -> Result<Url, ClientError> {
        Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", self.base_url)))
    }

    /// REST endpoint made of `segments` under the base URL. Each segment is
    /// percent-encoded on its own, so an identity can never leave its slot.
    pub fn http_url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base()?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Push endpoint for `identity`: `ws(s)://<host>/ws?userId=<identity>`.
    pub fn ws_url(&self, identity: &UserId) -> Result<String, ClientError> {
        let mut url = self.base()?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ClientError::InvalidUrl(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl(self.base_url.clone()))?;
        url.set_path("/ws");
        url.query_pairs_mut()
            .clear()
            .append_pair(HANDSHAKE_IDENTITY_PARAM, identity.as_str());

        Ok(url.to_string())
    }
}
