//! Caller identity for REST handlers.
//!
//! Credential verification happens upstream (gateway or auth middleware).
//! By the time a request reaches us the verified identity sits in the
//! header named by `ServerConfig::identity_header`; we only read it.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use murmur_shared::UserId;

use crate::error::ServerError;
use crate::state::AppState;

/// The verified identity attached to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(state.config.identity_header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServerError::Unauthorized("No identity provided".to_string()))?;

        UserId::parse(raw)
            .map(AuthUser)
            .map_err(|_| ServerError::Unauthorized("Invalid identity".to_string()))
    }
}
