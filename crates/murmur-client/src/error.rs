use thiserror::Error;

/// Errors surfaced by the chat client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the credential. Definitive: the caller should
    /// drop it and sign in again.
    #[error("Not authorized")]
    Unauthorized,

    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Push connection error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// The operation needs a signed-in, ready session.
    #[error("Client is not ready")]
    NotReady,
}

impl ClientError {
    /// Whether retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(_) | ClientError::Socket(_) => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
