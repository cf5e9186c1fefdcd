//! REST calls against the Murmur server.
//!
//! The underlying `reqwest::Client` carries no default headers. Each call
//! attaches the credential it was given, so two sessions can share one
//! `ApiClient` without leaking identity into each other's requests.

use std::collections::HashMap;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use murmur_shared::{Message, MessageContent, MessageId, Profile, ProfileUpdate, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// The identity a single call is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    identity: UserId,
}

impl Credentials {
    pub fn new(identity: UserId) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }
}

/// Sidebar data: every other user plus unseen counts per sender.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersPage {
    pub users: Vec<Profile>,
    #[serde(default)]
    pub unseen_messages: HashMap<UserId, u32>,
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: Profile,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    messages: Vec<Message>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMessageEnvelope {
    new_message: Message,
}

#[derive(Deserialize)]
struct MessageEnvelope {
    message: Message,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// GET /api/auth/check
    pub async fn check_auth(&self, creds: &Credentials) -> Result<Profile, ClientError> {
        let req = self.http.get(self.config.http_url(&["api", "auth", "check"])?);
        let env: UserEnvelope = self.send(req, creds).await?;
        Ok(env.user)
    }

    /// PUT /api/auth/profile
    pub async fn update_profile(
        &self,
        creds: &Credentials,
        update: &ProfileUpdate,
    ) -> Result<Profile, ClientError> {
        let req = self
            .http
            .put(self.config.http_url(&["api", "auth", "profile"])?)
            .json(update);
        let env: UserEnvelope = self.send(req, creds).await?;
        Ok(env.user)
    }

    /// GET /api/messages/users
    pub async fn users(&self, creds: &Credentials) -> Result<UsersPage, ClientError> {
        let req = self.http.get(self.config.http_url(&["api", "messages", "users"])?);
        self.send(req, creds).await
    }

    /// GET /api/messages/:peer. The server marks the peer's messages seen.
    pub async fn history(
        &self,
        creds: &Credentials,
        peer: &UserId,
    ) -> Result<Vec<Message>, ClientError> {
        let url = self.config.http_url(&["api", "messages", peer.as_str()])?;
        let env: MessagesEnvelope = self.send(self.http.get(url), creds).await?;
        Ok(env.messages)
    }

    /// POST /api/messages/send/:receiver
    pub async fn send_message(
        &self,
        creds: &Credentials,
        receiver: &UserId,
        content: &MessageContent,
    ) -> Result<Message, ClientError> {
        let url = self.config.http_url(&["api", "messages", "send", receiver.as_str()])?;
        let env: NewMessageEnvelope = self.send(self.http.post(url).json(content), creds).await?;
        Ok(env.new_message)
    }

    /// PUT /api/messages/mark/:id
    pub async fn mark_seen(
        &self,
        creds: &Credentials,
        id: MessageId,
    ) -> Result<Message, ClientError> {
        let url = self.config.http_url(&["api", "messages", "mark", &id.to_string()])?;
        let env: MessageEnvelope = self.send(self.http.put(url), creds).await?;
        Ok(env.message)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        creds: &Credentials,
    ) -> Result<T, ClientError> {
        let resp = req
            .header(self.config.identity_header.as_str(), creds.identity().as_str())
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }

        let message = resp
            .json::<ErrorBody>()
            .await
            .map(|b| b.message)
            .unwrap_or_default();
        debug!(status = status.as_u16(), %message, "Request failed");

        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
