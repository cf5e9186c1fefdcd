//! One signed-in chat session.
//!
//! `ChatClient` walks `Unauthenticated -> Initializing -> Ready`. Nothing
//! that depends on the caller's identity (user list, history, push) is
//! touched before the auth check has answered. Push events are applied by a
//! background pump that holds the only [`Subscription`].

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_shared::constants::CLOSE_SUPERSEDED;
use murmur_shared::{ClientEvent, Message, MessageContent, Profile, ProfileUpdate, UserId};

use crate::api::{ApiClient, Credentials};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::socket::{PushConnection, Subscription};
use crate::state::{ChatState, FollowUp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    Initializing,
    Ready,
}

/// User-facing notification. Replaces toast popups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Error(String),
}

pub type NoticeReceiver = mpsc::UnboundedReceiver<Notice>;

/// Pieces the push pump shares with the client.
#[derive(Clone)]
struct Shared {
    api: ApiClient,
    state: Arc<Mutex<ChatState>>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn fail(&self, context: &str, err: &ClientError) {
        warn!(error = %err, "{context}");
        let text = match err {
            ClientError::Api { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        };
        self.notify(Notice::Error(text));
    }
}

pub struct ChatClient {
    shared: Shared,
    phase: Phase,
    credentials: Option<Credentials>,
    push: Option<PushConnection>,
    pump: Option<JoinHandle<()>>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<(Self, NoticeReceiver), ClientError> {
        let (notices, rx) = mpsc::unbounded_channel();
        let client = Self {
            shared: Shared {
                api: ApiClient::new(config)?,
                state: Arc::new(Mutex::new(ChatState::new())),
                notices,
            },
            phase: Phase::Unauthenticated,
            credentials: None,
            push: None,
            pump: None,
        };
        Ok((client, rx))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Copy of the local state, for rendering.
    pub fn snapshot(&self) -> ChatState {
        self.shared.state().clone()
    }

    pub fn is_push_connected(&self) -> bool {
        self.push.as_ref().is_some_and(|p| !p.is_closed())
    }

    /// Run the auth check for `creds` and, on success, bring the session
    /// up. A 401 drops the credential. Any other failure keeps it so the
    /// caller can retry.
    pub async fn sign_in(&mut self, creds: Credentials) -> Result<Profile, ClientError> {
        if self.credentials.as_ref().is_some_and(|c| c != &creds) {
            self.sign_out().await;
        }
        self.phase = Phase::Initializing;
        self.credentials = Some(creds.clone());

        let me = match self.shared.api.check_auth(&creds).await {
            Ok(me) => me,
            Err(ClientError::Unauthorized) => {
                self.credentials = None;
                self.phase = Phase::Unauthenticated;
                self.shared.notify(Notice::Error("Please sign in again".to_string()));
                return Err(ClientError::Unauthorized);
            }
            Err(e) => {
                self.shared.fail("Auth check failed", &e);
                return Err(e);
            }
        };

        self.shared.state().set_me(me.clone());
        self.phase = Phase::Ready;
        info!(user = %me.id, "Session ready");

        self.enter_ready().await;
        Ok(me)
    }

    /// Create the caller's profile, sign in, and announce the new user to
    /// everyone else.
    pub async fn sign_up(
        &mut self,
        creds: Credentials,
        profile: ProfileUpdate,
    ) -> Result<Profile, ClientError> {
        if let Err(e) = self.shared.api.update_profile(&creds, &profile).await {
            self.shared.fail("Sign-up failed", &e);
            return Err(e);
        }
        let me = self.sign_in(creds).await?;
        self.announce(ClientEvent::PeerCreated(me.clone()));
        self.shared.notify(Notice::Info("Account created".to_string()));
        Ok(me)
    }

    /// Save the caller's profile and tell other clients about it.
    pub async fn update_profile(&mut self, update: ProfileUpdate) -> Result<Profile, ClientError> {
        let creds = self.ready_credentials()?;
        let me = match self.shared.api.update_profile(&creds, &update).await {
            Ok(me) => me,
            Err(e) => {
                self.shared.fail("Profile update failed", &e);
                return Err(e);
            }
        };

        self.shared.state().set_me(me.clone());
        self.announce(ClientEvent::PeerUpdated(me.clone()));
        self.shared.notify(Notice::Info("Profile updated".to_string()));
        Ok(me)
    }

    /// Open the conversation with `peer`: clear its badge, then fetch the
    /// history (which marks it seen on the server).
    pub async fn select_conversation(&mut self, peer: UserId) -> Result<(), ClientError> {
        let creds = self.ready_credentials()?;
        self.shared.state().select(peer.clone());

        match self.shared.api.history(&creds, &peer).await {
            Ok(messages) => {
                let count = messages.len();
                if self.shared.state().set_history(&peer, messages) {
                    debug!(peer = %peer, count, "History loaded");
                }
                Ok(())
            }
            Err(e) => {
                self.shared.fail("Failed to load messages", &e);
                Err(e)
            }
        }
    }

    pub fn close_conversation(&mut self) {
        self.shared.state().deselect();
    }

    /// Send to the open conversation. The persisted message is appended
    /// locally once the server has accepted it.
    pub async fn send_message(&mut self, content: MessageContent) -> Result<Message, ClientError> {
        let creds = self.ready_credentials()?;
        let peer = self
            .shared
            .state()
            .selected()
            .cloned()
            .ok_or(ClientError::NotReady)?;

        match self.shared.api.send_message(&creds, &peer, &content).await {
            Ok(message) => {
                self.shared.state().push_sent(message.clone());
                Ok(message)
            }
            Err(e) => {
                self.shared.fail("Failed to send message", &e);
                Err(e)
            }
        }
    }

    /// Network came back: resync the user list and reopen the push
    /// connection if it died. History is not replayed.
    pub async fn on_network_online(&mut self) -> Result<(), ClientError> {
        self.resync().await
    }

    /// Window regained focus. Same resync as coming back online.
    pub async fn on_focus(&mut self) -> Result<(), ClientError> {
        self.resync().await
    }

    /// Close the push connection and drop every piece of local state.
    pub async fn sign_out(&mut self) {
        self.stop_push().await;
        self.shared.state().clear();
        self.credentials = None;
        self.phase = Phase::Unauthenticated;
        info!("Signed out");
    }

    async fn resync(&mut self) -> Result<(), ClientError> {
        let creds = self.ready_credentials()?;
        if !self.is_push_connected() && !self.was_superseded() {
            self.open_push(&creds).await;
        }
        self.load_users(&creds).await
    }

    async fn enter_ready(&mut self) {
        let Some(creds) = self.credentials.clone() else {
            return;
        };

        if !self.is_push_connected() {
            self.open_push(&creds).await;
        }

        let loaded = self.shared.state().users_loaded();
        if !loaded {
            // Failure already surfaced as a notice; the next resync retries.
            let _ = self.load_users(&creds).await;
        }
    }

    async fn load_users(&self, creds: &Credentials) -> Result<(), ClientError> {
        match self.shared.api.users(creds).await {
            Ok(page) => {
                let count = page.users.len();
                self.shared.state().load_users(page.users, page.unseen_messages);
                debug!(count, "User list loaded");
                Ok(())
            }
            Err(e) => {
                self.shared.fail("Failed to load users", &e);
                Err(e)
            }
        }
    }

    async fn open_push(&mut self, creds: &Credentials) {
        self.stop_push().await;

        let connection =
            match PushConnection::connect(self.shared.api.config(), creds.identity()).await {
                Ok(c) => c,
                Err(e) => {
                    self.shared.fail("Push connection failed", &e);
                    return;
                }
            };

        let subscription = connection.subscribe();
        self.pump = Some(tokio::spawn(pump(
            subscription,
            self.shared.clone(),
            creds.clone(),
        )));
        self.push = Some(connection);
    }

    async fn stop_push(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(push) = self.push.take() {
            push.close().await;
        }
    }

    fn was_superseded(&self) -> bool {
        self.push
            .as_ref()
            .and_then(|p| p.close_code())
            .is_some_and(|code| code == CLOSE_SUPERSEDED)
    }

    fn announce(&self, event: ClientEvent) {
        match self.push.as_ref() {
            Some(push) => {
                if let Err(e) = push.send(&event) {
                    warn!(error = %e, "Failed to announce profile change");
                }
            }
            None => debug!("No push connection, profile change not announced"),
        }
    }

    fn ready_credentials(&self) -> Result<Credentials, ClientError> {
        match (self.phase, self.credentials.as_ref()) {
            (Phase::Ready, Some(creds)) => Ok(creds.clone()),
            _ => Err(ClientError::NotReady),
        }
    }
}

/// Apply push events to the local state until the subscription ends.
async fn pump(mut subscription: Subscription, shared: Shared, creds: Credentials) {
    while let Some(event) = subscription.recv().await {
        let follow_up = shared.state().apply(event);

        if let FollowUp::MarkSeen(id) = follow_up {
            match shared.api.mark_seen(&creds, id).await {
                Ok(message) => shared.state().mark_local_seen(message.id),
                Err(e) => shared.fail("Failed to mark message seen", &e),
            }
        }
    }
    debug!(user = %creds.identity(), "Push stream ended");
}
