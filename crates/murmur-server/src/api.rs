use std::collections::HashMap;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderValue, Method},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use murmur_shared::{Message, MessageContent, MessageId, Profile, ProfileUpdate, UserId};

use crate::auth::AuthUser;
use crate::db::with_db;
use crate::error::ServerError;
use crate::state::AppState;
use crate::ws::ws_upgrade;

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_upgrade))
        .route("/api/auth/check", get(auth_check))
        .route("/api/auth/profile", put(update_profile))
        .route("/api/messages/users", get(users_for_sidebar))
        .route("/api/messages/:id", get(get_messages))
        .route("/api/messages/send/:id", post(send_message))
        .route("/api/messages/mark/:id", put(mark_message_seen))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    if allowed.is_empty() {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Skipping unparsable CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online: usize,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct ProfileResponse {
    success: bool,
    user: Profile,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UsersResponse {
    success: bool,
    users: Vec<Profile>,
    unseen_messages: HashMap<UserId, u32>,
}

#[derive(Serialize)]
struct MessagesResponse {
    success: bool,
    messages: Vec<Message>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    success: bool,
    new_message: Message,
}

#[derive(Serialize)]
struct MarkSeenResponse {
    success: bool,
    message: Message,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online: state.registry.online_count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// An identity without a profile has never signed up: that is a definitive
/// auth failure, not a missing resource.
async fn auth_check(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<ProfileResponse>, ServerError> {
    let user = with_db(&state.db, move |db| db.get_profile(&me))
        .await
        .map_err(|e| match e {
            ServerError::NotFound(_) => ServerError::Unauthorized("User not found".to_string()),
            other => other,
        })?;
    Ok(Json(ProfileResponse {
        success: true,
        user,
    }))
}

/// Create or update the caller's public profile. Other clients learn about
/// the change from the caller's own `peer-created` / `peer-updated` event.
async fn update_profile(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ProfileResponse>, ServerError> {
    if update.full_name.trim().is_empty() || update.bio.trim().is_empty() {
        return Err(ServerError::Validation(
            "Full name and bio are required".to_string(),
        ));
    }

    let user = with_db(&state.db, move |db| db.upsert_profile(&me, &update)).await?;
    info!(user = %user.id, "Profile updated");

    Ok(Json(ProfileResponse {
        success: true,
        user,
    }))
}

/// Every other user plus the caller's unseen count per sender.
async fn users_for_sidebar(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<UsersResponse>, ServerError> {
    let users = {
        let me = me.clone();
        with_db(&state.db, move |db| db.list_profiles_except(&me)).await?
    };
    let unseen_messages = state.seen.unseen_counts(&me).await?;

    Ok(Json(UsersResponse {
        success: true,
        users,
        unseen_messages,
    }))
}

async fn get_messages(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(peer): Path<String>,
) -> Result<Json<MessagesResponse>, ServerError> {
    let peer = parse_peer(&peer)?;
    let messages = state.seen.fetch_history(&me, &peer).await?;
    Ok(Json(MessagesResponse {
        success: true,
        messages,
    }))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(receiver): Path<String>,
    Json(content): Json<MessageContent>,
) -> Result<Json<SendResponse>, ServerError> {
    let receiver = parse_peer(&receiver)?;
    let new_message = state.router.send(&me, &receiver, content).await?;
    Ok(Json(SendResponse {
        success: true,
        new_message,
    }))
}

async fn mark_message_seen(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MarkSeenResponse>, ServerError> {
    let id: MessageId = id
        .parse()
        .map_err(|_| ServerError::Validation("Invalid message id".to_string()))?;
    let message = state.seen.mark_seen(&me, id).await?;
    Ok(Json(MarkSeenResponse {
        success: true,
        message,
    }))
}

fn parse_peer(raw: &str) -> Result<UserId, ServerError> {
    UserId::parse(raw).map_err(|_| ServerError::Validation("Invalid user id".to_string()))
}

/// Bind and serve until the listener fails.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Router {
        let db = db::open_in_memory().unwrap();
        build_router(AppState::new(db, ServerConfig::default()))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("x-user-id", user);
        }
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    async fn signup(app: &Router, id: &str) {
        let (status, _) = call(
            app,
            Method::PUT,
            "/api/auth/profile",
            Some(id),
            Some(serde_json::json!({ "fullName": id, "bio": "hi there" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_needs_no_identity() {
        let (status, body) = call(&app(), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/api/messages/users", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) =
            call(&app, Method::GET, "/api/messages/users", Some("undefined"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_check_requires_profile() {
        let app = app();
        let (status, body) = call(&app, Method::GET, "/api/auth/check", Some("alice"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "User not found");

        signup(&app, "alice").await;
        let (status, body) = call(&app, Method::GET, "/api/auth/check", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], "alice");
    }

    #[tokio::test]
    async fn send_fetch_and_unseen_flow() {
        let app = app();
        signup(&app, "alice").await;
        signup(&app, "bob").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/messages/send/bob",
            Some("alice"),
            Some(serde_json::json!({ "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["newMessage"]["seen"], false);

        let (_, body) = call(&app, Method::GET, "/api/messages/users", Some("bob"), None).await;
        assert_eq!(body["users"].as_array().unwrap().len(), 1);
        assert_eq!(body["unseenMessages"]["alice"], 1);

        let (status, body) = call(&app, Method::GET, "/api/messages/alice", Some("bob"), None).await;
        assert_eq!(status, StatusCode::OK);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["seen"], true);

        let (_, body) = call(&app, Method::GET, "/api/messages/users", Some("bob"), None).await;
        assert!(body["unseenMessages"].get("alice").is_none());
    }

    #[tokio::test]
    async fn send_errors_have_distinct_status() {
        let app = app();
        signup(&app, "alice").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/messages/send/bob",
            Some("alice"),
            Some(serde_json::json!({ "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Receiver not found");

        signup(&app, "bob").await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/messages/send/bob",
            Some("alice"),
            Some(serde_json::json!({ "text": "", "image": null })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Message text or image required");
    }

    #[tokio::test]
    async fn mark_seen_validates_id() {
        let app = app();
        let (status, _) =
            call(&app, Method::PUT, "/api/messages/mark/not-a-uuid", Some("bob"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/messages/mark/{}", uuid::Uuid::new_v4());
        let (status, body) = call(&app, Method::PUT, &uri, Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Message not found");
    }

    #[tokio::test]
    async fn profile_requires_name_and_bio() {
        let (status, _) = call(
            &app(),
            Method::PUT,
            "/api/auth/profile",
            Some("alice"),
            Some(serde_json::json!({ "fullName": "Alice", "bio": " " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
