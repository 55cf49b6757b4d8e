//! Accounts, the caller's own document, friends and systems.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rotur_shared::{Credits, StandingLevel, Tier};
use rotur_store::{System, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ok, AppState, AuthUser};
use crate::error::ServerError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/users/login", post(login))
        .route("/users/search", get(search))
        .route("/users/{username}", get(profile))
        .route("/me", get(me).patch(set_key).delete(delete_account))
        .route("/me/keys/{key}", delete(delete_key))
        .route("/me/friends/{user}", post(send_request).delete(remove_friend))
        .route("/me/friends/{user}/accept", post(accept_request))
        .route("/me/friends/{user}/reject", post(reject_request))
        .route("/me/blocked/{user}", post(block).delete(unblock))
        .route("/systems", get(list_systems))
        .route("/systems/{name}/users", get(system_users))
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    #[serde(default)]
    system: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
    #[serde(default)]
    origin: Option<String>,
}

#[derive(Serialize)]
struct SessionResponse {
    username: String,
    key: String,
}

/// What anyone may see of an account.
#[derive(Serialize)]
struct PublicProfile {
    username: String,
    created: i64,
    tier: Tier,
    standing: StandingLevel,
    credits: Credits,
    friends: usize,
    system: Option<String>,
    data: serde_json::Map<String, Value>,
}

impl PublicProfile {
    fn of(user: User) -> Self {
        Self {
            created: user.created,
            tier: user.tier,
            standing: user.standing.effective(rotur_shared::types::now_millis()),
            credits: user.credits,
            friends: user.friends.len(),
            system: user.system,
            data: user.data,
            username: user.username,
        }
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    20
}

#[derive(Deserialize)]
struct SetKeyRequest {
    key: String,
    value: Value,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    let user = state
        .store
        .register(&req.username, &req.email, &req.password, req.system.as_deref())
        .await?;
    Ok(Json(SessionResponse {
        username: user.username,
        key: user.key,
    }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    let user = state
        .store
        .login(&req.username, &req.password, req.origin)
        .await?;
    Ok(Json(SessionResponse {
        username: user.username,
        key: user.key,
    }))
}

async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Json<Vec<String>> {
    Json(state.store.search_users(&q.q, q.limit.min(100)).await)
}

async fn profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<PublicProfile>, ServerError> {
    let user = state.store.get_user(&username).await?;
    if user.banned {
        return Err(ServerError::Forbidden("Account is banned".into()));
    }
    Ok(Json(PublicProfile::of(user)))
}

async fn me(AuthUser(mut user): AuthUser) -> Json<User> {
    user.password.clear();
    Json(user)
}

async fn set_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<SetKeyRequest>,
) -> Result<Json<Value>, ServerError> {
    state
        .store
        .set_user_key(&auth.name(), &req.key, req.value, false)
        .await?;
    Ok(ok())
}

async fn delete_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.delete_user_key(&auth.name(), &key).await?;
    Ok(ok())
}

async fn delete_account(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ServerError> {
    state.store.delete_user(&auth.name()).await?;
    state.store.ofsf().delete_all(&auth.name()).await?;
    Ok(ok())
}

async fn send_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.send_friend_request(&auth.name(), &user).await?;
    Ok(ok())
}

async fn accept_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.accept_friend_request(&auth.name(), &user).await?;
    Ok(ok())
}

async fn reject_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.reject_friend_request(&auth.name(), &user).await?;
    Ok(ok())
}

async fn remove_friend(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.remove_friend(&auth.name(), &user).await?;
    Ok(ok())
}

async fn block(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.block_user(&auth.name(), &user).await?;
    Ok(ok())
}

async fn unblock(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.unblock_user(&auth.name(), &user).await?;
    Ok(ok())
}

async fn list_systems(State(state): State<AppState>) -> Json<Vec<System>> {
    Json(state.store.list_systems().await)
}

async fn system_users(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<Vec<String>> {
    Json(state.store.system_users(&name).await)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_login() {
        let app = TestApp::new().await;
        let body = json!({ "username": "Alice", "email": "a@x.io", "password": PW });
        let (status, session) = app.post("/users", None, body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["username"], "Alice");

        let (status, _) = app.post("/users", None, body).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, login) = app
            .post("/users/login", None, json!({ "username": "alice", "password": PW }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(login["key"], session["key"]);

        let (status, _) = app
            .post("/users/login", None, json!({ "username": "alice", "password": "0".repeat(32) }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_profile_hides_secrets() {
        let app = TestApp::new().await;
        let key = app.user("alice").await;
        let (status, _) = app
            .call(Method::PATCH, "/me", Some(&key), Some(json!({ "key": "bio", "value": "hi" })))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, profile) = app.get("/users/ALICE", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["data"]["bio"], "hi");
        assert!(profile.get("key").is_none());
        assert!(profile.get("email").is_none());

        let (_, me) = app.get("/me", Some(&key)).await;
        assert_eq!(me["password"], "");
        assert_eq!(me["bio"], "hi");
    }

    #[tokio::test]
    async fn test_reserved_key_refused() {
        let app = TestApp::new().await;
        let key = app.user("alice").await;
        let (status, _) = app
            .call(
                Method::PATCH,
                "/me",
                Some(&key),
                Some(json!({ "key": "sys.currency", "value": 1000 })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_friend_flow() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let bob = app.user("bob").await;

        let (status, _) = app.post("/me/friends/bob", Some(&alice), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.post("/me/friends/alice/accept", Some(&bob), json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let (_, me) = app.get("/me", Some(&bob)).await;
        assert_eq!(me["sys.friends"], json!(["alice"]));

        let (status, _) = app.post("/me/friends/bob/accept", Some(&alice), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
