//! HTTP surface.
//!
//! Routes are grouped by area, one submodule each. Handlers resolve the
//! caller with the [`AuthUser`] or [`AdminAuth`] extractors and hand the
//! rest to [`Store`].

mod admin;
mod economy;
mod followers;
mod groups;
mod items;
mod keys;
mod ofsf;
mod posts;
mod users;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use rotur_store::{Store, StoreError, User};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::key_cache::KeyOwnershipCache;
use crate::subscriptions::SubscriptionEngine;

/// Large enough for OFSF batches to reach the quota check.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<ServerConfig>,
    pub key_cache: KeyOwnershipCache,
    pub engine: SubscriptionEngine,
}

impl AppState {
    pub fn new(store: Store, config: ServerConfig) -> Self {
        let key_cache = KeyOwnershipCache::new(store.clone(), config.key_ownership_cache_ttl);
        let engine = SubscriptionEngine::new(
            store.clone(),
            key_cache.clone(),
            config.subscription_check_interval,
        );
        Self {
            store,
            config: Arc::new(config),
            key_cache,
            engine,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(users::routes())
        .merge(economy::routes())
        .merge(posts::routes())
        .merge(items::routes())
        .merge(keys::routes())
        .merge(followers::routes())
        .merge(groups::routes())
        .merge(ofsf::routes())
        .merge(admin::routes())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `{"ok": true}`, returned by mutations with nothing else to say.
fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// The user key from `Authorization: Bearer <key>` or `?auth=<key>`.
fn user_token(parts: &Parts) -> Option<String> {
    let header = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|auth| auth.strip_prefix("Bearer ").unwrap_or(auth).trim().to_string())
        .filter(|t| !t.is_empty());
    if header.is_some() {
        return header;
    }
    parts
        .uri
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("auth="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

async fn resolve_user(state: &AppState, token: &str) -> Result<User, ServerError> {
    state.store.authenticate(token).await.map_err(|e| match e {
        StoreError::NotFound(_) => ServerError::Unauthorized,
        other => other.into(),
    })
}

/// The authenticated caller.
pub struct AuthUser(pub User);

impl AuthUser {
    /// Folded username, the key every collection uses.
    pub fn name(&self) -> String {
        rotur_shared::types::fold_username(&self.0.username)
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = user_token(parts).ok_or(ServerError::Unauthorized)?;
        resolve_user(state, &token).await.map(AuthUser)
    }
}

/// The caller when a token is present; anonymous otherwise.
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match user_token(parts) {
            Some(token) => resolve_user(state, &token).await.map(|u| MaybeUser(Some(u))),
            None => Ok(MaybeUser(None)),
        }
    }
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

/// Marker extractor for `/admin/*` handlers.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        verify_admin_token(&parts.headers, &state.config)?;
        Ok(AdminAuth)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_token_from_header_or_query() {
        let app = TestApp::new().await;
        let key = app.user("alice").await;

        let (status, body) = app.get("/me", Some(&key)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");

        let (status, _) = app.get(&format!("/me?auth={key}"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app.get("/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app.get("/me", Some("nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_token_checked() {
        let app = TestApp::new().await;
        let (status, _) = app.get("/admin/events", Some("wrong")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.get("/admin/events", Some(ADMIN)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
