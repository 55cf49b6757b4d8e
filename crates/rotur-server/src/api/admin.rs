//! `/admin/*`: everything here requires the admin bearer token.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rotur_shared::types::now_millis;
use rotur_shared::{Credits, Standing, StandingLevel};
use rotur_store::{HistoryEvent, SweepReport, System, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ok, AdminAuth, AppState};
use crate::error::ServerError;
use crate::subscriptions::EngineStatus;

const DEFAULT_EVENTS: usize = 100;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(status))
        .route("/admin/mint", post(mint))
        .route("/admin/users/{user}", get(get_user).delete(delete_user))
        .route("/admin/users/{user}/ban", post(ban))
        .route("/admin/users/{user}/standing", post(set_standing))
        .route("/admin/users/{user}/fields", post(set_field))
        .route("/admin/posts/{id}", delete(delete_post))
        .route("/admin/keys/{token}/holders/{user}", post(grant_key).delete(remove_key))
        .route("/admin/systems", post(register_system))
        .route("/admin/events", get(events))
        .route("/admin/subscriptions", get(subscriptions))
        .route("/admin/subscriptions/sweep", post(sweep_now))
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    total_credits: Credits,
    last_sweep: Option<SweepReport>,
}

#[derive(Deserialize)]
struct MintRequest {
    username: String,
    amount: f64,
}

#[derive(Serialize)]
struct MintResponse {
    balance: Credits,
}

#[derive(Deserialize)]
struct StandingRequest {
    level: StandingLevel,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct FieldRequest {
    key: String,
    value: Value,
}

#[derive(Deserialize)]
struct SystemRequest {
    name: String,
    owner: String,
    #[serde(default)]
    designation: String,
}

#[derive(Deserialize)]
struct EventsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn status(_: AdminAuth, State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        total_credits: state.store.total_credits().await,
        last_sweep: state.engine.last_report().await,
    })
}

async fn mint(
    _: AdminAuth,
    State(state): State<AppState>,
    Json(req): Json<MintRequest>,
) -> Result<Json<MintResponse>, ServerError> {
    let amount = Credits::parse_amount(req.amount)?;
    let balance = state.store.mint(&req.username, amount).await?;
    info!(user = %req.username, amount = %amount, "Admin minted credits");
    Ok(Json(MintResponse { balance }))
}

async fn get_user(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<User>, ServerError> {
    Ok(Json(state.store.get_user(&user).await?))
}

async fn delete_user(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let folded = rotur_shared::types::fold_username(&user);
    state.store.delete_user(&folded).await?;
    state.store.ofsf().delete_all(&folded).await?;
    info!(user = %folded, "Admin deleted user");
    Ok(ok())
}

async fn ban(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.ban_user(&user).await?;
    Ok(ok())
}

async fn set_standing(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<StandingRequest>,
) -> Result<Json<Standing>, ServerError> {
    let standing = state.store.set_standing(&user, req.level, req.reason).await?;
    info!(user = %user, level = ?standing.level, "Admin set standing");
    Ok(Json(standing))
}

async fn set_field(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<FieldRequest>,
) -> Result<Json<Value>, ServerError> {
    state.store.set_user_key(&user, &req.key, req.value, true).await?;
    Ok(ok())
}

async fn delete_post(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.delete_post(&id, "", true).await?;
    Ok(ok())
}

async fn grant_key(
    _: AdminAuth,
    State(state): State<AppState>,
    Path((token, user)): Path<(String, String)>,
) -> Result<Json<Value>, ServerError> {
    state.store.admin_grant_key(&token, &user).await?;
    state.key_cache.invalidate(&token, &user).await;
    Ok(ok())
}

async fn remove_key(
    _: AdminAuth,
    State(state): State<AppState>,
    Path((token, user)): Path<(String, String)>,
) -> Result<Json<Value>, ServerError> {
    state.store.admin_remove_key(&token, &user).await?;
    state.key_cache.invalidate(&token, &user).await;
    Ok(ok())
}

async fn register_system(
    _: AdminAuth,
    State(state): State<AppState>,
    Json(req): Json<SystemRequest>,
) -> Result<Json<System>, ServerError> {
    let system = state
        .store
        .register_system(&req.name, &req.owner, &req.designation)
        .await?;
    Ok(Json(system))
}

async fn events(
    _: AdminAuth,
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
) -> Json<Vec<HistoryEvent>> {
    Json(state.store.recent_events(q.limit.unwrap_or(DEFAULT_EVENTS)).await)
}

async fn subscriptions(_: AdminAuth, State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status(now_millis()).await)
}

async fn sweep_now(_: AdminAuth, State(state): State<AppState>) -> Json<SweepReport> {
    Json(state.engine.sweep(now_millis()).await)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::{Method, StatusCode};
    use rotur_shared::{BillingCycle, Period};
    use serde_json::json;

    #[tokio::test]
    async fn test_mint_and_events() {
        let app = TestApp::new().await;
        app.user("alice").await;

        let (status, body) = app
            .post("/admin/mint", Some(ADMIN), json!({ "username": "alice", "amount": 12.5 }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], json!(12.5));

        let (_, events) = app.get("/admin/events?limit=5", Some(ADMIN)).await;
        assert_eq!(events[0]["kind"], "mint");

        let (_, status_body) = app.get("/admin/status", Some(ADMIN)).await;
        assert_eq!(status_body["total_credits"], json!(12.5));
    }

    #[tokio::test]
    async fn test_ban_blocks_login() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;

        let (status, _) = app.post("/admin/users/alice/ban", Some(ADMIN), json!({})).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app.get("/me", Some(&alice)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app.get("/users/alice", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_suspended_user_cannot_post() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let (status, standing) = app
            .post(
                "/admin/users/alice/standing",
                Some(ADMIN),
                json!({ "level": "suspended", "reason": "spam" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(standing["level"], "suspended");

        let (status, _) = app.post("/posts", Some(&alice), json!({ "content": "hi" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_grant_key_and_subscription_view() {
        let app = TestApp::new().await;
        app.user("alice").await;
        app.user("bob").await;
        let cycle = BillingCycle::new(Period::Month, 1).unwrap();
        let key = app
            .store()
            .create_key("alice", "Club", 5, Some(cycle))
            .await
            .unwrap();

        let uri = format!("/admin/keys/{}/holders/bob", key.key);
        let (status, _) = app.post(&uri, Some(ADMIN), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.state.key_cache.has_access(&key.key, "bob").await);

        let (_, view) = app.get("/admin/subscriptions", Some(ADMIN)).await;
        assert_eq!(view["subscriptions"][0]["holders"][0]["user"], "bob");
        assert!(view["last_sweep"].is_null());

        let (status, report) = app.post("/admin/subscriptions/sweep", Some(ADMIN), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["charged"], 0);

        let (status, _) = app.call(Method::DELETE, &uri, Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!app.state.key_cache.has_access(&key.key, "bob").await);
    }

    #[tokio::test]
    async fn test_systems_register_and_list() {
        let app = TestApp::new().await;
        let (status, _) = app
            .post(
                "/admin/systems",
                Some(ADMIN),
                json!({ "name": "originOS", "owner": "mist", "designation": "os" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .post(
                "/users",
                None,
                json!({ "username": "carol", "email": "c@x.io", "password": PW, "system": "originos" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, systems) = app.get("/systems", None).await;
        assert_eq!(systems[0]["name"], "originOS");
        let (_, users) = app.get("/systems/originOS/users", None).await;
        assert_eq!(users, json!(["carol"]));
    }
}
