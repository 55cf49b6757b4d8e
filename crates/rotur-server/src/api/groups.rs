use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rotur_shared::Credits;
use rotur_store::{Announcement, Group, GroupEvent, Permission, Role};
use serde::Deserialize;
use serde_json::Value;

use super::{ok, AppState, AuthUser};
use crate::error::ServerError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/groups", post(create_group))
        .route("/groups/mine", get(my_groups))
        .route("/groups/{tag}", get(get_group).delete(delete_group))
        .route("/groups/{tag}/join", post(join))
        .route("/groups/{tag}/leave", post(leave))
        .route("/groups/{tag}/members/{user}", delete(kick))
        .route(
            "/groups/{tag}/members/{user}/roles/{role}",
            post(assign_role).delete(unassign_role),
        )
        .route("/groups/{tag}/roles", post(create_role))
        .route("/groups/{tag}/announcements", post(announce))
        .route("/groups/{tag}/events", post(create_event))
        .route("/groups/{tag}/tip", post(tip))
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    tag: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct CreateRoleRequest {
    name: String,
    #[serde(default)]
    permissions: BTreeSet<Permission>,
}

#[derive(Deserialize)]
struct AnnounceRequest {
    content: String,
}

#[derive(Deserialize)]
struct EventRequest {
    title: String,
    starts_at: i64,
}

#[derive(Deserialize)]
struct TipRequest {
    amount: f64,
}

async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<Group>, ServerError> {
    let group = state
        .store
        .create_group(&auth.name(), &req.tag, &req.name, &req.description)
        .await?;
    Ok(Json(group))
}

async fn my_groups(State(state): State<AppState>, auth: AuthUser) -> Json<Vec<String>> {
    Json(state.store.groups_of(&auth.name()).await)
}

async fn get_group(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<Group>, ServerError> {
    Ok(Json(state.store.get_group(&tag).await?))
}

async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tag): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.delete_group(&tag, &auth.name()).await?;
    Ok(ok())
}

async fn join(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tag): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.join_group(&tag, &auth.name()).await?;
    Ok(ok())
}

async fn leave(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tag): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.leave_group(&tag, &auth.name()).await?;
    Ok(ok())
}

async fn kick(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((tag, user)): Path<(String, String)>,
) -> Result<Json<Value>, ServerError> {
    state.store.kick_member(&tag, &auth.name(), &user).await?;
    Ok(ok())
}

async fn assign_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((tag, user, role)): Path<(String, String, String)>,
) -> Result<Json<Value>, ServerError> {
    state
        .store
        .set_member_role(&tag, &auth.name(), &user, &role, true)
        .await?;
    Ok(ok())
}

async fn unassign_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((tag, user, role)): Path<(String, String, String)>,
) -> Result<Json<Value>, ServerError> {
    state
        .store
        .set_member_role(&tag, &auth.name(), &user, &role, false)
        .await?;
    Ok(ok())
}

async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tag): Path<String>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<Json<Role>, ServerError> {
    let role = state
        .store
        .create_role(&tag, &auth.name(), &req.name, req.permissions)
        .await?;
    Ok(Json(role))
}

async fn announce(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tag): Path<String>,
    Json(req): Json<AnnounceRequest>,
) -> Result<Json<Announcement>, ServerError> {
    Ok(Json(state.store.announce(&tag, &auth.name(), &req.content).await?))
}

async fn create_event(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tag): Path<String>,
    Json(req): Json<EventRequest>,
) -> Result<Json<GroupEvent>, ServerError> {
    let event = state
        .store
        .create_group_event(&tag, &auth.name(), &req.title, req.starts_at)
        .await?;
    Ok(Json(event))
}

async fn tip(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tag): Path<String>,
    Json(req): Json<TipRequest>,
) -> Result<Json<Value>, ServerError> {
    let amount = Credits::parse_amount(req.amount)?;
    state.store.tip_group(&tag, &auth.name(), amount).await?;
    Ok(ok())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::{Method, StatusCode};
    use rotur_shared::Credits;
    use serde_json::json;

    #[tokio::test]
    async fn test_roles_and_permissions() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let bob = app.user("bob").await;

        let (status, group) = app
            .post("/groups", Some(&alice), json!({ "tag": "rust", "name": "Rustaceans" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(group["tag"], "RUST");

        app.post("/groups/RUST/join", Some(&bob), json!({})).await;
        let (status, _) = app
            .post("/groups/rust/announcements", Some(&bob), json!({ "content": "hi" }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, role) = app
            .post(
                "/groups/rust/roles",
                Some(&alice),
                json!({ "name": "Herald", "permissions": ["announce"] }),
            )
            .await;
        let role_id = role["id"].as_str().unwrap().to_string();
        let (status, _) = app
            .post(&format!("/groups/rust/members/bob/roles/{role_id}"), Some(&alice), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .post("/groups/rust/announcements", Some(&bob), json!({ "content": "hi" }))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .post("/groups/rust/members/bob/roles/owner", Some(&alice), json!({}))
            .await;
        assert_ne!(status, StatusCode::OK);

        let (status, _) = app.post("/groups/rust/leave", Some(&alice), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, mine) = app.get("/groups/mine", Some(&bob)).await;
        assert_eq!(mine, json!(["RUST"]));
    }

    #[tokio::test]
    async fn test_tip_and_kick() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let bob = app.user("bob").await;
        app.store().mint("bob", Credits::whole(5)).await.unwrap();
        app.post("/groups", Some(&alice), json!({ "tag": "CAFE", "name": "Cafe" })).await;
        app.post("/groups/cafe/join", Some(&bob), json!({})).await;

        let (status, _) = app.post("/groups/cafe/tip", Some(&bob), json!({ "amount": 1.5 })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            app.store().get_user("alice").await.unwrap().credits,
            Credits::from_cents(150)
        );

        let (status, _) = app.post("/groups/cafe/tip", Some(&alice), json!({ "amount": 1 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .call(Method::DELETE, "/groups/cafe/members/alice", Some(&bob), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app
            .call(Method::DELETE, "/groups/cafe/members/bob", Some(&alice), None)
            .await;
        assert_eq!(status, StatusCode::OK);
    }
}
