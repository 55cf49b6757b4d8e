use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rotur_shared::types::now_millis;
use rotur_shared::{BillingCycle, Period};
use rotur_store::Key;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ok, AppState, AuthUser};
use crate::error::ServerError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/keys", post(create_key))
        .route("/keys/mine", get(my_keys))
        .route("/keys/{token}", get(get_key).patch(update_key).delete(delete_key))
        .route("/keys/{token}/access/{user}", get(check_access))
        .route("/keys/{token}/buy", post(buy_key))
        .route("/keys/{token}/cancel", post(cancel_key))
        .route("/keys/{token}/holders/{user}", delete(revoke_key))
}

#[derive(Deserialize)]
struct SubscriptionRequest {
    period: Period,
    #[serde(default = "one")]
    frequency: u32,
}

fn one() -> u32 {
    1
}

#[derive(Deserialize)]
struct CreateKeyRequest {
    name: String,
    #[serde(default)]
    price: u64,
    #[serde(default)]
    subscription: Option<SubscriptionRequest>,
}

/// Any subset of the owner-editable fields. `data: null` clears the data.
#[derive(Deserialize)]
struct UpdateKeyRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Option<u64>,
    #[serde(default, deserialize_with = "present")]
    data: Option<Option<Value>>,
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D>(de: D) -> Result<Option<Option<Value>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<Value>::deserialize(de).map(Some)
}

#[derive(Serialize)]
struct AccessResponse {
    access: bool,
}

#[derive(Serialize)]
struct CancelResponse {
    cancel_at: i64,
}

async fn create_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateKeyRequest>,
) -> Result<Json<Key>, ServerError> {
    let cycle = req
        .subscription
        .map(|s| BillingCycle::new(s.period, s.frequency))
        .transpose()?;
    let key = state
        .store
        .create_key(&auth.name(), &req.name, req.price, cycle)
        .await?;
    Ok(Json(key))
}

async fn my_keys(State(state): State<AppState>, auth: AuthUser) -> Json<Vec<Key>> {
    Json(state.store.keys_of(&auth.name()).await)
}

async fn get_key(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Key>, ServerError> {
    Ok(Json(state.store.get_key(&token).await?))
}

async fn update_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
    Json(req): Json<UpdateKeyRequest>,
) -> Result<Json<Key>, ServerError> {
    let owner = auth.name();
    if let Some(name) = &req.name {
        state.store.rename_key(&token, &owner, name).await?;
    }
    if let Some(price) = req.price {
        state.store.set_key_price(&token, &owner, price).await?;
    }
    if let Some(data) = req.data {
        state.store.set_key_data(&token, &owner, data).await?;
    }
    Ok(Json(state.store.get_key(&token).await?))
}

async fn delete_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.delete_key(&token, &auth.name()).await?;
    state.key_cache.invalidate_key(&token).await;
    Ok(ok())
}

async fn check_access(
    State(state): State<AppState>,
    Path((token, user)): Path<(String, String)>,
) -> Json<AccessResponse> {
    Json(AccessResponse {
        access: state.key_cache.has_access(&token, &user).await,
    })
}

async fn buy_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
) -> Result<Json<Key>, ServerError> {
    let buyer = auth.name();
    let key = state.store.buy_key(&token, &buyer, now_millis()).await?;
    state.key_cache.invalidate(&token, &buyer).await;
    Ok(Json(key))
}

async fn cancel_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
) -> Result<Json<CancelResponse>, ServerError> {
    let cancel_at = state.store.cancel_key(&token, &auth.name()).await?;
    Ok(Json(CancelResponse { cancel_at }))
}

async fn revoke_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((token, user)): Path<(String, String)>,
) -> Result<Json<Value>, ServerError> {
    state.store.revoke_key(&token, &auth.name(), &user).await?;
    state.key_cache.invalidate(&token, &user).await;
    Ok(ok())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::{Method, StatusCode};
    use rotur_shared::Credits;
    use serde_json::json;

    #[tokio::test]
    async fn test_buy_access_and_revoke() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let bob = app.user("bob").await;
        app.store().mint("bob", Credits::whole(10)).await.unwrap();

        let (status, key) = app
            .post("/keys", Some(&alice), json!({ "name": "Club", "price": 4 }))
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = key["key"].as_str().unwrap().to_string();

        let (_, access) = app.get(&format!("/keys/{token}/access/bob"), None).await;
        assert_eq!(access["access"], false);

        let (status, _) = app.post(&format!("/keys/{token}/buy"), Some(&bob), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (_, access) = app.get(&format!("/keys/{token}/access/bob"), None).await;
        assert_eq!(access["access"], true);

        let (status, _) = app.post(&format!("/keys/{token}/buy"), Some(&bob), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .call(Method::DELETE, &format!("/keys/{token}/holders/bob"), Some(&alice), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, access) = app.get(&format!("/keys/{token}/access/bob"), None).await;
        assert_eq!(access["access"], false);
    }

    #[tokio::test]
    async fn test_subscription_cancel() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let bob = app.user("bob").await;
        app.store().mint("bob", Credits::whole(10)).await.unwrap();

        let (_, key) = app
            .post(
                "/keys",
                Some(&alice),
                json!({ "name": "Weekly", "price": 2, "subscription": { "period": "week" } }),
            )
            .await;
        let token = key["key"].as_str().unwrap().to_string();

        let (status, _) = app.post(&format!("/keys/{token}/cancel"), Some(&bob), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        app.post(&format!("/keys/{token}/buy"), Some(&bob), json!({})).await;
        let (status, body) = app.post(&format!("/keys/{token}/cancel"), Some(&bob), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (_, key) = app.get(&format!("/keys/{token}"), None).await;
        assert_eq!(key["users"]["bob"]["cancel_at"], body["cancel_at"]);
    }

    #[tokio::test]
    async fn test_update_key_fields() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        let (_, key) = app.post("/keys", Some(&alice), json!({ "name": "Old" })).await;
        let token = key["key"].as_str().unwrap().to_string();

        let (status, key) = app
            .call(
                Method::PATCH,
                &format!("/keys/{token}"),
                Some(&alice),
                Some(json!({ "name": "New", "price": 3, "data": { "tier": "gold" } })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(key["name"], "New");
        assert_eq!(key["price"], 3);
        assert_eq!(key["data"]["tier"], "gold");
    }
}
