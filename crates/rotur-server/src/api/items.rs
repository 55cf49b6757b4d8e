use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use rotur_shared::Credits;
use rotur_store::Item;
use serde::Deserialize;
use serde_json::Value;

use super::{ok, AppState, AuthUser, MaybeUser};
use crate::error::ServerError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/items", post(create_item).get(for_sale))
        .route("/items/user/{owner}", get(items_of))
        .route("/items/{name}", get(get_item).delete(delete_item))
        .route("/items/{name}/transfer", post(transfer_item))
        .route("/items/{name}/buy", post(buy_item))
        .route("/items/{name}/price", patch(set_price))
        .route("/items/{name}/selling", post(start_selling).delete(stop_selling))
}

#[derive(Deserialize)]
struct CreateItemRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    price: Credits,
    #[serde(default)]
    private: Option<Value>,
}

#[derive(Deserialize)]
struct TransferRequest {
    to: String,
}

#[derive(Deserialize)]
struct PriceRequest {
    price: Credits,
}

fn viewer(user: &MaybeUser) -> Option<&str> {
    user.0.as_ref().map(|u| u.username.as_str())
}

async fn create_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateItemRequest>,
) -> Result<Json<Item>, ServerError> {
    let item = state
        .store
        .create_item(&auth.name(), &req.name, &req.description, req.price, req.private)
        .await?;
    Ok(Json(item))
}

async fn for_sale(State(state): State<AppState>) -> Json<Vec<Item>> {
    Json(state.store.items_for_sale().await)
}

async fn items_of(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(owner): Path<String>,
) -> Json<Vec<Item>> {
    Json(state.store.items_of(&owner, viewer(&user)).await)
}

async fn get_item(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(name): Path<String>,
) -> Result<Json<Item>, ServerError> {
    Ok(Json(state.store.get_item(&name, viewer(&user)).await?))
}

async fn delete_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.delete_item(&name, &auth.name()).await?;
    Ok(ok())
}

async fn transfer_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<Item>, ServerError> {
    Ok(Json(state.store.transfer_item(&name, &auth.name(), &req.to).await?))
}

async fn buy_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
) -> Result<Json<Item>, ServerError> {
    Ok(Json(state.store.buy_item(&name, &auth.name()).await?))
}

async fn set_price(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
    Json(req): Json<PriceRequest>,
) -> Result<Json<Value>, ServerError> {
    state.store.set_item_price(&name, &auth.name(), req.price).await?;
    Ok(ok())
}

async fn start_selling(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.set_item_selling(&name, &auth.name(), true).await?;
    Ok(ok())
}

async fn stop_selling(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.set_item_selling(&name, &auth.name(), false).await?;
    Ok(ok())
}
