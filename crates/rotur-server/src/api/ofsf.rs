use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rotur_store::{Command, UpdateReport};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ok, AppState, AuthUser};
use crate::error::ServerError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/ofsf", get(dump).delete(delete_all))
        .route("/ofsf/update", post(update))
        .route("/ofsf/index", get(index))
        .route("/ofsf/size", get(size))
        .route("/ofsf/entry/{uuid}", get(entry))
}

#[derive(Deserialize)]
struct IndexQuery {
    /// String fields longer than this come back as `false`.
    #[serde(default)]
    threshold: Option<usize>,
}

#[derive(Serialize)]
struct SizeResponse {
    used: u64,
    quota: u64,
}

async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(commands): Json<Vec<Command>>,
) -> Result<Json<UpdateReport>, ServerError> {
    Ok(Json(state.store.ofsf_update(&auth.name(), commands).await?))
}

async fn index(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(q): Query<IndexQuery>,
) -> Result<Json<Vec<Value>>, ServerError> {
    Ok(Json(state.store.ofsf().index(&auth.name(), q.threshold).await?))
}

async fn dump(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<BTreeMap<String, Vec<Value>>>, ServerError> {
    Ok(Json(state.store.ofsf().dump(&auth.name()).await?))
}

async fn entry(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(uuid): Path<String>,
) -> Result<Json<Vec<Value>>, ServerError> {
    Ok(Json(state.store.ofsf().get(&auth.name(), &uuid).await?))
}

async fn size(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<SizeResponse>, ServerError> {
    let used = state.store.ofsf().size(&auth.name()).await?;
    Ok(Json(SizeResponse {
        used,
        quota: auth.0.tier.ofsf_quota(),
    }))
}

async fn delete_all(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ServerError> {
    state.store.ofsf().delete_all(&auth.name()).await?;
    Ok(ok())
}
