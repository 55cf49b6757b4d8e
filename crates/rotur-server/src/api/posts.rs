use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rotur_store::{Post, Reply};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ok, AppState, AuthUser};
use crate::error::ServerError;

const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post))
        .route("/posts/feed", get(feed))
        .route("/posts/user/{username}", get(user_posts))
        .route("/posts/{id}", get(get_post).delete(delete_post))
        .route("/posts/{id}/replies", post(reply))
        .route("/posts/{id}/like", post(like).delete(unlike))
        .route("/posts/{id}/pin", post(pin).delete(unpin))
        .route("/posts/{id}/repost", post(repost))
}

#[derive(Deserialize)]
struct CreatePostRequest {
    content: String,
    #[serde(default)]
    attachment: Option<String>,
    #[serde(default)]
    profile_only: bool,
}

#[derive(Deserialize)]
struct ReplyRequest {
    content: String,
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

impl Page {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE)
    }
}

#[derive(Serialize)]
struct LikesResponse {
    likes: usize,
}

async fn create_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreatePostRequest>,
) -> Result<Json<Post>, ServerError> {
    let author = auth.name();
    let extended = match &state.config.premium_key {
        Some(key) => state.key_cache.has_access(key, &author).await,
        None => false,
    };
    let post = state
        .store
        .create_post(&author, &req.content, req.attachment, req.profile_only, extended)
        .await?;
    Ok(Json(post))
}

async fn feed(State(state): State<AppState>, Query(page): Query<Page>) -> Json<Vec<Post>> {
    Json(state.store.feed(page.limit(), page.offset).await)
}

async fn user_posts(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(page): Query<Page>,
) -> Json<Vec<Post>> {
    Json(state.store.user_posts(&username, page.limit()).await)
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Post>, ServerError> {
    Ok(Json(state.store.get_post(&id).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.delete_post(&id, &auth.name(), false).await?;
    Ok(ok())
}

async fn reply(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<ReplyRequest>,
) -> Result<Json<Reply>, ServerError> {
    Ok(Json(state.store.reply_to_post(&id, &auth.name(), &req.content).await?))
}

async fn like(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<LikesResponse>, ServerError> {
    let likes = state.store.set_like(&id, &auth.name(), true).await?;
    Ok(Json(LikesResponse { likes }))
}

async fn unlike(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<LikesResponse>, ServerError> {
    let likes = state.store.set_like(&id, &auth.name(), false).await?;
    Ok(Json(LikesResponse { likes }))
}

async fn pin(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.set_pinned(&id, &auth.name(), true).await?;
    Ok(ok())
}

async fn unpin(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.set_pinned(&id, &auth.name(), false).await?;
    Ok(ok())
}

async fn repost(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Post>, ServerError> {
    Ok(Json(state.store.repost(&id, &auth.name()).await?))
}
