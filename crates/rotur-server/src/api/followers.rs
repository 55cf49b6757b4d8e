use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use super::{ok, AppState, AuthUser};
use crate::error::ServerError;

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/followers/{user}", post(follow).delete(unfollow).get(graph))
}

#[derive(Serialize)]
struct FollowGraph {
    followers: Vec<String>,
    following: Vec<String>,
}

async fn follow(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.follow(&auth.name(), &user).await?;
    Ok(ok())
}

async fn unfollow(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.store.unfollow(&auth.name(), &user).await?;
    Ok(ok())
}

async fn graph(State(state): State<AppState>, Path(user): Path<String>) -> Json<FollowGraph> {
    let (followers, following) =
        futures::join!(state.store.followers_of(&user), state.store.following(&user));
    Json(FollowGraph {
        followers,
        following,
    })
}
