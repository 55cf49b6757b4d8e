use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use rotur_shared::types::now_millis;
use rotur_shared::Credits;
use rotur_store::Transaction;
use serde::{Deserialize, Serialize};

use super::{AppState, AuthUser};
use crate::error::ServerError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/economy/balance", get(balance))
        .route("/economy/transfer", post(transfer))
        .route("/economy/claim", post(claim_daily))
        .route("/economy/transactions", get(transactions))
}

#[derive(Deserialize)]
struct TransferRequest {
    to: String,
    amount: f64,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Serialize)]
struct BalanceResponse {
    balance: Credits,
}

async fn balance(AuthUser(user): AuthUser) -> Json<BalanceResponse> {
    Json(BalanceResponse {
        balance: user.credits,
    })
}

async fn transfer(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<TransferRequest>,
) -> Result<Json<BalanceResponse>, ServerError> {
    let amount = Credits::parse_amount(req.amount)?;
    let from = auth.name();
    state
        .store
        .transfer(&from, &req.to, amount, req.note.as_deref())
        .await?;
    let balance = state.store.get_user(&from).await?.credits;
    Ok(Json(BalanceResponse { balance }))
}

async fn claim_daily(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ServerError> {
    let balance = state.store.claim_daily(&auth.name(), now_millis()).await?;
    Ok(Json(BalanceResponse { balance }))
}

async fn transactions(AuthUser(user): AuthUser) -> Json<Vec<Transaction>> {
    Json(user.transactions)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use rotur_shared::Credits;
    use serde_json::json;

    #[tokio::test]
    async fn test_transfer_and_claim() {
        let app = TestApp::new().await;
        let alice = app.user("alice").await;
        app.user("bob").await;

        let (status, body) = app.post("/economy/claim", Some(&alice), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], json!(1));

        let (status, _) = app.post("/economy/claim", Some(&alice), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .post("/economy/transfer", Some(&alice), json!({ "to": "bob", "amount": 0.25 }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], json!(0.75));
        assert_eq!(
            app.store().get_user("bob").await.unwrap().credits,
            Credits::from_cents(25)
        );

        let (status, _) = app
            .post("/economy/transfer", Some(&alice), json!({ "to": "bob", "amount": 5 }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post("/economy/transfer", Some(&alice), json!({ "to": "bob", "amount": 0.001 }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, txs) = app.get("/economy/transactions", Some(&alice)).await;
        assert_eq!(txs.as_array().unwrap().len(), 2);
    }
}
