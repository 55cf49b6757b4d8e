use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rotur_store::StoreError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Store(e) => match e {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
                StoreError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
                StoreError::PreconditionFailed(_) | StoreError::BadInput(_) => {
                    (StatusCode::BAD_REQUEST, self.to_string())
                }
                StoreError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
                StoreError::QuotaExceeded { used, available } => {
                    let body = serde_json::json!({
                        "error": self.to_string(),
                        "used": used,
                        "available": available,
                    });
                    return (StatusCode::PAYLOAD_TOO_LARGE, axum::Json(body)).into_response();
                }
                StoreError::Io(_) | StoreError::Json(_) => {
                    error!(error = %e, "Storage failure while serving request");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
                }
            },
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<rotur_shared::ValidationError> for ServerError {
    fn from(e: rotur_shared::ValidationError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}
