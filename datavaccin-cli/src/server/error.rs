use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use datavaccin_lib::{RefreshError, StoreError};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedPayload(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::MalformedPayload(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => match e {
                StoreError::MissingKey(_) | StoreError::Duplicate(_) | StoreError::Conflict { .. } => {
                    StatusCode::BAD_REQUEST
                }
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Io { .. } | StoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Refresh(RefreshError::Source(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Refresh(RefreshError::Persist(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "message": self.to_string() }))).into_response()
    }
}
