use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegisterResponse {
    pub ok: bool,
    /// Number of decoded records in the batch.
    pub registered: usize,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),

    #[error("metadata store error: {0}")]
    StoreError(#[from] StoreError),
}

impl RegisterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegisterError::RequestDecodingError(_) => StatusCode::BAD_REQUEST,
            RegisterError::StoreError(StoreError::ConnectionError { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RegisterError::StoreError(StoreError::QueryError { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RegisterError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            ok: false,
            error: self.to_string(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Operation;

    #[test]
    fn maps_errors_to_status_codes() {
        let decoding = RegisterError::RequestDecodingError("invalid gzip data".to_owned());
        assert_eq!(decoding.status_code(), StatusCode::BAD_REQUEST);

        let unavailable = RegisterError::from(StoreError::ConnectionError {
            error: sqlx::Error::PoolTimedOut,
        });
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let failed = RegisterError::from(StoreError::QueryError {
            operation: Operation::UpsertProjects,
            error: sqlx::Error::RowNotFound,
        });
        assert_eq!(failed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(failed.to_string().contains("upsert_projects"));
    }
}
