use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::qr_image::QrGenerationError;
use crate::services::{GenerationError, TransitionError};
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Admin password not configured")]
    AdminNotConfigured,

    #[error("Token generation incomplete after {created} tokens: {reason}")]
    GenerationIncomplete { created: usize, reason: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidQuantity(_) => "invalid_quantity",
            AppError::Unauthorized => "unauthorized",
            AppError::AdminNotConfigured => "admin_not_configured",
            AppError::GenerationIncomplete { .. } => "generation_incomplete",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();

        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::InvalidQuantity(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::AdminNotConfigured => (
                StatusCode::FORBIDDEN,
                "Admin password not configured".to_string(),
            ),
            AppError::GenerationIncomplete { created, reason } => {
                tracing::error!(created, reason = %reason, "Token generation incomplete");
                let body = Json(json!({
                    "error": code,
                    "message": format!("Token generation stopped after {} tokens were created", created),
                    "created_count": created,
                }));
                return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
            }
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TokenMissing(id) => AppError::NotFound(format!("Token {} not found", id)),
            e if e.is_transient() => {
                tracing::error!(error = %e, "Store unavailable");
                AppError::ServiceUnavailable("Attendance store unavailable, retry the request".to_string())
            }
            e => AppError::Internal(e.into()),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::TokenNotFound(token) => {
                AppError::NotFound(format!("Token {} not found", token))
            }
            TransitionError::Validation(msg) => AppError::Validation(msg),
            TransitionError::Store(e) => e.into(),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            e @ GenerationError::InvalidQuantity { .. } => AppError::InvalidQuantity(e.to_string()),
            e @ (GenerationError::CodeSpaceExhausted { .. } | GenerationError::Interrupted { .. }) => {
                AppError::GenerationIncomplete {
                    created: e.created(),
                    reason: e.to_string(),
                }
            }
            GenerationError::Store(e) => e.into(),
            e => AppError::Internal(e.into()),
        }
    }
}

impl From<QrGenerationError> for AppError {
    fn from(err: QrGenerationError) -> Self {
        AppError::Internal(err.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AppError::InvalidQuantity("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AppError::AdminNotConfigured, StatusCode::FORBIDDEN),
            (
                AppError::ServiceUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_transient_store_error_is_service_unavailable() {
        let error: AppError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(error, AppError::ServiceUnavailable(_)));

        let error: AppError = StoreError::Database(sqlx::Error::RowNotFound).into();
        assert!(matches!(error, AppError::Internal(_)));
    }

    #[test]
    fn test_invalid_quantity_keeps_message() {
        let error: AppError = GenerationError::InvalidQuantity {
            requested: 0,
            max: 3000,
        }
        .into();

        match error {
            AppError::InvalidQuantity(msg) => assert!(msg.contains("between 1 and 3000")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_incomplete_generation_reports_created_count() {
        let error: AppError = GenerationError::Interrupted {
            created: 40,
            source: Box::new(GenerationError::Store(StoreError::Database(
                sqlx::Error::PoolTimedOut,
            ))),
        }
        .into();

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "generation_incomplete");
        assert_eq!(body["created_count"], 40);
    }
}
