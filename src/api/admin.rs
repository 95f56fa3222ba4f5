use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::extract::ApiJson;
use crate::api::middleware::{auth::verify_admin_password, AppState};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct VerifyPasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyPasswordResponse {
    pub success: bool,
}

/// Lets a front-end check the admin password before enabling admin controls
async fn verify_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyPasswordRequest>,
) -> Result<Json<VerifyPasswordResponse>, AppError> {
    verify_admin_password(&state.config, &req.password).map_err(|e| {
        tracing::warn!(error = %e, "Admin password verification failed");
        e
    })?;

    Ok(Json(VerifyPasswordResponse { success: true }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/admin/verify", post(verify_password))
}
