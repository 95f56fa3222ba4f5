use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use ring::digest;
use secrecy::ExposeSecret;

use super::state::AppState;
use crate::config::Config;
use crate::error::AppError;

/// Header carrying the shared admin password on admin requests
pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

// Comparing fixed-length digests keeps the comparison independent of the
// candidate's length.
fn digests_match(expected: &str, candidate: &str) -> bool {
    let expected = digest::digest(&digest::SHA256, expected.as_bytes());
    let candidate = digest::digest(&digest::SHA256, candidate.as_bytes());
    expected.as_ref() == candidate.as_ref()
}

/// Checks a candidate password against the configured admin secret
pub fn verify_admin_password(config: &Config, candidate: &str) -> Result<(), AppError> {
    let expected = config
        .admin_password
        .as_ref()
        .ok_or(AppError::AdminNotConfigured)?;

    if digests_match(expected.expose_secret(), candidate) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Middleware that requires the admin password on every request it guards
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let candidate = request
        .headers()
        .get(ADMIN_PASSWORD_HEADER)
        .and_then(|value| value.to_str().ok());

    let Some(candidate) = candidate else {
        tracing::warn!(path = %request.uri().path(), "Missing admin password");
        return Err(AppError::Unauthorized);
    };

    if let Err(e) = verify_admin_password(&state.config, candidate) {
        tracing::warn!(path = %request.uri().path(), error = %e, "Admin password rejected");
        return Err(e);
    }

    Ok(next.run(request).await)
}
