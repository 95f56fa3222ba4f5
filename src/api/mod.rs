// API module - HTTP endpoints

pub mod admin;
pub mod attendance;
pub mod extract;
pub mod health;
pub mod middleware;
pub mod tokens;

use axum::{routing::get, Router};

use self::middleware::{require_admin, AppState};

/// Builds the full application router.
///
/// Admin routes are collected into their own router so the password check
/// wraps exactly those routes and nothing else.
pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .merge(tokens::admin_router())
        .merge(attendance::admin_router())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(admin::router())
        .merge(tokens::router())
        .merge(attendance::router())
        .merge(admin_routes)
        .with_state(state)
}
