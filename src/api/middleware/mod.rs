pub mod auth;
pub mod state;

pub use auth::{require_admin, ADMIN_PASSWORD_HEADER};
pub use state::AppState;
