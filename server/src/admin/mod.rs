//! Admin API
//!
//! Account maintenance and system settings for administrators. Domain
//! grants live in [`crate::domains`].

mod handlers;
mod types;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};

use crate::api::AppState;
use crate::auth::{require_admin, require_auth};

pub use types::MAX_LOCK_STATUS_BATCH;

/// Create the admin router.
///
/// Every route requires an authenticated administrator.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/stats", get(handlers::stats))
        .route("/admin/users/lock-status", post(handlers::lock_status))
        .route("/admin/users/{uuid}/unlock", post(handlers::unlock))
        .route("/admin/users/{uuid}", delete(handlers::delete_user))
        .route("/admin/settings", get(handlers::list_settings))
        .route(
            "/admin/settings/{key}",
            get(handlers::get_setting).put(handlers::put_setting),
        )
        .layer(from_fn(require_admin))
        .layer(from_fn_with_state(state, require_auth))
}
