//! Access Requests
//!
//! Users ask for access to a domain (or reactivation in one they hold);
//! administrators decide. Approval and the grant it implies commit
//! together. Activation calls run detached after commit.

mod activation;
mod error;
mod handlers;
pub mod queries;
mod transitions;
mod types;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
    Router,
};

use crate::api::AppState;
use crate::auth::{require_admin, require_auth};

pub use error::{AccessError, AccessResult};
pub use types::ExternalStatus;

/// Create the access request router.
///
/// All routes require authentication; decisions and status updates also
/// require an admin.
pub fn router(state: AppState) -> Router<AppState> {
    let admin_routes = Router::new()
        .route("/access-requests/search", get(handlers::search))
        .route("/access-requests/{id}/approve", post(handlers::approve))
        .route("/access-requests/{id}/reject", post(handlers::reject))
        .route(
            "/access-requests/{id}/external-status",
            patch(handlers::update_external_status),
        )
        .route(
            "/access-requests/{id}/deactivated-by",
            get(handlers::deactivated_by),
        )
        .route(
            "/users/{uuid}/external-status",
            patch(handlers::update_user_external_status),
        )
        .layer(from_fn(require_admin));

    Router::new()
        .route(
            "/access-requests",
            get(handlers::index).post(handlers::store),
        )
        .route("/activation-requests", post(handlers::store_activation))
        .route("/access-requests/{id}/resubmit", patch(handlers::resubmit))
        .route("/access-requests/{id}", delete(handlers::destroy))
        .merge(admin_routes)
        .layer(from_fn_with_state(state, require_auth))
}
