//! Downstream Sync
//!
//! Outbound calls to the domain services (activation, propagation,
//! deletion, page permissions) and the signed inbound sync endpoint.

mod client;
mod internal;
pub mod jobs;
pub mod signing;

use axum::{routing::post, Router};

use crate::api::AppState;

pub use client::{DownstreamClient, PermissionAction, SyncError, UserSyncPayload};

/// Create the inbound sync router.
///
/// - POST /internal-sync-user (HMAC-signed)
pub fn router() -> Router<AppState> {
    Router::new().route("/internal-sync-user", post(internal::sync_user))
}
