//! Admin Handlers
//!
//! All routes sit behind the gate plus the admin check.

use std::sync::LazyLock;

use axum::{
    extract::{Path, State},
    Json,
};
use regex::Regex;
use uuid::Uuid;
use validator::Validate;

use super::types::{
    AdminMessage, LockStatusRequest, LockStatusResponse, SettingsResponse, UpdateSettingRequest,
};
use crate::api::AppState;
use crate::auth::{AuthError, AuthResult, AuthUser};
use crate::db::{self, AdminCounts, SystemSetting, User};
use crate::settings;
use crate::sync::jobs::spawn_deletion;

/// Setting keys: lowercase snake case, up to the column width.
static SETTING_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid regex"));

async fn find_user(state: &AppState, uuid: Uuid) -> AuthResult<User> {
    db::find_user_by_uuid(&state.db, uuid)
        .await?
        .ok_or(AuthError::UserNotFound)
}

/// Panel counters.
///
/// GET /admin/stats
#[tracing::instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> AuthResult<Json<AdminCounts>> {
    Ok(Json(db::admin_counts(&state.db).await?))
}

/// Lock state for a batch of users. Unknown uuids are omitted.
///
/// POST /admin/users/lock-status
#[tracing::instrument(skip(state, body), fields(count = body.uuids.len()))]
pub async fn lock_status(
    State(state): State<AppState>,
    Json(body): Json<LockStatusRequest>,
) -> AuthResult<Json<LockStatusResponse>> {
    body.validate()?;
    let users = db::lock_statuses(&state.db, &body.uuids).await?;
    Ok(Json(LockStatusResponse { users }))
}

/// Clear a user's lock and failure counter.
///
/// POST /admin/users/{uuid}/unlock
#[tracing::instrument(skip(state, auth), fields(admin_id = auth.id))]
pub async fn unlock(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(uuid): Path<Uuid>,
) -> AuthResult<Json<AdminMessage>> {
    let user = find_user(&state, uuid).await?;
    db::unlock_user(&state.db, user.id).await?;

    tracing::info!(user_id = user.id, "User unlocked");
    Ok(Json(AdminMessage {
        message: "User unlocked successfully",
    }))
}

/// Soft-delete a user and tell the downstream domains they held.
///
/// DELETE /admin/users/{uuid}
#[tracing::instrument(skip(state, auth), fields(admin_id = auth.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(uuid): Path<Uuid>,
) -> AuthResult<Json<AdminMessage>> {
    if auth.uuid == uuid {
        return Err(AuthError::Forbidden(
            "You cannot delete your own account".into(),
        ));
    }

    let user = find_user(&state, uuid).await?;
    let domain_keys = db::domain_keys_for_user(&state.db, user.id).await?;

    if !db::soft_delete_user(&state.db, user.id).await? {
        return Err(AuthError::UserNotFound);
    }

    tracing::info!(user_id = user.id, domains = domain_keys.len(), "User deleted");
    spawn_deletion(state.downstream.clone(), user.uuid, domain_keys);

    Ok(Json(AdminMessage {
        message: "User deleted successfully",
    }))
}

/// GET /admin/settings
#[tracing::instrument(skip(state))]
pub async fn list_settings(State(state): State<AppState>) -> AuthResult<Json<SettingsResponse>> {
    let settings = db::list_settings(&state.db).await?;
    Ok(Json(SettingsResponse { settings }))
}

/// GET /admin/settings/{key}
#[tracing::instrument(skip(state))]
pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AuthResult<Json<SystemSetting>> {
    db::get_setting(&state.db, &key)
        .await?
        .map(Json)
        .ok_or_else(|| AuthError::NotFound("Setting".into()))
}

/// Optimistic setting write; a stale version is a 409.
///
/// PUT /admin/settings/{key}
#[tracing::instrument(skip(state, auth, body), fields(admin_id = auth.id))]
pub async fn put_setting(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
    Json(body): Json<UpdateSettingRequest>,
) -> AuthResult<Json<SystemSetting>> {
    if !SETTING_KEY.is_match(&key) {
        return Err(AuthError::Validation("Invalid setting key".into()));
    }

    let setting = settings::update(&state.db, &key, body.value, body.version, auth.id).await?;
    Ok(Json(setting))
}
