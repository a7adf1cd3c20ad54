//! Inbound User Sync
//!
//! Sibling domains push account changes here. The raw body is signed with
//! the shared sync key; nothing is parsed before the signature checks out.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::jobs::spawn_propagation;
use super::signing::{verify_signature, SIGNATURE_HEADER};
use crate::api::AppState;
use crate::auth::{hash_password, is_password_hash, AuthError, AuthResult};
use crate::db::{self, NewUser, UserOrigin, UserStatus};
use crate::domains;

/// Lifecycle event reported by the origin domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
    Activated,
    Deactivated,
}

/// Domains allowed to push users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOrigin {
    Ccms,
    Jobfinder,
    Solucomp,
}

impl From<SyncOrigin> for UserOrigin {
    fn from(origin: SyncOrigin) -> Self {
        match origin {
            SyncOrigin::Ccms => Self::Ccms,
            SyncOrigin::Jobfinder => Self::Jobfinder,
            SyncOrigin::Solucomp => Self::Solucomp,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SyncUserRequest {
    pub uuid: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    #[validate(length(max = 255))]
    pub last_name: String,
    pub role: Option<String>,
    #[validate(email)]
    pub personal_email: String,
    #[validate(length(min = 1))]
    pub password: String,
    pub action: SyncAction,
    pub user_origin: SyncOrigin,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub message: &'static str,
}

/// Check the body signature against the shared key.
fn verify_request(state: &AppState, headers: &HeaderMap, body: &[u8]) -> AuthResult<()> {
    let Some(key) = state.downstream.sync_key() else {
        tracing::error!("SYNC_SECRET is not configured; rejecting sync request");
        return Err(AuthError::InvalidSignature);
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if verify_signature(key, body, signature) {
        Ok(())
    } else {
        tracing::warn!("Sync request signature mismatch");
        Err(AuthError::InvalidSignature)
    }
}

/// Create or update a user pushed by a sibling domain.
///
/// POST /internal-sync-user
#[tracing::instrument(skip(state, headers, body))]
pub async fn sync_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AuthResult<Json<SyncResponse>> {
    verify_request(&state, &headers, &body)?;

    let request: SyncUserRequest =
        serde_json::from_slice(&body).map_err(|e| AuthError::Validation(e.to_string()))?;
    request.validate()?;

    let password_hash = if is_password_hash(&request.password) {
        request.password.clone()
    } else {
        hash_password(&request.password)?
    };
    let origin = UserOrigin::from(request.user_origin);

    let mut tx = state.db.begin().await?;
    let existing =
        db::find_user_by_uuid_or_email(&mut *tx, request.uuid, &request.personal_email).await?;

    match existing {
        None => {
            let status = if request.action == SyncAction::Deactivated {
                UserStatus::Inactive
            } else {
                UserStatus::Active
            };
            let user = db::insert_user(
                &mut *tx,
                &NewUser {
                    uuid: request.uuid,
                    first_name: &request.full_name,
                    last_name: &request.last_name,
                    email: &request.personal_email,
                    password_hash: &password_hash,
                    external_role: request.role.as_deref(),
                    status,
                    is_approved: true,
                    user_origin: origin,
                    two_factor_secret: None,
                    is_2fa_enabled: false,
                    is_2fa_verified: false,
                },
            )
            .await?;

            let keys = [origin.domain_key(), Some(state.config.default_domain_key.as_str())];
            for key in keys.into_iter().flatten() {
                if domains::attach_by_key(&mut *tx, user.id, key).await?.is_none() {
                    tracing::warn!(domain_key = %key, "Domain not found while linking synced user");
                }
            }
            tx.commit().await?;

            tracing::info!(user_id = user.id, origin = ?origin, "Synced user created");
        }
        Some(user) => {
            if user.uuid != request.uuid {
                tracing::warn!(
                    user_id = user.id,
                    stored_uuid = %user.uuid,
                    pushed_uuid = %request.uuid,
                    "Synced user matched by email; keeping stored uuid"
                );
            }
            let updated = db::update_user_identity(
                &mut *tx,
                user.id,
                &request.full_name,
                &request.last_name,
                &request.personal_email,
                request.role.as_deref(),
                &password_hash,
            )
            .await?;
            tx.commit().await?;

            tracing::info!(user_id = updated.id, origin = ?origin, action = ?request.action, "Synced user updated");
            spawn_propagation(
                state.db.clone(),
                state.downstream.clone(),
                updated,
                origin.domain_key().map(str::to_string),
            );
        }
    }

    Ok(Json(SyncResponse { message: "Synced" }))
}
