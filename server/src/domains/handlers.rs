//! Domain Handlers

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{attach_with_parent, page_permission_path};
use crate::access::queries::settle_pending_for_domain;
use crate::api::AppState;
use crate::auth::{bearer_token, AuthError, AuthResult, AuthUser};
use crate::db::{self, Domain, RequestStatus, User};
use crate::sync::{jobs::spawn_page_permission, PermissionAction};

/// Domain as listed to a signed-in user.
#[derive(Debug, Serialize)]
pub struct DomainSummary {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub key: String,
}

impl From<Domain> for DomainSummary {
    fn from(d: Domain) -> Self {
        Self {
            id: d.id,
            name: d.name,
            url: d.url,
            key: d.key,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DomainsResponse {
    pub domains: Vec<DomainSummary>,
    pub assigned_domains: Vec<i64>,
    pub page_permissions: Vec<Value>,
}

/// All domains, the caller's grants and their page permissions.
///
/// GET /auth/domains
#[tracing::instrument(skip(state, auth, headers), fields(user_id = auth.id))]
pub async fn list_for_user(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AuthResult<Json<DomainsResponse>> {
    let domains = db::list_domains(&state.db).await?;
    let assigned_domains = if auth.is_admin() {
        domains.iter().map(|d| d.id).collect()
    } else {
        db::domain_ids_for_user(&state.db, auth.id).await?
    };

    let page_permissions = match bearer_token(&headers) {
        Ok(token) => state.downstream.fetch_page_permissions(token).await,
        Err(_) => Vec::new(),
    };

    Ok(Json(DomainsResponse {
        domains: domains.into_iter().map(DomainSummary::from).collect(),
        assigned_domains,
        page_permissions,
    }))
}

/// Domains granted to a user.
///
/// GET /admin/users/{uuid}/domains
#[tracing::instrument(skip(state))]
pub async fn user_domains(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> AuthResult<Json<Vec<DomainSummary>>> {
    let user = find_user(&state, uuid).await?;
    let granted = db::domain_ids_for_user(&state.db, user.id).await?;

    let domains = db::list_domains(&state.db)
        .await?
        .into_iter()
        .filter(|d| granted.contains(&d.id))
        .map(DomainSummary::from)
        .collect();
    Ok(Json(domains))
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub message: &'static str,
}

async fn find_user(state: &AppState, uuid: Uuid) -> AuthResult<User> {
    db::find_user_by_uuid(&state.db, uuid)
        .await?
        .ok_or(AuthError::UserNotFound)
}

async fn find_domain(state: &AppState, id: i64) -> AuthResult<Domain> {
    db::find_domain_by_id(&state.db, id).await?.ok_or_else(|| {
        tracing::info!(domain_id = id, "Domain not found");
        AuthError::NotFound("Domain".into())
    })
}

fn sync_page_permission(state: &AppState, user: &User, domain: &Domain, action: PermissionAction) {
    if let Some(permission) = page_permission_path(&domain.key) {
        spawn_page_permission(state.downstream.clone(), user.uuid, permission, action);
    }
}

/// Grant a domain directly, closing pending requests for it as approved.
///
/// POST /admin/users/{uuid}/domains/{domain_id}
#[tracing::instrument(skip(state, auth), fields(admin_id = auth.id))]
pub async fn grant(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((uuid, domain_id)): Path<(Uuid, i64)>,
) -> AuthResult<Json<GrantResponse>> {
    let user = find_user(&state, uuid).await?;
    let domain = find_domain(&state, domain_id).await?;

    let mut tx = state.db.begin().await?;
    attach_with_parent(&mut *tx, user.id, &domain).await?;
    let settled =
        settle_pending_for_domain(&mut *tx, user.id, domain.id, RequestStatus::Approved, auth.id)
            .await?;
    tx.commit().await?;

    tracing::info!(user_id = user.id, domain_key = %domain.key, settled, "Domain granted");
    sync_page_permission(&state, &user, &domain, PermissionAction::Assign);

    Ok(Json(GrantResponse {
        message: "Access granted",
    }))
}

/// Revoke a domain, closing pending requests for it as rejected.
///
/// DELETE /admin/users/{uuid}/domains/{domain_id}
#[tracing::instrument(skip(state, auth), fields(admin_id = auth.id))]
pub async fn revoke(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((uuid, domain_id)): Path<(Uuid, i64)>,
) -> AuthResult<Json<GrantResponse>> {
    let user = find_user(&state, uuid).await?;
    let domain = find_domain(&state, domain_id).await?;

    let mut tx = state.db.begin().await?;
    let removed = db::detach_domain(&mut *tx, user.id, domain.id).await?;
    let settled =
        settle_pending_for_domain(&mut *tx, user.id, domain.id, RequestStatus::Rejected, auth.id)
            .await?;
    tx.commit().await?;

    tracing::info!(user_id = user.id, domain_key = %domain.key, removed, settled, "Domain revoked");
    sync_page_permission(&state, &user, &domain, PermissionAction::Revoke);

    Ok(Json(GrantResponse {
        message: "Access revoked",
    }))
}
