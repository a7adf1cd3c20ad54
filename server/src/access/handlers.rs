//! Access Request Handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use super::activation::{self, ActivationTarget};
use super::error::{AccessError, AccessResult};
use super::queries::{self, NewAccessRequest};
use super::transitions::{self, CreateContext, PendingRef, ResubmitContext, Transition};
use super::types::{
    ApproveRequest, ExternalStatus, ExternalStatusRequest, ListQuery, MessageResponse,
    RequestEnvelope, RequestFilter, RequestPage, StoreRequest, UserExternalStatusRequest,
};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::db::{self, is_unique_violation, AccessRequest, Domain, RequestStatus, RequestType};
use crate::domains;

async fn load_request(state: &AppState, id: i64) -> AccessResult<AccessRequest> {
    queries::find_request(&state.db, id).await?.ok_or_else(|| {
        tracing::info!(request_id = id, "Access request not found");
        AccessError::NotFound("Access request")
    })
}

async fn load_domain(state: &AppState, id: i64) -> AccessResult<Domain> {
    db::find_domain_by_id(&state.db, id).await?.ok_or_else(|| {
        tracing::info!(domain_id = id, "Domain not found");
        AccessError::NotFound("Domain")
    })
}

fn activation_target(request: &AccessRequest, domain_key: &str) -> ActivationTarget {
    ActivationTarget {
        request_id: request.id,
        user_id: request.user_id,
        user_uuid: request.user_uuid,
        domain_key: domain_key.to_string(),
    }
}

/// List requests. Non-admins only see their own.
///
/// GET /access-requests
#[tracing::instrument(skip(state, auth), fields(user_id = auth.id))]
pub async fn index(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> AccessResult<Json<RequestPage>> {
    let mut filter =
        RequestFilter::from_query(query, state.config.access_request_page_size, false);
    if !auth.is_admin() {
        filter.user_id = Some(auth.id);
    }

    let (rows, total) = queries::list_requests(&state.db, &filter).await?;
    let mut page = RequestPage::new(rows, &filter, total);
    page.un_approved_request_count = Some(queries::count_pending(&state.db).await?);

    Ok(Json(page))
}

/// Search all requests by requester, domain or message.
///
/// GET /access-requests/search
#[tracing::instrument(skip(state))]
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AccessResult<Json<RequestPage>> {
    let filter = RequestFilter::from_query(query, state.config.access_request_page_size, true);
    let (rows, total) = queries::list_requests(&state.db, &filter).await?;
    Ok(Json(RequestPage::new(rows, &filter, total)))
}

/// Map a lost race on the one-pending-per-domain index to the request
/// that won it.
async fn pending_conflict(
    state: &AppState,
    user_id: i64,
    domain_id: i64,
    kind: RequestType,
    error: sqlx::Error,
) -> AccessError {
    let existing = match state.db.acquire().await {
        Ok(mut conn) => queries::find_pending(&mut *conn, user_id, domain_id, kind).await,
        Err(e) => Err(e),
    };
    match existing {
        Ok(Some(pending)) => AccessError::AlreadyPending {
            kind,
            request_id: pending.id,
            created_at: pending.created_at,
        },
        Ok(None) => AccessError::Database(error),
        Err(e) => AccessError::Database(e),
    }
}

async fn create(
    state: &AppState,
    auth: &AuthUser,
    body: StoreRequest,
    kind: RequestType,
) -> AccessResult<AccessRequest> {
    body.validate()?;
    let domain = load_domain(state, body.domain_id).await?;

    let externally_active = if kind == RequestType::Activation {
        db::find_user_by_id(&state.db, auth.id)
            .await?
            .is_some_and(|u| u.external_status_for(&domain.key) == Some("active"))
    } else {
        false
    };

    let mut tx = state.db.begin().await?;
    let ctx = CreateContext {
        has_grant: db::user_has_domain(&mut *tx, auth.id, domain.id).await?,
        pending: queries::find_pending(&mut *tx, auth.id, domain.id, kind)
            .await?
            .as_ref()
            .map(PendingRef::from),
        pending_count: queries::count_pending_for_user(&mut *tx, auth.id).await?,
        pending_cap: state.config.max_pending_requests,
        externally_active,
        domain_key: domain.key.clone(),
    };
    transitions::check_create(kind, &ctx)?;

    let inserted = queries::insert_request(
        &mut *tx,
        &NewAccessRequest {
            user_uuid: auth.uuid,
            user_id: auth.id,
            domain_id: domain.id,
            domain_name: &domain.name,
            request_type: kind,
            message: body.message.as_deref(),
        },
    )
    .await;

    let request = match inserted {
        Ok(request) => request,
        Err(e) if is_unique_violation(&e) => {
            drop(tx);
            return Err(pending_conflict(state, auth.id, domain.id, kind, e).await);
        }
        Err(e) => return Err(e.into()),
    };
    tx.commit().await?;

    tracing::info!(
        request_id = request.id,
        domain_key = %domain.key,
        request_type = ?kind,
        "Access request created"
    );
    Ok(request)
}

/// Request access to a domain.
///
/// POST /access-requests
#[tracing::instrument(skip(state, auth, body), fields(user_id = auth.id, domain_id = body.domain_id))]
pub async fn store(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<StoreRequest>,
) -> AccessResult<(StatusCode, Json<RequestEnvelope>)> {
    let request = create(&state, &auth, body, RequestType::Access).await?;
    Ok((
        StatusCode::CREATED,
        Json(RequestEnvelope {
            message: "Access request submitted successfully",
            request,
        }),
    ))
}

/// Ask to be reactivated in a granted domain.
///
/// POST /activation-requests
///
/// The request stays pending for an administrator; who deactivated the
/// user is looked up in the background.
#[tracing::instrument(skip(state, auth, body), fields(user_id = auth.id, domain_id = body.domain_id))]
pub async fn store_activation(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<StoreRequest>,
) -> AccessResult<(StatusCode, Json<RequestEnvelope>)> {
    let request = create(&state, &auth, body, RequestType::Activation).await?;

    let domain = load_domain(&state, request.domain_id).await?;
    activation::spawn_deactivation_lookup(
        state.db.clone(),
        state.downstream.clone(),
        activation_target(&request, &domain.key),
    );

    Ok((
        StatusCode::CREATED,
        Json(RequestEnvelope {
            message: "Activation request submitted successfully",
            request,
        }),
    ))
}

/// Approve a request and attach the grant in one transaction.
///
/// POST /access-requests/{id}/approve
#[tracing::instrument(skip(state, auth, body), fields(admin_id = auth.id))]
pub async fn approve(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<ApproveRequest>>,
) -> AccessResult<Json<RequestEnvelope>> {
    let reactivate = body.is_some_and(|Json(b)| b.enable_user_activation);
    let transition = Transition::Approve { reactivate };

    let current = load_request(&state, id).await?;
    transitions::next_status(current.status, transition)?;
    let domain = load_domain(&state, current.domain_id).await?;

    let activate = reactivate && current.request_type == RequestType::Activation;
    if activate {
        let already_active = db::find_user_by_id(&state.db, current.user_id)
            .await?
            .is_some_and(|u| u.external_status_for(&domain.key) == Some("active"));
        if already_active {
            return Err(AccessError::AlreadyActive {
                domain_key: domain.key,
            });
        }
    }

    let mut tx = state.db.begin().await?;
    let locked = queries::lock_request(&mut *tx, id)
        .await?
        .ok_or(AccessError::NotFound("Access request"))?;
    let status = transitions::next_status(locked.status, transition)?;
    let request = queries::decide(&mut *tx, id, status, auth.id).await?;
    domains::attach_with_parent(&mut *tx, request.user_id, &domain).await?;
    tx.commit().await?;

    tracing::info!(request_id = id, domain_key = %domain.key, activate, "Access request approved");

    if activate {
        activation::spawn_activation(
            state.db.clone(),
            state.downstream.clone(),
            activation_target(&request, &domain.key),
        );
    }

    Ok(Json(RequestEnvelope {
        message: "Request approved successfully",
        request,
    }))
}

/// Reject a pending request. Grants are untouched.
///
/// POST /access-requests/{id}/reject
#[tracing::instrument(skip(state, auth), fields(admin_id = auth.id))]
pub async fn reject(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AccessResult<Json<RequestEnvelope>> {
    let mut tx = state.db.begin().await?;
    let locked = queries::lock_request(&mut *tx, id).await?.ok_or_else(|| {
        tracing::info!(request_id = id, "Access request not found");
        AccessError::NotFound("Access request")
    })?;
    let status = transitions::next_status(locked.status, Transition::Reject)?;
    let request = queries::decide(&mut *tx, id, status, auth.id).await?;
    tx.commit().await?;

    tracing::info!(request_id = id, "Access request rejected");
    Ok(Json(RequestEnvelope {
        message: "Request rejected successfully",
        request,
    }))
}

/// Put one's own rejected request back in the queue.
///
/// PATCH /access-requests/{id}/resubmit
#[tracing::instrument(skip(state, auth), fields(user_id = auth.id))]
pub async fn resubmit(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AccessResult<Json<RequestEnvelope>> {
    let mut tx = state.db.begin().await?;
    let locked = queries::lock_request(&mut *tx, id).await?.ok_or_else(|| {
        tracing::info!(request_id = id, "Access request not found");
        AccessError::NotFound("Access request")
    })?;
    if locked.user_id != auth.id {
        return Err(AccessError::Forbidden(
            "You can only resubmit your own requests",
        ));
    }
    transitions::next_status(locked.status, Transition::Resubmit)?;

    let kind = locked.request_type;
    let ctx = ResubmitContext {
        pending: queries::find_pending(&mut *tx, auth.id, locked.domain_id, kind)
            .await?
            .as_ref()
            .map(PendingRef::from),
        pending_count: queries::count_pending_for_user(&mut *tx, auth.id).await?,
        pending_cap: state.config.max_pending_requests,
    };
    transitions::check_resubmit(kind, &ctx)?;

    let message = transitions::resubmission_message(Utc::now());
    let request = match queries::resubmit(&mut *tx, id, &message).await {
        Ok(Some(request)) => request,
        Ok(None) => {
            return Err(AccessError::NotResubmittable {
                current_status: locked.status,
            })
        }
        Err(e) if is_unique_violation(&e) => {
            drop(tx);
            return Err(pending_conflict(&state, auth.id, locked.domain_id, kind, e).await);
        }
        Err(e) => return Err(e.into()),
    };
    tx.commit().await?;

    tracing::info!(request_id = id, "Access request resubmitted");
    Ok(Json(RequestEnvelope {
        message: "Request resubmitted successfully",
        request,
    }))
}

/// Delete a request: admins any, requesters their own pending ones.
///
/// DELETE /access-requests/{id}
#[tracing::instrument(skip(state, auth), fields(user_id = auth.id))]
pub async fn destroy(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AccessResult<Json<MessageResponse>> {
    let request = load_request(&state, id).await?;
    if !transitions::can_delete(&request, auth.id, auth.is_admin()) {
        return Err(AccessError::Forbidden(
            "You can only delete your own pending requests",
        ));
    }

    queries::delete_request(&state.db, id).await?;
    tracing::info!(request_id = id, "Access request deleted");

    Ok(Json(MessageResponse {
        message: "Request deleted successfully",
    }))
}

/// Record the domain-reported status on a request.
///
/// PATCH /access-requests/{id}/external-status
#[tracing::instrument(skip(state, body))]
pub async fn update_external_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ExternalStatusRequest>,
) -> AccessResult<Json<RequestEnvelope>> {
    let request = queries::set_external_status(&state.db, id, body.external_active_status.as_str())
        .await?
        .ok_or(AccessError::NotFound("Access request"))?;

    Ok(Json(RequestEnvelope {
        message: "External status updated successfully",
        request,
    }))
}

#[derive(Debug, Serialize)]
pub struct UserExternalStatusResponse {
    pub message: &'static str,
    pub user_uuid: Uuid,
    pub domain_key: String,
    pub status: ExternalStatus,
}

/// Set one entry of a user's per-domain status map.
///
/// PATCH /users/{uuid}/external-status
#[tracing::instrument(skip(state, body))]
pub async fn update_user_external_status(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<UserExternalStatusRequest>,
) -> AccessResult<Json<UserExternalStatusResponse>> {
    body.validate()?;

    let mut conn = state.db.acquire().await?;
    if db::find_domain_by_key(&mut *conn, &body.domain_key)
        .await?
        .is_none()
    {
        tracing::warn!(domain_key = %body.domain_key, "External status for unknown domain");
        return Err(AccessError::NotFound("Domain"));
    }
    drop(conn);

    let user = db::find_user_by_uuid(&state.db, uuid)
        .await?
        .ok_or(AccessError::NotFound("User"))?;
    db::set_user_external_status(&state.db, user.id, &body.domain_key, body.status.as_str())
        .await?;

    Ok(Json(UserExternalStatusResponse {
        message: "User activation status updated successfully",
        user_uuid: uuid,
        domain_key: body.domain_key,
        status: body.status,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeactivationResponse {
    pub request_id: i64,
    pub deactivate_info: Option<Value>,
}

/// Refresh who deactivated the requester, falling back to what is stored.
///
/// GET /access-requests/{id}/deactivated-by
#[tracing::instrument(skip(state))]
pub async fn deactivated_by(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AccessResult<Json<DeactivationResponse>> {
    let request = load_request(&state, id).await?;
    let domain = load_domain(&state, request.domain_id).await?;

    let fresh = activation::refresh_deactivation_info(
        &state.db,
        &state.downstream,
        &activation_target(&request, &domain.key),
    )
    .await;

    Ok(Json(DeactivationResponse {
        request_id: id,
        deactivate_info: fresh.or(request.deactivate_info),
    }))
}
