//! Access Request State Machine
//!
//! Pure checks for creating and deciding requests. Handlers gather the
//! facts, these functions decide, the queries apply the result.

use chrono::{DateTime, Utc};

use super::error::AccessError;
use crate::db::{AccessRequest, RequestStatus, RequestType};

/// A decision applied to an existing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `reactivate` permits re-approving a decided request.
    Approve { reactivate: bool },
    Reject,
    Resubmit,
}

/// Target status for `transition` from `current`.
pub fn next_status(
    current: RequestStatus,
    transition: Transition,
) -> Result<RequestStatus, AccessError> {
    match (transition, current) {
        (Transition::Approve { .. }, RequestStatus::Pending)
        | (Transition::Approve { reactivate: true }, _) => Ok(RequestStatus::Approved),
        (Transition::Reject, RequestStatus::Pending) => Ok(RequestStatus::Rejected),
        (Transition::Resubmit, RequestStatus::Rejected) => Ok(RequestStatus::Pending),
        (Transition::Resubmit, current_status) => {
            Err(AccessError::NotResubmittable { current_status })
        }
        (_, current_status) => Err(AccessError::AlreadyProcessed { current_status }),
    }
}

/// Existing pending request blocking a new one.
#[derive(Debug, Clone, Copy)]
pub struct PendingRef {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&AccessRequest> for PendingRef {
    fn from(request: &AccessRequest) -> Self {
        Self {
            id: request.id,
            created_at: request.created_at,
        }
    }
}

/// Facts gathered before creating a request.
#[derive(Debug, Clone)]
pub struct CreateContext {
    pub has_grant: bool,
    /// Pending request of the same type for the same domain.
    pub pending: Option<PendingRef>,
    /// Pending requests the user holds across all domains.
    pub pending_count: i64,
    pub pending_cap: i64,
    /// Domain already reports the user active (activation only).
    pub externally_active: bool,
    pub domain_key: String,
}

/// Check creation preconditions in order: grant, duplicate, status, cap.
pub fn check_create(kind: RequestType, ctx: &CreateContext) -> Result<(), AccessError> {
    match kind {
        RequestType::Access if ctx.has_grant => return Err(AccessError::AlreadyHasAccess),
        RequestType::Activation if !ctx.has_grant => return Err(AccessError::GrantRequired),
        _ => {}
    }

    if let Some(pending) = ctx.pending {
        return Err(AccessError::AlreadyPending {
            kind,
            request_id: pending.id,
            created_at: pending.created_at,
        });
    }

    if kind == RequestType::Activation && ctx.externally_active {
        return Err(AccessError::AlreadyActive {
            domain_key: ctx.domain_key.clone(),
        });
    }

    if ctx.pending_count >= ctx.pending_cap {
        return Err(AccessError::PendingLimit);
    }

    Ok(())
}

/// Facts gathered under the row lock before a resubmission.
#[derive(Debug, Clone, Copy)]
pub struct ResubmitContext {
    /// Another pending request of the same type for the same domain.
    pub pending: Option<PendingRef>,
    pub pending_count: i64,
    pub pending_cap: i64,
}

/// A resubmitted request re-enters the queue, so the duplicate and cap
/// rules of [`check_create`] apply to it as well.
pub fn check_resubmit(kind: RequestType, ctx: &ResubmitContext) -> Result<(), AccessError> {
    if let Some(pending) = ctx.pending {
        return Err(AccessError::AlreadyPending {
            kind,
            request_id: pending.id,
            created_at: pending.created_at,
        });
    }
    if ctx.pending_count >= ctx.pending_cap {
        return Err(AccessError::PendingLimit);
    }
    Ok(())
}

/// Whether `actor` may delete `request`.
pub fn can_delete(request: &AccessRequest, actor_id: i64, actor_is_admin: bool) -> bool {
    actor_is_admin || (request.user_id == actor_id && request.status == RequestStatus::Pending)
}

/// Note written over the message on resubmission.
pub fn resubmission_message(now: DateTime<Utc>) -> String {
    format!(
        "User requested access again for this domain. Please review it. (Automatic message - {})",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}
