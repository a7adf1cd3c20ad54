//! Access Request Error Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::db::{RequestStatus, RequestType};

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You already have access to this domain")]
    AlreadyHasAccess,

    #[error("You do not have access to this domain. Please request access first.")]
    GrantRequired,

    #[error("{}", pending_message(.kind))]
    AlreadyPending {
        kind: RequestType,
        request_id: i64,
        created_at: DateTime<Utc>,
    },

    #[error("You are already active in that domain!")]
    AlreadyActive { domain_key: String },

    #[error("Request already processed")]
    AlreadyProcessed { current_status: RequestStatus },

    #[error("Only rejected requests can be resubmitted")]
    NotResubmittable { current_status: RequestStatus },

    #[error("You have reached the maximum number of pending requests")]
    PendingLimit,

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

const fn pending_message(kind: &RequestType) -> &'static str {
    match kind {
        RequestType::Access => "Request already pending",
        RequestType::Activation => "Activation request already pending",
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

#[derive(Debug, Serialize)]
pub struct AccessErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_key: Option<String>,
}

impl AccessError {
    pub const fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::AlreadyHasAccess => (StatusCode::CONFLICT, "ALREADY_HAS_ACCESS"),
            Self::GrantRequired => (StatusCode::CONFLICT, "GRANT_REQUIRED"),
            Self::AlreadyPending { .. } => (StatusCode::CONFLICT, "ALREADY_PENDING"),
            Self::AlreadyActive { .. } => (StatusCode::CONFLICT, "ALREADY_ACTIVE"),
            Self::AlreadyProcessed { .. } => (StatusCode::CONFLICT, "ALREADY_PROCESSED"),
            Self::NotResubmittable { .. } => (StatusCode::CONFLICT, "NOT_RESUBMITTABLE"),
            Self::PendingLimit => (StatusCode::TOO_MANY_REQUESTS, "PENDING_LIMIT"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if let Self::Database(ref e) = self {
            tracing::error!(error = %e, "Access request database error");
        }

        let mut body = AccessErrorBody {
            error: code,
            message: self.to_string(),
            current_status: None,
            request_id: None,
            created_at: None,
            external_status: None,
            domain_key: None,
        };
        match self {
            Self::AlreadyPending {
                request_id,
                created_at,
                ..
            } => {
                body.request_id = Some(request_id);
                body.created_at = Some(created_at);
            }
            Self::AlreadyActive { domain_key } => {
                body.external_status = Some("active");
                body.domain_key = Some(domain_key);
            }
            Self::AlreadyProcessed { current_status }
            | Self::NotResubmittable { current_status } => {
                body.current_status = Some(current_status);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AccessError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_and_cap_statuses() {
        let now = Utc::now();
        let pending = AccessError::AlreadyPending {
            kind: RequestType::Access,
            request_id: 7,
            created_at: now,
        };
        assert_eq!(pending.status_and_code().0, StatusCode::CONFLICT);
        assert_eq!(pending.to_string(), "Request already pending");

        let activation = AccessError::AlreadyPending {
            kind: RequestType::Activation,
            request_id: 7,
            created_at: now,
        };
        assert_eq!(activation.to_string(), "Activation request already pending");

        assert_eq!(
            AccessError::PendingLimit.status_and_code().0,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AccessError::NotFound("Access request").to_string(),
            "Access request not found"
        );
    }

    #[test]
    fn processed_response_carries_current_status() {
        let response = AccessError::AlreadyProcessed {
            current_status: RequestStatus::Approved,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
