//! Access Request Types

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::{AccessRequest, AccessRequestRow, RequestStatus, RequestType};

/// Longest accepted request message.
pub const MESSAGE_MAX_CHARS: u64 = 1000;

/// Largest page a caller may ask for.
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Deserialize, Validate)]
pub struct StoreRequest {
    #[validate(range(min = 1))]
    pub domain_id: i64,
    #[validate(length(max = MESSAGE_MAX_CHARS))]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    /// Re-approve a decided activation request to rerun the activation call.
    #[serde(default)]
    pub enable_user_activation: bool,
}

/// Status a domain reports for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalStatus {
    Active,
    Inactive,
}

impl ExternalStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExternalStatusRequest {
    pub external_active_status: ExternalStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UserExternalStatusRequest {
    #[validate(length(min = 1, max = 64))]
    pub domain_key: String,
    pub status: ExternalStatus,
}

/// Query string for listings.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<RequestStatus>,
    pub request_type: Option<RequestType>,
    pub domain_id: Option<i64>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Resolved listing filter.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Restrict to one requester.
    pub user_id: Option<i64>,
    pub status: Option<RequestStatus>,
    pub request_type: Option<RequestType>,
    pub domain_id: Option<i64>,
    pub search: Option<String>,
    pub page: i64,
    pub per_page: i64,
}

impl RequestFilter {
    pub fn from_query(query: ListQuery, default_per_page: i64, with_search: bool) -> Self {
        let search = with_search
            .then_some(query.search)
            .flatten()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            user_id: None,
            status: query.status,
            request_type: query.request_type,
            domain_id: query.domain_id,
            search,
            page: query.page.unwrap_or(1).max(1),
            per_page: query
                .per_page
                .unwrap_or(default_per_page)
                .clamp(1, MAX_PER_PAGE),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestPage {
    pub data: Vec<AccessRequestRow>,
    pub current_page: i64,
    pub per_page: i64,
    pub total: i64,
    pub last_page: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub un_approved_request_count: Option<i64>,
}

impl RequestPage {
    pub fn new(data: Vec<AccessRequestRow>, filter: &RequestFilter, total: i64) -> Self {
        Self {
            data,
            current_page: filter.page,
            per_page: filter.per_page,
            total,
            last_page: ((total + filter.per_page - 1) / filter.per_page).max(1),
            un_approved_request_count: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestEnvelope {
    pub message: &'static str,
    pub request: AccessRequest,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
