//! OAuth2 error responses (RFC 6749 section 5.2).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::ephemeral::EphemeralError;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("{0}")]
    InvalidRequest(&'static str),

    #[error("{0}")]
    InvalidClient(&'static str),

    #[error("{0}")]
    InvalidGrant(&'static str),

    #[error("Only the authorization_code grant is supported")]
    UnsupportedGrantType,

    #[error("{0}")]
    AccessDenied(&'static str),

    /// Bearer header missing on a protected OAuth endpoint.
    #[error("Authorization header missing or invalid")]
    MissingBearer,

    #[error("{0}")]
    InvalidToken(&'static str),

    #[error("Internal server error")]
    Server,
}

pub type OAuthResult<T> = Result<T, OAuthError>;

/// Wire body: `{error, error_description}`.
#[derive(Debug, Serialize)]
pub struct OAuthErrorBody {
    pub error: &'static str,
    pub error_description: String,
}

impl OAuthError {
    /// RFC 6749 error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::MissingBearer => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::AccessDenied(_) => "access_denied",
            Self::InvalidToken(_) => "invalid_token",
            Self::Server => "server_error",
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidClient(_)
            | Self::InvalidGrant(_)
            | Self::UnsupportedGrantType => StatusCode::BAD_REQUEST,
            Self::MissingBearer | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::Server => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> OAuthErrorBody {
        OAuthErrorBody {
            error: self.code(),
            error_description: self.to_string(),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<sqlx::Error> for OAuthError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "OAuth database error");
        Self::Server
    }
}

impl From<EphemeralError> for OAuthError {
    fn from(e: EphemeralError) -> Self {
        if e.is_unusable_record() {
            return Self::InvalidGrant("Authorization code not found or expired");
        }
        tracing::error!(error = %e, "Authorization code store failed");
        Self::Server
    }
}

/// Principal resolution failures seen by resource servers.
impl From<AuthError> for OAuthError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingAuthHeader | AuthError::InvalidAuthHeader => Self::MissingBearer,
            AuthError::UserNotFound => Self::InvalidToken("User not found"),
            AuthError::AccountNotApproved | AuthError::AccountInactive => {
                Self::AccessDenied("User account not approved or inactive")
            }
            AuthError::TokenBlacklisted => Self::InvalidToken("Token has been revoked"),
            AuthError::Database(_) | AuthError::Internal(_) | AuthError::PasswordHash => {
                tracing::error!(error = %e, "OAuth principal resolution failed");
                Self::Server
            }
            _ => Self::InvalidToken("Token is invalid or expired"),
        }
    }
}
