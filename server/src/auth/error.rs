//! Authentication Error Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Authentication error types.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid credentials (wrong email/password).
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Too many failed logins; the lock supersedes credentials.
    #[error("Account locked. Please contact an administrator.")]
    AccountLocked { until: Option<DateTime<Utc>> },

    /// Account is waiting for approval.
    #[error("Your account is pending approval. Please wait for confirmation or contact support.")]
    AccountNotApproved,

    /// Account status is not active.
    #[error("Account inactive")]
    AccountInactive,

    /// 2FA must be enrolled before login completes.
    #[error("Please configure Two-Factor Authentication using an authenticator app.")]
    TwoFactorSetupRequired { uuid: Uuid },

    /// Admin-only surface reached by a non-admin.
    #[error("Access denied: insufficient privileges to access the administrative panel.")]
    InsufficientPrivileges,

    /// Authorization denied for a specific reason.
    #[error("{0}")]
    Forbidden(String),

    /// User not found.
    #[error("User not found")]
    UserNotFound,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Email already registered.
    #[error("The email has already been taken.")]
    UserAlreadyExists,

    /// State conflict.
    #[error("{0}")]
    Conflict(String),

    /// Invalid or malformed token.
    #[error("Invalid token")]
    InvalidToken,

    /// Token could not be parsed or its signature did not verify.
    #[error("Invalid token")]
    MalformedToken,

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token was revoked at logout.
    #[error("Token blacklisted")]
    TokenBlacklisted,

    /// Token is valid but was minted for another issuer or audience.
    #[error("{0}")]
    ForeignToken(&'static str),

    /// Missing Authorization header.
    #[error("Token missing")]
    MissingAuthHeader,

    /// Invalid authorization header format.
    #[error("Invalid authorization header format")]
    InvalidAuthHeader,

    /// Refresh token did not match a live record.
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// 2FA verification attempted without a stored secret.
    #[error("2FA is not enabled for this user")]
    TwoFactorNotInitialized,

    /// Invalid 2FA code.
    #[error("Invalid 2FA code")]
    InvalidMfaCode,

    /// Pending signup session missing, expired or already used.
    #[error("Signup session expired or invalid")]
    SignupSessionInvalid,

    /// Signed request with a bad or missing signature.
    #[error("Unauthorized")]
    InvalidSignature,

    /// Validation error.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Password hashing error.
    #[error("Password processing failed")]
    PasswordHash,

    /// Database error.
    #[error("Database error")]
    Database(#[from] sqlx::Error),

    /// Internal server error.
    #[error("Internal server error")]
    Internal(String),
}

/// Error response body for JSON responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Client action hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
    /// Account the hint refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    /// When a lock expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

impl AuthError {
    /// HTTP status and stable error code.
    pub const fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidCredentials => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_credentials"),
            Self::AccountLocked { .. } => (StatusCode::LOCKED, "account_locked"),
            Self::AccountNotApproved => (StatusCode::FORBIDDEN, "account_not_approved"),
            Self::AccountInactive => (StatusCode::FORBIDDEN, "account_inactive"),
            Self::TwoFactorSetupRequired { .. } => (StatusCode::FORBIDDEN, "2fa_not_configured"),
            Self::InsufficientPrivileges => (StatusCode::FORBIDDEN, "unauthorized_access"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::UserNotFound => (StatusCode::NOT_FOUND, "user_not_found"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::UserAlreadyExists => (StatusCode::UNPROCESSABLE_ENTITY, "email_taken"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            Self::MalformedToken => (StatusCode::BAD_REQUEST, "invalid_token"),
            Self::TokenExpired => (StatusCode::UNAUTHORIZED, "token_expired"),
            Self::TokenBlacklisted => (StatusCode::UNAUTHORIZED, "token_blacklisted"),
            Self::ForeignToken(_) => (StatusCode::FORBIDDEN, "foreign_token"),
            Self::MissingAuthHeader => (StatusCode::UNAUTHORIZED, "token_missing"),
            Self::InvalidAuthHeader => (StatusCode::UNAUTHORIZED, "invalid_auth_header"),
            Self::InvalidRefreshToken => (StatusCode::UNAUTHORIZED, "invalid_refresh_token"),
            Self::TwoFactorNotInitialized => (StatusCode::BAD_REQUEST, "2fa_not_enabled"),
            Self::InvalidMfaCode => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_2fa_code"),
            Self::SignupSessionInvalid => (StatusCode::UNPROCESSABLE_ENTITY, "signup_session_invalid"),
            Self::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            Self::PasswordHash => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if let Self::Internal(ref detail) = self {
            tracing::error!(detail = %detail, "Internal error");
        }

        let (action, uuid, locked_until) = match &self {
            Self::TwoFactorSetupRequired { uuid } => {
                (Some("trigger_2fa_setup_modal"), Some(*uuid), None)
            }
            Self::AccountLocked { until } => (None, None, *until),
            _ => (None, None, None),
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
            action,
            uuid,
            locked_until,
        });

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Validation(e.to_string())
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
