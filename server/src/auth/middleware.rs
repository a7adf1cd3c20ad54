//! Authenticated-Request Gate
//!
//! Every protected route runs [`require_auth`]: bearer token → decode →
//! blacklist → user lookup. Token exchange and OAuth validation reuse
//! [`resolve_claims`] so the three surfaces apply the same checks.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::api::AppState;
use crate::db::{self, Role, User, UserStatus};

use super::error::{AuthError, AuthResult};
use super::jwt::Claims;

/// Authenticated user injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Internal ID.
    pub id: i64,
    /// External ID (token subject).
    pub uuid: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Role after partner-role resolution.
    pub role: Role,
    pub external_role: Option<String>,
    /// `jti` of the presented token.
    pub jti: String,
    /// `exp` of the presented token.
    pub token_expires_at: DateTime<Utc>,
}

impl AuthUser {
    pub fn from_parts(user: &User, claims: &Claims) -> Self {
        Self {
            id: user.id,
            uuid: user.uuid,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.effective_role(),
            external_role: user.external_role.clone(),
            jti: claims.jti.clone(),
            token_expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// How much account standing a surface demands beyond a live token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    /// The account exists.
    Exists,
    /// The account is approved.
    Approved,
    /// The account is approved and active.
    ApprovedAndActive,
}

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)
}

/// Resolve decoded claims into a user.
///
/// Rejects blacklisted `jti`s, unknown subjects, and accounts short of the
/// requested standing. Performs no mutation.
pub async fn resolve_claims(
    state: &AppState,
    claims: &Claims,
    standing: Standing,
) -> AuthResult<User> {
    if db::is_jti_blacklisted(&state.db, &claims.jti).await? {
        tracing::debug!(jti = %claims.jti, "Rejected blacklisted token");
        return Err(AuthError::TokenBlacklisted);
    }

    let user = db::find_user_by_uuid(&state.db, claims.subject()?)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    match standing {
        Standing::Exists => {}
        Standing::Approved => {
            if !user.is_approved {
                return Err(AuthError::AccountNotApproved);
            }
        }
        Standing::ApprovedAndActive => {
            if !user.is_approved {
                return Err(AuthError::AccountNotApproved);
            }
            if user.status != UserStatus::Active {
                return Err(AuthError::AccountInactive);
            }
        }
    }

    Ok(user)
}

/// Decode a bearer token and resolve its principal.
pub async fn resolve_principal(
    state: &AppState,
    token: &str,
    standing: Standing,
) -> AuthResult<(User, Claims)> {
    let claims = state.tokens.decode(token)?;
    let user = resolve_claims(state, &claims, standing).await?;
    Ok((user, claims))
}

/// Middleware to require authentication.
///
/// Injects [`AuthUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(request.headers())?.to_owned();
    let (user, claims) = resolve_principal(&state, &token, Standing::Exists).await?;

    request
        .extensions_mut()
        .insert(AuthUser::from_parts(&user, &claims));

    Ok(next.run(request).await)
}

/// Middleware to require an admin-equivalent role. Layer inside
/// [`require_auth`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AuthError> {
    let is_admin = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuthHeader)?
        .is_admin();

    if !is_admin {
        return Err(AuthError::InsufficientPrivileges);
    }

    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}
