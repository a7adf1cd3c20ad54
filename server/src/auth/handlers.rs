//! Login, 2FA, Refresh and Logout Handlers

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::error::{AuthError, AuthResult};
use super::jwt::ExtraClaims;
use super::middleware::AuthUser;
use super::password::{verify_against_absent_user, verify_password};
use super::session::{issue_session, validate_refresh_token, SessionTokens};
use crate::activity::{self, ClientInfo};
use crate::api::AppState;
use crate::db::{self, AdminCounts, Role, User, UserStatus};
use crate::settings;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 255))]
    pub password: String,
    /// Set by the administrative panel's login form.
    #[serde(default)]
    pub admin_panel: bool,
}

/// 2FA verification request.
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyTwoFactorRequest {
    pub uuid: Uuid,
    #[validate(length(equal = 6))]
    pub code: String,
}

/// 2FA enrollment request.
#[derive(Debug, Deserialize)]
pub struct GenerateSecretRequest {
    pub uuid: Uuid,
}

/// Token refresh request.
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
    pub uuid: Uuid,
}

/// Public profile fields.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub uuid: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            uuid: user.uuid,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            role: user.effective_role(),
            image_url: user.image_url.clone(),
        }
    }
}

/// Successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    #[serde(flatten)]
    pub tokens: SessionTokens,
    /// Partner label; `role` is the resolved role.
    pub external_role: Option<String>,
    pub status: UserStatus,
    pub is_2fa_enabled: bool,
    pub is_2fa_verified: bool,
    pub enforce_2fa_login: bool,
    /// Aggregates for admin-panel logins.
    #[serde(flatten)]
    pub counts: Option<AdminCounts>,
}

/// 2FA enrollment payload.
#[derive(Debug, Serialize)]
pub struct TwoFactorSetupResponse {
    pub uuid: Uuid,
    pub qr_code_svg: String,
}

/// Access token minted from a refresh token.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub token: String,
    pub expires_in: i64,
}

// ============================================================================
// Helpers
// ============================================================================

fn check_standing(user: &User) -> AuthResult<()> {
    if !user.is_approved {
        return Err(AuthError::AccountNotApproved);
    }
    if user.status != UserStatus::Active {
        return Err(AuthError::AccountInactive);
    }
    Ok(())
}

async fn login_response(
    state: &AppState,
    user: &User,
    client: &ClientInfo,
    with_counts: bool,
) -> AuthResult<LoginResponse> {
    let tokens = issue_session(&state.db, &state.tokens, user, ExtraClaims::default()).await?;
    activity::record_login(&state.db, user.id, client).await;

    let counts = if with_counts {
        Some(db::admin_counts(&state.db).await?)
    } else {
        None
    };

    Ok(LoginResponse {
        profile: UserProfile::from(user),
        tokens,
        external_role: user.external_role.clone(),
        status: user.status,
        is_2fa_enabled: user.is_2fa_enabled,
        is_2fa_verified: user.is_2fa_verified,
        enforce_2fa_login: settings::enforce_2fa_login(&state.db).await,
        counts,
    })
}

/// Count a failed credential against the lockout policy.
async fn record_failure(state: &AppState, user: &User, factor: &'static str) -> AuthResult<()> {
    let policy = state.config.lockout_policy;
    let (attempts, locked_until) =
        db::record_failed_login(&state.db, user.id, policy.max_attempts, policy.lock_seconds())
            .await?;

    if policy.is_exceeded(attempts) {
        tracing::warn!(
            user_id = user.id,
            factor,
            failed_attempts = attempts,
            locked_until = ?locked_until,
            "Account locked after repeated failed logins"
        );
    } else {
        tracing::info!(user_id = user.id, factor, failed_attempts = attempts, "Failed login");
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Login with email and password.
///
/// Checks run in a fixed order and stop at the first failure: lock,
/// password, approval, status, 2FA enrollment, admin-panel role.
///
/// POST /auth/login
#[tracing::instrument(skip(state, client, body), fields(email = %body.email))]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<LoginRequest>,
) -> AuthResult<Json<LoginResponse>> {
    body.validate()?;

    let Some(user) = db::find_user_by_email(&state.db, &body.email).await? else {
        verify_against_absent_user(&body.password);
        return Err(AuthError::InvalidCredentials);
    };

    if user.is_locked_at(Utc::now()) {
        tracing::info!(user_id = user.id, "Login refused for locked account");
        return Err(AuthError::AccountLocked {
            until: user.locked_until,
        });
    }

    if !verify_password(&body.password, &user.password_hash)? {
        record_failure(&state, &user, "password").await?;
        return Err(AuthError::InvalidCredentials);
    }

    // A concurrent failure may have applied the lock since the check above.
    if !db::clear_failed_logins(&state.db, user.id).await? {
        return Err(AuthError::AccountLocked { until: None });
    }

    check_standing(&user)?;

    if state.config.two_factor_required && !user.is_2fa_verified {
        return Err(AuthError::TwoFactorSetupRequired { uuid: user.uuid });
    }

    if body.admin_panel && !user.is_admin() {
        tracing::warn!(user_id = user.id, "Non-admin attempted admin panel login");
        return Err(AuthError::InsufficientPrivileges);
    }

    let response = login_response(&state, &user, &client, body.admin_panel).await?;
    tracing::info!(user_id = user.id, admin_panel = body.admin_panel, "User logged in");
    Ok(Json(response))
}

/// Complete a login with a TOTP code.
///
/// The first successful code marks 2FA as verified. Every success issues
/// fresh tokens. Wrong codes count toward the lockout like wrong passwords.
///
/// POST /auth/login/verify-2fa
#[tracing::instrument(skip(state, client, body), fields(user_uuid = %body.uuid))]
pub async fn verify_two_factor(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<VerifyTwoFactorRequest>,
) -> AuthResult<Json<LoginResponse>> {
    body.validate()?;

    let mut user = db::find_user_by_uuid(&state.db, body.uuid)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    if user.is_locked_at(Utc::now()) {
        return Err(AuthError::AccountLocked {
            until: user.locked_until,
        });
    }

    let sealed = user
        .two_factor_secret
        .as_deref()
        .ok_or(AuthError::TwoFactorNotInitialized)?;
    let secret = state.sealer.open(sealed)?;

    if !state.two_factor.verify(&secret, &user.email, &body.code)? {
        record_failure(&state, &user, "totp").await?;
        return Err(AuthError::InvalidMfaCode);
    }

    if !db::clear_failed_logins(&state.db, user.id).await? {
        return Err(AuthError::AccountLocked { until: None });
    }

    check_standing(&user)?;

    if db::mark_two_factor_verified(&state.db, user.id).await? {
        tracing::info!(user_id = user.id, "2FA enrollment verified");
        user.is_2fa_verified = true;
    }

    Ok(Json(login_response(&state, &user, &client, false).await?))
}

/// Generate (or regenerate) a 2FA secret for an account that has not
/// completed enrollment.
///
/// POST /auth/generate-2fa-secret
#[tracing::instrument(skip(state, body), fields(user_uuid = %body.uuid))]
pub async fn generate_two_factor_secret(
    State(state): State<AppState>,
    Json(body): Json<GenerateSecretRequest>,
) -> AuthResult<Json<TwoFactorSetupResponse>> {
    let user = db::find_user_by_uuid(&state.db, body.uuid)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    if user.is_2fa_verified {
        return Err(AuthError::Conflict(
            "Two-factor authentication is already configured".into(),
        ));
    }

    let secret = super::two_factor::TwoFactor::generate_secret();
    let qr_code_svg = state.two_factor.qr_code_svg(&secret, &user.email)?;
    db::set_two_factor_secret(&state.db, user.id, &state.sealer.seal(&secret)?).await?;

    tracing::info!(user_id = user.id, "Issued 2FA enrollment secret");
    Ok(Json(TwoFactorSetupResponse {
        uuid: user.uuid,
        qr_code_svg,
    }))
}

/// Mint a new access token from a refresh token. The refresh token is not
/// rotated.
///
/// POST /token/refresh
#[tracing::instrument(skip(state, body), fields(user_uuid = %body.uuid))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AuthResult<Json<RefreshResponse>> {
    body.validate()?;

    if !validate_refresh_token(&state.db, body.uuid, &body.refresh_token).await? {
        return Err(AuthError::InvalidRefreshToken);
    }

    let user = db::find_user_by_uuid(&state.db, body.uuid)
        .await?
        .ok_or(AuthError::InvalidRefreshToken)?;
    check_standing(&user)?;

    let token = state
        .tokens
        .issue(user.uuid, &user.email, ExtraClaims::default())?;

    Ok(Json(RefreshResponse {
        token,
        expires_in: state.tokens.ttl_seconds(),
    }))
}

/// Blacklist the presented token until its natural expiry.
///
/// POST /auth/logout
#[tracing::instrument(skip(state, client, auth_user), fields(user_id = auth_user.id))]
pub async fn logout(
    State(state): State<AppState>,
    client: ClientInfo,
    auth_user: AuthUser,
) -> AuthResult<(StatusCode, Json<serde_json::Value>)> {
    db::blacklist_jti(
        &state.db,
        &auth_user.jti,
        auth_user.id,
        auth_user.token_expires_at,
    )
    .await?;
    activity::record_logout(&state.db, auth_user.id, &client).await;

    tracing::info!(jti = %auth_user.jti, "Token blacklisted at logout");
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Successfully logged out" })),
    ))
}

/// Profile of the token's subject.
///
/// GET /auth/validate
pub async fn validate(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AuthResult<Json<UserProfile>> {
    let user = db::find_user_by_id(&state.db, auth_user.id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Json(UserProfile::from(&user)))
}
