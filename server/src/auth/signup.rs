//! Signup
//!
//! Two flows create accounts:
//! - the single-step form (`POST /auth/signup`), 2FA enrolled later;
//! - the 2FA flow: `initiate-2fa` parks the form and a fresh secret in the
//!   ephemeral store, `complete-2fa` consumes it with a valid code and
//!   creates the account already enrolled.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Duration;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;
use validator::Validate;

use super::error::{AuthError, AuthResult};
use super::handlers::UserProfile;
use super::jwt::ExtraClaims;
use super::password::hash_password;
use super::session::{issue_session, SessionTokens};
use super::two_factor::TwoFactor;
use crate::api::AppState;
use crate::db::{self, is_unique_violation, NewUser, User, UserOrigin, UserStatus};
use crate::domains;
use crate::ephemeral::{storage_key, EphemeralError, EPHEMERAL_TTL_SECONDS, SIGNUP_PREFIX};

const SESSION_ID_LEN: usize = 40;

/// Signup form shared by both flows.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 255))]
    pub first_name: String,
    #[validate(length(max = 255))]
    #[serde(default)]
    pub last_name: String,
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(must_match(other = "password"))]
    pub password_confirmation: String,
    /// Signup source; the auto-approve key approves immediately.
    pub key: Option<String>,
}

/// Form plus secret parked between the two 2FA signup steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingSignup {
    first_name: String,
    last_name: String,
    email: String,
    password_hash: String,
    key: Option<String>,
    secret: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CompleteSignupRequest {
    #[validate(length(min = 1))]
    pub session_id: String,
    #[validate(length(equal = 6))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct InitiateSignupResponse {
    pub session_id: String,
    pub qr_code_svg: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user: UserProfile,
    pub is_approved: bool,
}

#[derive(Debug, Serialize)]
pub struct CompleteSignupResponse {
    #[serde(flatten)]
    pub tokens: SessionTokens,
    pub user: UserProfile,
    pub is_approved: bool,
}

fn new_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

fn auto_approved(state: &AppState, key: Option<&str>) -> bool {
    key.is_some_and(|k| k == state.config.auto_approve_signup_key)
}

/// Insert the account and attach the default domain inside `conn`'s
/// transaction. Email uniqueness is rechecked here.
async fn create_account(
    state: &AppState,
    conn: &mut PgConnection,
    new: &NewUser<'_>,
) -> AuthResult<User> {
    if db::email_exists(conn, new.email).await? {
        return Err(AuthError::UserAlreadyExists);
    }

    let user = db::insert_user(conn, new).await.map_err(|e| {
        if is_unique_violation(&e) {
            AuthError::UserAlreadyExists
        } else {
            AuthError::Database(e)
        }
    })?;

    if domains::attach_by_key(conn, user.id, &state.config.default_domain_key)
        .await?
        .is_none()
    {
        tracing::warn!(
            domain_key = %state.config.default_domain_key,
            "Default domain missing; new account has no grant"
        );
    }

    Ok(user)
}

/// Single-step signup.
///
/// POST /auth/signup
#[tracing::instrument(skip(state, body), fields(email = %body.email))]
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> AuthResult<(StatusCode, Json<SignupResponse>)> {
    body.validate()?;

    let password_hash = hash_password(&body.password)?;
    let is_approved = auto_approved(&state, body.key.as_deref());

    let mut tx = state.db.begin().await?;
    let user = create_account(
        &state,
        &mut *tx,
        &NewUser {
            uuid: Uuid::new_v4(),
            first_name: &body.first_name,
            last_name: &body.last_name,
            email: &body.email,
            password_hash: &password_hash,
            external_role: None,
            status: UserStatus::Active,
            is_approved,
            user_origin: UserOrigin::Authcenter,
            two_factor_secret: None,
            is_2fa_enabled: false,
            is_2fa_verified: false,
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = user.id, is_approved, "User signed up");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user: UserProfile::from(&user),
            is_approved,
        }),
    ))
}

/// Park a signup form with a fresh 2FA secret.
///
/// POST /auth/signup/initiate-2fa
#[tracing::instrument(skip(state, body), fields(email = %body.email))]
pub async fn initiate_two_factor_signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> AuthResult<Json<InitiateSignupResponse>> {
    body.validate()?;

    let mut conn = state.db.acquire().await?;
    if db::email_exists(&mut *conn, &body.email).await? {
        return Err(AuthError::UserAlreadyExists);
    }
    drop(conn);

    let secret = TwoFactor::generate_secret();
    let qr_code_svg = state.two_factor.qr_code_svg(&secret, &body.email)?;
    let pending = PendingSignup {
        first_name: body.first_name,
        last_name: body.last_name,
        email: body.email,
        password_hash: hash_password(&body.password)?,
        key: body.key,
        secret,
    };

    let session_id = new_session_id();
    state
        .ephemeral
        .put(
            &storage_key(SIGNUP_PREFIX, &session_id),
            &pending,
            Duration::seconds(EPHEMERAL_TTL_SECONDS),
        )
        .await
        .map_err(|e| AuthError::Internal(format!("Failed to park signup: {e}")))?;

    Ok(Json(InitiateSignupResponse {
        session_id,
        qr_code_svg,
        expires_in: EPHEMERAL_TTL_SECONDS,
    }))
}

/// Create the account once the first TOTP code checks out.
///
/// The session is consumed before the code is checked, so a wrong code
/// ends the session too.
///
/// POST /auth/signup/complete-2fa
#[tracing::instrument(skip(state, body))]
pub async fn complete_two_factor_signup(
    State(state): State<AppState>,
    Json(body): Json<CompleteSignupRequest>,
) -> AuthResult<(StatusCode, Json<CompleteSignupResponse>)> {
    body.validate()?;

    let pending: PendingSignup = state
        .ephemeral
        .consume(&storage_key(SIGNUP_PREFIX, &body.session_id))
        .await
        .map_err(|e| match e {
            e if e.is_unusable_record() => {
                tracing::info!(reason = %e, "Signup session unusable");
                AuthError::SignupSessionInvalid
            }
            EphemeralError::Serialization(detail) | EphemeralError::Backend(detail) => {
                AuthError::Internal(format!("Signup session store: {detail}"))
            }
            _ => AuthError::SignupSessionInvalid,
        })?;

    if !state
        .two_factor
        .verify(&pending.secret, &pending.email, &body.code)?
    {
        return Err(AuthError::InvalidMfaCode);
    }

    let sealed = state.sealer.seal(&pending.secret)?;
    let is_approved = auto_approved(&state, pending.key.as_deref());

    let mut tx = state.db.begin().await?;
    let user = create_account(
        &state,
        &mut *tx,
        &NewUser {
            uuid: Uuid::new_v4(),
            first_name: &pending.first_name,
            last_name: &pending.last_name,
            email: &pending.email,
            password_hash: &pending.password_hash,
            external_role: None,
            status: UserStatus::Active,
            is_approved,
            user_origin: UserOrigin::Authcenter,
            two_factor_secret: Some(&sealed),
            is_2fa_enabled: true,
            is_2fa_verified: true,
        },
    )
    .await?;
    tx.commit().await?;

    let tokens = issue_session(&state.db, &state.tokens, &user, ExtraClaims::default()).await?;

    tracing::info!(user_id = user.id, is_approved, "User signed up with 2FA");
    Ok((
        StatusCode::CREATED,
        Json(CompleteSignupResponse {
            tokens,
            user: UserProfile::from(&user),
            is_approved,
        }),
    ))
}
