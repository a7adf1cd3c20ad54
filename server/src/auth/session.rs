//! Session Issuance and Refresh Tokens
//!
//! Refresh tokens are 128 random alphanumeric characters handed to the
//! client once; only their SHA-256 is stored. Validation does not rotate
//! them, so a token stays usable until it expires.

use chrono::{Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::error::AuthResult;
use super::hash_token;
use super::jwt::{ExtraClaims, TokenService};
use crate::db::{self, User};

/// Refresh token length in characters.
pub const REFRESH_TOKEN_LEN: usize = 128;

/// Access and refresh token pair returned on login.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTokens {
    pub token: String,
    pub refresh_token: String,
}

fn generate_refresh_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Mint and persist a refresh token for `user_uuid`.
pub async fn issue_refresh_token(
    pool: &PgPool,
    tokens: &TokenService,
    user_uuid: Uuid,
) -> AuthResult<String> {
    let secret = generate_refresh_secret();
    let expires_at = Utc::now() + Duration::seconds(tokens.refresh_ttl_seconds());

    db::insert_refresh_token(pool, user_uuid, &hash_token(&secret), expires_at).await?;
    Ok(secret)
}

/// Whether `candidate` is a live refresh token of `user_uuid`.
pub async fn validate_refresh_token(
    pool: &PgPool,
    user_uuid: Uuid,
    candidate: &str,
) -> AuthResult<bool> {
    if candidate.len() != REFRESH_TOKEN_LEN {
        return Ok(false);
    }
    Ok(db::refresh_token_is_valid(pool, user_uuid, &hash_token(candidate)).await?)
}

/// Issue an access token plus refresh token for a user.
pub async fn issue_session(
    pool: &PgPool,
    tokens: &TokenService,
    user: &User,
    extra: ExtraClaims,
) -> AuthResult<SessionTokens> {
    let token = tokens.issue(user.uuid, &user.email, extra)?;
    let refresh_token = issue_refresh_token(pool, tokens, user.uuid).await?;

    Ok(SessionTokens {
        token,
        refresh_token,
    })
}
