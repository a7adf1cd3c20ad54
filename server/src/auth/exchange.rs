//! Cross-Domain Token Exchange
//!
//! A downstream domain presents a token the user obtained here and gets
//! back the profile it needs to open a local session. Checks run in a
//! fixed order; the first failure ends the exchange.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use super::jwt::TokenError;
use super::middleware::{resolve_claims, Standing};
use crate::activity::{self, ClientInfo};
use crate::api::AppState;
use crate::db::{self, User};

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub token: String,
    /// Key of the domain asking.
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExchangedUser {
    pub uuid: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl From<&User> for ExchangedUser {
    fn from(user: &User) -> Self {
        let mut roles = vec![user.effective_role().as_str().to_string()];
        if let Some(external) = user.external_role.as_deref() {
            if !roles.iter().any(|r| r.eq_ignore_ascii_case(external)) {
                roles.push(external.to_string());
            }
        }

        Self {
            uuid: user.uuid,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            roles,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub user: ExchangedUser,
}

/// Map decode failures to the exchange's wire contract.
const fn exchange_decode_error(e: TokenError) -> AuthError {
    match e {
        TokenError::Invalid => AuthError::MalformedToken,
        TokenError::Expired => AuthError::TokenExpired,
        TokenError::ForeignIssuer => AuthError::ForeignToken("Token issuer is not trusted"),
        TokenError::ForeignAudience => AuthError::ForeignToken("Token audience is not accepted"),
    }
}

/// Redeem an access token for a domain-scoped profile.
///
/// POST /auth/token/exchange
#[tracing::instrument(skip(state, client, body), fields(domain_key = ?body.key))]
pub async fn exchange_token(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(body): Json<ExchangeRequest>,
) -> AuthResult<Json<ExchangeResponse>> {
    let claims = state
        .tokens
        .decode(&body.token)
        .map_err(exchange_decode_error)?;

    let user = resolve_claims(&state, &claims, Standing::Approved).await?;

    let key = body
        .key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AuthError::Validation("The key field is required.".into()))?;

    let mut conn = state.db.acquire().await?;
    let Some(domain) = db::find_domain_by_key(&mut *conn, key).await? else {
        tracing::info!(domain_key = %key, "Token exchange for unknown domain");
        return Err(AuthError::NotFound("Domain".into()));
    };

    if !user.is_admin() && !db::user_has_domain(&mut *conn, user.id, domain.id).await? {
        tracing::warn!(user_id = user.id, domain_key = %key, "Token exchange without grant");
        return Err(AuthError::Forbidden(
            "You do not have access to this domain".into(),
        ));
    }
    drop(conn);

    activity::record_domain_login(&state.db, user.id, domain.id, &client).await;
    tracing::info!(user_id = user.id, domain_key = %key, "Token exchanged");

    Ok(Json(ExchangeResponse {
        user: ExchangedUser::from(&user),
    }))
}
