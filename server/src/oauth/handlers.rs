//! OAuth2 Authorization Code Flow with PKCE
//!
//! `/authorize` resolves the client to its user and parks an authorization
//! code in the ephemeral store. `/oauth/token` redeems it exactly once.

use axum::{
    extract::{FromRequest, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{OAuthError, OAuthResult};
use super::pkce;
use crate::api::AppState;
use crate::auth::{bearer_token, resolve_principal, session, ExtraClaims, Standing};
use crate::db::{self, User, UserStatus};
use crate::ephemeral::{storage_key, EPHEMERAL_TTL_SECONDS, OAUTH_CODE_PREFIX};

/// Scope fragment that requires partner administrator rights.
pub const ADMIN_SCOPE: &str = "admin:access";

const CODE_LEN: usize = 40;

/// Query of `GET /authorize`. Every field is optional so that problems
/// can be reported through the redirect.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeParams {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub code_verifier: Option<String>,
    pub admin_client_id: Option<String>,
}

/// Authorization code record held in the ephemeral store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub user_id: i64,
    pub user_uuid: Uuid,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
}

#[derive(Debug, Serialize)]
pub struct ValidatedUser {
    pub uuid: Uuid,
    pub email: String,
    pub full_name: String,
    pub last_name: String,
    pub status: UserStatus,
    pub image_full_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub user: ValidatedUser,
}

/// Token request body, accepted as JSON or as a urlencoded form.
pub struct TokenForm(pub TokenRequest);

impl<S: Send + Sync> FromRequest<S> for TokenForm {
    type Rejection = OAuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let body = if is_json {
            Json::<TokenRequest>::from_request(req, state)
                .await
                .map(|Json(body)| body)
                .ok()
        } else {
            Form::<TokenRequest>::from_request(req, state)
                .await
                .map(|Form(body)| body)
                .ok()
        };

        body.map(Self)
            .ok_or(OAuthError::InvalidRequest("Invalid request parameters"))
    }
}

fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LEN)
        .map(char::from)
        .collect()
}

/// 302 to `target`.
fn found(target: &Url) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, target.as_str())]).into_response()
}

/// 302 back to the client carrying an RFC 6749 error.
fn redirect_with_error(mut target: Url, error: &OAuthError, state: Option<&str>) -> Response {
    {
        let mut pairs = target.query_pairs_mut();
        pairs
            .append_pair("error", error.code())
            .append_pair("error_description", &error.to_string());
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            pairs.append_pair("state", state);
        }
    }
    found(&target)
}

/// Parse a client redirect URI; only absolute http(s) URLs qualify.
fn parse_redirect_uri(raw: Option<&str>) -> Option<Url> {
    let url = Url::parse(raw?.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

/// Whether `scope` asks for the admin panel.
pub fn wants_admin(scope: &str) -> bool {
    scope.contains(ADMIN_SCOPE)
}

/// Validated `/authorize` input.
#[derive(Debug)]
struct AuthorizeInput<'a> {
    client_id: &'a str,
    scope: &'a str,
    state: &'a str,
    code_challenge: &'a str,
}

fn check_authorize_params(params: &AuthorizeParams) -> OAuthResult<AuthorizeInput<'_>> {
    let invalid = OAuthError::InvalidRequest("Invalid request parameters");

    let (Some(client_id), Some(scope), Some(state), Some(code_challenge)) = (
        present(params.client_id.as_ref()),
        present(params.scope.as_ref()),
        present(params.state.as_ref()),
        present(params.code_challenge.as_ref()),
    ) else {
        return Err(invalid);
    };

    if params.response_type.as_deref() != Some("code")
        || params.code_challenge_method.as_deref() != Some(pkce::S256)
    {
        return Err(invalid);
    }

    Ok(AuthorizeInput {
        client_id,
        scope,
        state,
        code_challenge,
    })
}

/// Issue an authorization code.
///
/// GET /authorize
#[tracing::instrument(skip(state, params), fields(client_id = ?params.client_id))]
pub async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let Some(redirect_uri) = parse_redirect_uri(params.redirect_uri.as_deref()) else {
        tracing::info!("Authorization request without a usable redirect_uri");
        return OAuthError::InvalidRequest("Invalid request parameters").into_response();
    };
    let client_state = params.state.as_deref();

    match authorize_inner(&state, &params, &redirect_uri).await {
        Ok(code) => {
            let mut target = redirect_uri;
            {
                let mut pairs = target.query_pairs_mut();
                pairs.append_pair("code", &code);
                if let Some(s) = client_state {
                    pairs.append_pair("state", s);
                }
                if let Some(verifier) = params.code_verifier.as_deref() {
                    pairs.append_pair("code_verifier", verifier);
                }
                if let Some(admin_client_id) = params.admin_client_id.as_deref() {
                    pairs.append_pair("admin_client_id", admin_client_id);
                }
            }
            found(&target)
        }
        Err(error) => {
            tracing::info!(error = error.code(), "Authorization request refused");
            redirect_with_error(redirect_uri, &error, client_state)
        }
    }
}

async fn authorize_inner(
    state: &AppState,
    params: &AuthorizeParams,
    redirect_uri: &Url,
) -> OAuthResult<String> {
    let input = check_authorize_params(params)?;

    let user = db::find_user_by_client_id(&state.db, input.client_id)
        .await?
        .ok_or(OAuthError::InvalidClient("Invalid client ID"))?;

    if !user.in_good_standing() {
        return Err(OAuthError::AccessDenied(
            "User account not approved or inactive",
        ));
    }

    if wants_admin(input.scope) && !user.has_partner_admin_role() {
        tracing::warn!(user_id = user.id, "Admin scope requested without partner admin role");
        return Err(OAuthError::AccessDenied(
            "Insufficient privileges for admin access",
        ));
    }

    let code = generate_code();
    let record = AuthorizationCode {
        user_id: user.id,
        user_uuid: user.uuid,
        client_id: input.client_id.to_string(),
        redirect_uri: redirect_uri.to_string(),
        scope: input.scope.to_string(),
        code_challenge: input.code_challenge.to_string(),
        code_challenge_method: pkce::S256.to_string(),
        state: input.state.to_string(),
        created_at: Utc::now(),
    };

    state
        .ephemeral
        .put(
            &storage_key(OAUTH_CODE_PREFIX, &code),
            &record,
            Duration::seconds(EPHEMERAL_TTL_SECONDS),
        )
        .await?;

    tracing::info!(user_id = user.id, scope = %record.scope, "Authorization code issued");
    Ok(code)
}

/// Check a redeemed code against the token request.
fn check_redemption(
    record: &AuthorizationCode,
    client_id: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> OAuthResult<()> {
    if record.client_id != client_id {
        return Err(OAuthError::InvalidClient("Client ID mismatch"));
    }
    let redirect_matches = parse_redirect_uri(Some(redirect_uri))
        .is_some_and(|url| url.as_str() == record.redirect_uri);
    if !redirect_matches {
        return Err(OAuthError::InvalidGrant("Redirect URI mismatch"));
    }
    if !pkce::verify(code_verifier, &record.code_challenge) {
        return Err(OAuthError::InvalidGrant("Invalid code verifier"));
    }
    Ok(())
}

/// Redeem an authorization code for tokens.
///
/// The code is consumed before any check, so it is spent even when the
/// exchange fails.
///
/// POST /oauth/token
#[tracing::instrument(skip(state, body))]
pub async fn token(
    State(state): State<AppState>,
    TokenForm(body): TokenForm,
) -> OAuthResult<Json<TokenResponse>> {
    let invalid = || OAuthError::InvalidRequest("Invalid request parameters");

    match body.grant_type.as_deref() {
        Some("authorization_code") => {}
        Some(_) => return Err(OAuthError::UnsupportedGrantType),
        None => return Err(invalid()),
    }
    let code = present(body.code.as_ref()).ok_or_else(invalid)?;
    let redirect_uri = present(body.redirect_uri.as_ref()).ok_or_else(invalid)?;
    let client_id = present(body.client_id.as_ref()).ok_or_else(invalid)?;
    let code_verifier = present(body.code_verifier.as_ref()).ok_or_else(invalid)?;

    let record: AuthorizationCode = state
        .ephemeral
        .consume(&storage_key(OAUTH_CODE_PREFIX, code))
        .await?;

    if let Err(e) = check_redemption(&record, client_id, redirect_uri, code_verifier) {
        tracing::warn!(user_id = record.user_id, error = %e, "Authorization code redemption refused");
        return Err(e);
    }

    let user: User = db::find_user_by_id(&state.db, record.user_id)
        .await?
        .ok_or(OAuthError::InvalidGrant("User not found"))?;
    if !user.in_good_standing() {
        return Err(OAuthError::InvalidGrant(
            "User account not approved or inactive",
        ));
    }

    let access_token = state.tokens.issue(
        user.uuid,
        &user.email,
        ExtraClaims {
            scope: Some(record.scope.clone()),
            client_id: Some(record.client_id.clone()),
        },
    )?;
    let refresh_token = session::issue_refresh_token(&state.db, &state.tokens, user.uuid).await?;

    tracing::info!(user_id = user.id, "Authorization code redeemed");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: state.tokens.ttl_seconds(),
        refresh_token,
        scope: record.scope,
    }))
}

fn image_full_url(base: Option<&str>, image: Option<&str>) -> Option<String> {
    let image = image?;
    if image.starts_with("http://") || image.starts_with("https://") {
        return Some(image.to_string());
    }
    let base = base?;
    Some(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        image.trim_start_matches('/')
    ))
}

/// Resolve the holder of an OAuth access token.
///
/// GET /oauth/validate
#[tracing::instrument(skip(state, headers))]
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> OAuthResult<Json<ValidateResponse>> {
    let token = bearer_token(&headers)?;
    let (user, _claims) = resolve_principal(&state, token, Standing::ApprovedAndActive).await?;

    Ok(Json(ValidateResponse {
        user: ValidatedUser {
            uuid: user.uuid,
            email: user.email,
            full_name: user.first_name,
            last_name: user.last_name,
            status: user.status,
            image_full_url: image_full_url(
                state.config.storage_base_url.as_deref(),
                user.image_url.as_deref(),
            ),
        },
    }))
}
