//! OAuth2 Authorization Server
//!
//! Authorization-code grant with mandatory PKCE for the admin front ends.
//! OAuth clients map 1:1 onto users through `oauth_clients`.

mod error;
mod handlers;
pub mod pkce;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};

use crate::api::AppState;
use crate::ratelimit::{rate_limit_by_ip, with_category, RateLimitCategory};

pub use error::{OAuthError, OAuthErrorBody, OAuthResult};
pub use handlers::{AuthorizationCode, ADMIN_SCOPE};

/// Routes:
/// - GET /authorize
/// - POST /oauth/token
/// - GET /oauth/validate
pub fn router(state: AppState) -> Router<AppState> {
    let token_route = Router::new()
        .route("/oauth/token", post(handlers::token))
        .layer(from_fn_with_state(state, rate_limit_by_ip))
        .layer(from_fn(with_category(RateLimitCategory::AuthOther)));

    Router::new()
        .route("/authorize", get(handlers::authorize))
        .route("/oauth/validate", get(handlers::validate))
        .merge(token_route)
}
