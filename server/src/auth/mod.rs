//! Authentication Service
//!
//! Handles password login with lockout, TOTP two-factor, signup, token
//! refresh, logout and cross-domain token exchange.

mod error;
mod exchange;
mod handlers;
pub mod jwt;
mod lockout;
pub mod mfa_crypto;
mod middleware;
mod password;
pub mod session;
mod signup;
pub mod two_factor;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sha2::{Digest, Sha256};

use crate::api::AppState;
use crate::ratelimit::{rate_limit_by_ip, with_category, RateLimitCategory};

pub use error::{AuthError, AuthResult, ErrorResponse};
pub use handlers::UserProfile;
pub use jwt::{Claims, ExtraClaims, TokenError, TokenService};
pub use lockout::LockoutPolicy;
pub use middleware::{
    bearer_token, require_admin, require_auth, resolve_claims, resolve_principal, AuthUser,
    Standing,
};
pub use password::{hash_password, is_password_hash, verify_password};

/// SHA-256 hex digest used to store opaque secrets.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Wrap `routes` in per-IP rate limiting for `category`.
fn limited(state: &AppState, category: RateLimitCategory, routes: Router<AppState>) -> Router<AppState> {
    routes
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_by_ip,
        ))
        .layer(axum_middleware::from_fn(with_category(category)))
}

/// Create authentication router.
///
/// Public routes:
/// - POST /auth/login, /auth/login/verify-2fa
/// - POST /auth/generate-2fa-secret
/// - POST /auth/signup, /auth/signup/initiate-2fa, /auth/signup/complete-2fa
/// - POST /auth/token/exchange
/// - POST /token/refresh
///
/// Protected routes:
/// - POST /auth/logout
/// - GET /auth/validate
pub fn router(state: AppState) -> Router<AppState> {
    let login_routes = limited(
        &state,
        RateLimitCategory::AuthLogin,
        Router::new()
            .route("/auth/login", post(handlers::login))
            .route("/auth/login/verify-2fa", post(handlers::verify_two_factor))
            .route(
                "/auth/generate-2fa-secret",
                post(handlers::generate_two_factor_secret),
            ),
    );

    let signup_routes = limited(
        &state,
        RateLimitCategory::AuthSignup,
        Router::new()
            .route("/auth/signup", post(signup::signup))
            .route(
                "/auth/signup/initiate-2fa",
                post(signup::initiate_two_factor_signup),
            )
            .route(
                "/auth/signup/complete-2fa",
                post(signup::complete_two_factor_signup),
            ),
    );

    let exchange_route = limited(
        &state,
        RateLimitCategory::TokenExchange,
        Router::new().route("/auth/token/exchange", post(exchange::exchange_token)),
    );

    let refresh_route = limited(
        &state,
        RateLimitCategory::AuthOther,
        Router::new().route("/token/refresh", post(handlers::refresh)),
    );

    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/validate", get(handlers::validate))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    login_routes
        .merge(signup_routes)
        .merge(exchange_route)
        .merge(refresh_route)
        .merge(protected_routes)
}
