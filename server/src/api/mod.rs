//! API Router and Application State
//!
//! Central routing configuration and shared state.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{
    access, admin,
    auth::{self, mfa_crypto::SecretSealer, two_factor::TwoFactor, AuthResult, TokenService},
    config::Config,
    domains,
    ephemeral::EphemeralStore,
    oauth,
    ratelimit::RateLimiter,
    sync::{self, DownstreamClient},
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,
    /// Server configuration
    pub config: Arc<Config>,
    /// Access token signing and verification
    pub tokens: Arc<TokenService>,
    /// Encryption of stored 2FA secrets
    pub sealer: SecretSealer,
    /// TOTP parameters
    pub two_factor: TwoFactor,
    /// Pending signups and OAuth authorization codes
    pub ephemeral: EphemeralStore,
    /// Rate limiter (optional, uses Redis)
    pub rate_limiter: Option<RateLimiter>,
    /// HTTP client for downstream domain services
    pub downstream: DownstreamClient,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        db: PgPool,
        config: Config,
        ephemeral: EphemeralStore,
        rate_limiter: Option<RateLimiter>,
    ) -> AuthResult<Self> {
        let tokens = TokenService::from_config(&config)?;
        let sealer = SecretSealer::from_hex(&config.mfa_encryption_key)?;
        let two_factor = TwoFactor::new(config.totp_issuer.clone(), config.totp_skew);
        let downstream = DownstreamClient::new(config.downstream.clone());

        Ok(Self {
            db,
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            sealer,
            two_factor,
            ephemeral,
            rate_limiter,
            downstream,
        })
    }
}

/// Create the main application router.
///
/// Every response carries an `x-request-id`, generated when the caller
/// sent none.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .merge(auth::router(state.clone()))
        .merge(oauth::router(state.clone()))
        .merge(access::router(state.clone()))
        .merge(domains::router(state.clone()))
        .merge(admin::router(state.clone()))
        .merge(sync::router())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Whether rate limiting is enabled
    rate_limiting: bool,
    /// Whether downstream sync requests can be signed
    sync_signing: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rate_limiting: state.rate_limiter.is_some(),
        sync_signing: state.downstream.sync_key().is_some(),
    })
}
