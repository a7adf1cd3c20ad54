//! AuthCenter Server

use std::net::SocketAddr;

use anyhow::Result;
use tracing::{info, warn};

use authcenter_server::api::{create_router, AppState};
use authcenter_server::config::Config;
use authcenter_server::db;
use authcenter_server::ephemeral::EphemeralStore;
use authcenter_server::ratelimit::{RateLimitConfig, RateLimiter};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "authcenter_server=debug,tower_http=debug".into());
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

/// Limiter over the shared Redis client, or `None` when disabled or the
/// script cannot be loaded.
async fn rate_limiter(redis: fred::clients::Client) -> Option<RateLimiter> {
    let config = RateLimitConfig::from_env();
    if !config.enabled {
        info!("Rate limiting disabled");
        return None;
    }

    let mut limiter = RateLimiter::new(redis, config);
    match limiter.init().await {
        Ok(()) => Some(limiter),
        Err(e) => {
            warn!(error = %e, "Rate limiter unavailable, continuing without it");
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting AuthCenter");

    let pool = db::connect_postgres(&config).await?;
    db::migrate(&pool).await?;
    let redis = db::connect_redis(&config).await?;

    if config.downstream.sync_key().is_none() {
        warn!("SYNC_SECRET not set; internal sync requests will be refused");
    }

    let bind_address = config.bind_address.clone();
    let limiter = rate_limiter(redis.clone()).await;
    let state = AppState::new(pool, config, EphemeralStore::redis(redis), limiter)?;

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Listening");

    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
