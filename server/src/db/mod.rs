//! Database Layer
//!
//! Users, domain grants, refresh tokens, the blacklist and settings live
//! in `PostgreSQL`. Redis backs short-lived records and rate limits.

mod models;
mod queries;

#[cfg(test)]
mod tests;

use std::time::Duration;

use anyhow::{Context, Result};
use fred::prelude::{ClientLike, Config as RedisConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use models::*;
pub(crate) use queries::db_error;
pub use queries::*;

use crate::config::Config;

/// Connect the `PostgreSQL` pool sized by `config`.
pub async fn connect_postgres(config: &Config) -> Result<PgPool> {
    let max = config.db_max_connections.max(1);
    let pool = PgPoolOptions::new()
        .min_connections(max.min(2))
        .max_connections(max)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    tracing::info!(max_connections = max, "Connected to PostgreSQL");
    Ok(pool)
}

/// Apply pending schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Connect the shared Redis client.
pub async fn connect_redis(config: &Config) -> Result<fred::clients::Client> {
    let redis_config = RedisConfig::from_url(&config.redis_url).context("Invalid REDIS_URL")?;
    let client = fred::clients::Client::new(redis_config, None, None, None);
    client.connect();
    client
        .wait_for_connect()
        .await
        .context("Failed to connect to Redis")?;

    tracing::info!("Connected to Redis");
    Ok(client)
}

/// Whether a database error is a unique-constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
