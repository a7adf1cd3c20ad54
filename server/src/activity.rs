//! User Activity Log
//!
//! Login, logout and domain-login events. Recording is best-effort: a
//! failed insert is logged and never fails the request that caused it.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header::USER_AGENT, request::Parts},
};
use sqlx::PgPool;

use crate::api::AppState;
use crate::db;
use crate::ratelimit::extract_client_ip;

pub const EVENT_LOGIN: &str = "login";
pub const EVENT_LOGOUT: &str = "logout";
pub const EVENT_DOMAIN_LOGIN: &str = "domain_login";

/// Window in which a repeated login for the same user is suppressed.
pub const LOGIN_DEDUP_SECONDS: i64 = 5;

const USER_AGENT_MAX_CHARS: usize = 512;

/// Caller address and agent, as recorded on activity rows.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let connect_info = parts.extensions.get::<ConnectInfo<SocketAddr>>();
        let ip = extract_client_ip(&parts.headers, connect_info, state.config.trust_proxy);
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(USER_AGENT_MAX_CHARS).collect());

        Ok(Self {
            ip: Some(ip.to_string()),
            user_agent,
        })
    }
}

async fn record(
    pool: &PgPool,
    user_id: i64,
    domain_id: Option<i64>,
    event_type: &str,
    client: &ClientInfo,
    dedup_seconds: Option<i64>,
) -> bool {
    match db::record_activity(
        pool,
        user_id,
        domain_id,
        event_type,
        client.ip.as_deref(),
        client.user_agent.as_deref(),
        dedup_seconds,
    )
    .await
    {
        Ok(written) => {
            if !written {
                tracing::debug!(user_id, event_type, "Suppressed duplicate activity");
            }
            written
        }
        Err(e) => {
            tracing::warn!(user_id, event_type, error = %e, "Failed to record activity");
            false
        }
    }
}

/// Record a login, suppressing repeats within [`LOGIN_DEDUP_SECONDS`].
pub async fn record_login(pool: &PgPool, user_id: i64, client: &ClientInfo) -> bool {
    record(pool, user_id, None, EVENT_LOGIN, client, Some(LOGIN_DEDUP_SECONDS)).await
}

pub async fn record_logout(pool: &PgPool, user_id: i64, client: &ClientInfo) -> bool {
    record(pool, user_id, None, EVENT_LOGOUT, client, None).await
}

/// Record a login into a downstream domain through token exchange.
pub async fn record_domain_login(
    pool: &PgPool,
    user_id: i64,
    domain_id: i64,
    client: &ClientInfo,
) -> bool {
    record(pool, user_id, Some(domain_id), EVENT_DOMAIN_LOGIN, client, None).await
}
