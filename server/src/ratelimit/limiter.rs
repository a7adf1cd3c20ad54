//! Redis fixed-window limiter.

use std::sync::Arc;

use chrono::Utc;
use fred::prelude::*;
use tokio::sync::RwLock;

use crate::ratelimit::{
    LimitConfig, RateLimitCategory, RateLimitConfig, RateLimitError, RateLimitResult,
};

const WINDOW_SCRIPT: &str = include_str!("rate_limit.lua");

/// Script reply: `{count, allowed (1/0), ttl}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowReply {
    count: i64,
    allowed: bool,
    ttl: i64,
}

impl WindowReply {
    fn parse(reply: &[i64]) -> Option<Self> {
        match *reply {
            [count, allowed, ttl] => Some(Self {
                count,
                allowed: allowed == 1,
                ttl,
            }),
            _ => None,
        }
    }

    fn into_result(self, limit: &LimitConfig, now: i64) -> RateLimitResult {
        let ttl = self.ttl.max(0) as u64;
        let used = u32::try_from(self.count.max(0)).unwrap_or(u32::MAX);
        RateLimitResult {
            allowed: self.allowed,
            limit: limit.requests,
            remaining: if self.allowed {
                limit.requests.saturating_sub(used)
            } else {
                0
            },
            reset_at: now.max(0) as u64 + ttl,
            retry_after: if self.allowed { 0 } else { ttl },
        }
    }
}

/// Counts requests per (category, client) in Redis.
///
/// The check-and-increment is one Lua call, so every instance shares the
/// same window.
#[derive(Clone)]
pub struct RateLimiter {
    redis: Client,
    config: Arc<RateLimitConfig>,
    script_sha: Arc<RwLock<String>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Call [`RateLimiter::init`] before the first check.
    pub fn new(redis: Client, config: RateLimitConfig) -> Self {
        Self {
            redis,
            config: Arc::new(config),
            script_sha: Arc::new(RwLock::new(String::new())),
        }
    }

    pub async fn init(&mut self) -> Result<(), Error> {
        self.load_script().await
    }

    async fn load_script(&self) -> Result<(), Error> {
        let sha: String = self.redis.script_load(WINDOW_SCRIPT).await?;
        tracing::info!(script_sha = %sha, "Rate limit script loaded");
        *self.script_sha.write().await = sha;
        Ok(())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Whether `client` skips limiting entirely.
    pub fn is_allowlisted(&self, client: &str) -> bool {
        self.config.allowlist.contains(client)
    }

    fn window_key(&self, category: RateLimitCategory, client: &str) -> String {
        format!("{}:{}:{client}", self.config.redis_key_prefix, category.as_str())
    }

    /// Count one request for `client` in `category`.
    ///
    /// Disabled limiters and allowlisted clients are always admitted
    /// without touching Redis.
    #[tracing::instrument(skip(self), fields(category = category.as_str()))]
    pub async fn check(
        &self,
        category: RateLimitCategory,
        client: &str,
    ) -> Result<RateLimitResult, RateLimitError> {
        if !self.config.enabled || self.is_allowlisted(client) {
            return Ok(RateLimitResult::unlimited());
        }

        let limit = self.config.limits.for_category(category);
        let key = self.window_key(category, client);
        let reply = self.run_script(&key, limit).await?;

        let Some(window) = WindowReply::parse(&reply) else {
            tracing::warn!(?reply, "Malformed rate limit script reply");
            return Err(RateLimitError::RedisUnavailable);
        };
        Ok(window.into_result(limit, Utc::now().timestamp()))
    }

    /// EVALSHA, reloading the script once if Redis lost it.
    async fn run_script(&self, key: &str, limit: &LimitConfig) -> Result<Vec<i64>, RateLimitError> {
        let args = vec![limit.window_secs.to_string(), limit.requests.to_string()];

        for attempt in 0..2 {
            let sha = self.script_sha.read().await.clone();
            let reply: Result<Vec<i64>, Error> =
                self.redis.evalsha(&sha, vec![key], args.clone()).await;
            match reply {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt == 0 && e.to_string().contains("NOSCRIPT") => {
                    tracing::warn!("Rate limit script missing, reloading");
                    if let Err(e) = self.load_script().await {
                        tracing::warn!(error = %e, "Rate limit script reload failed");
                        return Err(RateLimitError::RedisUnavailable);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rate limit check failed");
                    return Err(RateLimitError::RedisUnavailable);
                }
            }
        }
        Err(RateLimitError::RedisUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    /// Limiter over a client that never connects.
    fn offline_limiter(config: RateLimitConfig) -> RateLimiter {
        let redis_config = Config::from_url("redis://localhost:6379").unwrap();
        RateLimiter::new(Client::new(redis_config, None, None, None), config)
    }

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            redis_key_prefix: "test:rl".to_string(),
            allowlist: HashSet::from(["127.0.0.1".to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn window_key_layout() {
        let limiter = offline_limiter(config());
        assert_eq!(
            limiter.window_key(RateLimitCategory::TokenExchange, "192.168.1.1"),
            "test:rl:token_exchange:192.168.1.1"
        );
    }

    #[test]
    fn reply_within_budget() {
        let limit = LimitConfig { requests: 10, window_secs: 60 };
        let result = WindowReply::parse(&[3, 1, 42])
            .unwrap()
            .into_result(&limit, 1_000);

        assert!(result.allowed);
        assert_eq!(result.remaining, 7);
        assert_eq!(result.reset_at, 1_042);
        assert_eq!(result.retry_after, 0);
    }

    #[test]
    fn reply_over_budget() {
        let limit = LimitConfig { requests: 10, window_secs: 60 };
        let result = WindowReply::parse(&[11, 0, 17])
            .unwrap()
            .into_result(&limit, 1_000);

        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.retry_after, 17);
    }

    #[test]
    fn short_reply_is_rejected() {
        assert!(WindowReply::parse(&[1, 1]).is_none());
    }

    #[tokio::test]
    async fn allowlisted_and_disabled_checks_skip_redis() {
        let limiter = offline_limiter(config());
        assert!(limiter.is_allowlisted("127.0.0.1"));
        let result = limiter
            .check(RateLimitCategory::AuthLogin, "127.0.0.1")
            .await
            .unwrap();
        assert!(result.allowed);

        let disabled = offline_limiter(RateLimitConfig {
            enabled: false,
            ..config()
        });
        let result = disabled
            .check(RateLimitCategory::AuthLogin, "10.0.0.1")
            .await
            .unwrap();
        assert!(result.allowed);
    }
}
