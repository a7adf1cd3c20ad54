//! Limiter settings, read from `RATE_LIMIT_*` variables.

use std::collections::HashSet;
use std::env;

use crate::ratelimit::RateLimitCategory;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Redis key prefix, e.g. `authcenter:rl`
    pub redis_key_prefix: String,
    /// Admit requests while Redis is unreachable
    pub fail_open: bool,
    /// Normalized client IPs that are never limited
    pub allowlist: HashSet<String>,
    pub limits: RateLimits,
}

/// One budget per [`RateLimitCategory`].
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub auth_login: LimitConfig,
    pub auth_signup: LimitConfig,
    pub token_exchange: LimitConfig,
    pub auth_other: LimitConfig,
}

/// `requests` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    pub requests: u32,
    pub window_secs: u64,
}

impl LimitConfig {
    const fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            window_secs: 60,
        }
    }

    /// Parse `"requests,window_secs"`.
    fn parse(raw: &str) -> Option<Self> {
        let (requests, window_secs) = raw.split_once(',')?;
        Some(Self {
            requests: requests.trim().parse().ok()?,
            window_secs: window_secs.trim().parse().ok()?,
        })
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            auth_login: LimitConfig::per_minute(10),
            auth_signup: LimitConfig::per_minute(5),
            token_exchange: LimitConfig::per_minute(10),
            auth_other: LimitConfig::per_minute(30),
        }
    }
}

impl RateLimits {
    pub const fn for_category(&self, category: RateLimitCategory) -> &LimitConfig {
        match category {
            RateLimitCategory::AuthLogin => &self.auth_login,
            RateLimitCategory::AuthSignup => &self.auth_signup,
            RateLimitCategory::TokenExchange => &self.token_exchange,
            RateLimitCategory::AuthOther => &self.auth_other,
        }
    }

    fn slot_mut(&mut self, category: RateLimitCategory) -> &mut LimitConfig {
        match category {
            RateLimitCategory::AuthLogin => &mut self.auth_login,
            RateLimitCategory::AuthSignup => &mut self.auth_signup,
            RateLimitCategory::TokenExchange => &mut self.token_exchange,
            RateLimitCategory::AuthOther => &mut self.auth_other,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_key_prefix: "authcenter:rl".to_string(),
            fail_open: true,
            allowlist: HashSet::new(),
            limits: RateLimits::default(),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl RateLimitConfig {
    /// Read `RATE_LIMIT_ENABLED`, `RATE_LIMIT_PREFIX`, `RATE_LIMIT_FAIL_OPEN`,
    /// `RATE_LIMIT_ALLOWLIST` (comma separated) and one
    /// `RATE_LIMIT_<CATEGORY>` override per category.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut limits = defaults.limits;
        for &category in RateLimitCategory::all() {
            let var = format!("RATE_LIMIT_{}", category.as_str().to_uppercase());
            match env::var(&var).ok().map(|raw| LimitConfig::parse(&raw)) {
                Some(Some(limit)) => *limits.slot_mut(category) = limit,
                Some(None) => tracing::warn!(variable = %var, "Ignoring malformed rate limit"),
                None => {}
            }
        }

        Self {
            enabled: env_flag("RATE_LIMIT_ENABLED", defaults.enabled),
            redis_key_prefix: env::var("RATE_LIMIT_PREFIX").unwrap_or(defaults.redis_key_prefix),
            fail_open: env_flag("RATE_LIMIT_FAIL_OPEN", defaults.fail_open),
            allowlist: env::var("RATE_LIMIT_ALLOWLIST")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|ip| !ip.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RateLimitConfig::default();
        assert!(config.enabled);
        assert!(config.fail_open);
        assert_eq!(config.redis_key_prefix, "authcenter:rl");
        assert_eq!(
            *config.limits.for_category(RateLimitCategory::TokenExchange),
            LimitConfig::per_minute(10)
        );
        assert_eq!(config.limits.for_category(RateLimitCategory::AuthSignup).requests, 5);
    }

    #[test]
    fn limit_parsing() {
        assert_eq!(
            LimitConfig::parse(" 20 , 120 "),
            Some(LimitConfig { requests: 20, window_secs: 120 })
        );
        assert_eq!(LimitConfig::parse("10"), None);
        assert_eq!(LimitConfig::parse("10,60,extra"), None);
        assert_eq!(LimitConfig::parse("abc,60"), None);
    }
}
