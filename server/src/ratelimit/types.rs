//! Rate limiting types.

/// Categories for rate limiting with different thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitCategory {
    /// Password logins and 2FA verification
    AuthLogin,
    /// Account creation, both signup flows
    AuthSignup,
    /// Cross-domain token exchange
    TokenExchange,
    /// Other public token operations (refresh, OAuth token)
    AuthOther,
}

impl RateLimitCategory {
    /// Returns the string identifier for this category (used in Redis keys).
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthLogin => "auth_login",
            Self::AuthSignup => "auth_signup",
            Self::TokenExchange => "token_exchange",
            Self::AuthOther => "auth_other",
        }
    }

    /// Returns all categories.
    pub const fn all() -> &'static [Self] {
        &[
            Self::AuthLogin,
            Self::AuthSignup,
            Self::TokenExchange,
            Self::AuthOther,
        ]
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Maximum requests allowed in the window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Unix timestamp when the window resets
    pub reset_at: u64,
    /// Seconds to wait before retrying (0 if allowed)
    pub retry_after: u64,
}

impl RateLimitResult {
    /// Result for requests that bypass the limiter.
    pub const fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: 0,
            remaining: 0,
            reset_at: 0,
            retry_after: 0,
        }
    }
}
