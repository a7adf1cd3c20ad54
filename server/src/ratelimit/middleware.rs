//! Per-IP limiting for the public token endpoints.
//!
//! [`with_category`] tags the request one layer further out, and
//! [`rate_limit_by_ip`] charges the tagged budget.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use futures::future::BoxFuture;

use crate::api::AppState;
use crate::ratelimit::{extract_client_ip, normalize_ip, RateLimitCategory, RateLimitError, RateLimiter};

/// Charge one request against the client's budget for `category`.
///
/// A Redis outage admits the request when the limiter fails open.
async fn charge(
    limiter: &RateLimiter,
    category: RateLimitCategory,
    client: &str,
) -> Result<(), RateLimitError> {
    let result = match limiter.check(category, client).await {
        Ok(result) => result,
        Err(RateLimitError::RedisUnavailable) if limiter.config().fail_open => {
            tracing::warn!(category = category.as_str(), ip = %client, "Limiter unreachable, admitting request");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if result.allowed {
        return Ok(());
    }
    tracing::warn!(
        category = category.as_str(),
        ip = %client,
        retry_after = result.retry_after,
        "Rate limit exceeded"
    );
    Err(RateLimitError::LimitExceeded(result))
}

/// Limit by normalized client IP. Untagged routes fall under `AuthOther`;
/// without a limiter every request passes.
pub async fn rate_limit_by_ip(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if let Some(limiter) = state.rate_limiter.as_ref() {
        let category = request
            .extensions()
            .get::<RateLimitCategory>()
            .copied()
            .unwrap_or(RateLimitCategory::AuthOther);
        let ip = extract_client_ip(
            request.headers(),
            request.extensions().get::<ConnectInfo<SocketAddr>>(),
            state.config.trust_proxy,
        );
        charge(limiter, category, &normalize_ip(ip)).await?;
    }

    Ok(next.run(request).await)
}

/// Tag requests with `category` for [`rate_limit_by_ip`].
///
/// ```ignore
/// Router::new()
///     .route("/auth/login", post(login))
///     .layer(from_fn_with_state(state, rate_limit_by_ip))
///     .layer(from_fn(with_category(RateLimitCategory::AuthLogin)));
/// ```
pub fn with_category(
    category: RateLimitCategory,
) -> impl Fn(Request, Next) -> BoxFuture<'static, Response> + Clone + Send + 'static {
    move |mut request: Request, next: Next| {
        request.extensions_mut().insert(category);
        Box::pin(next.run(request))
    }
}
