//! Limiter rejections as HTTP responses.

use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ratelimit::RateLimitResult;

#[derive(Debug)]
pub enum RateLimitError {
    /// Redis could not be reached and the limiter fails closed
    RedisUnavailable,
    /// The client spent its budget for the current window
    LimitExceeded(RateLimitResult),
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RedisUnavailable => f.write_str("rate limiter unavailable"),
            Self::LimitExceeded(result) => {
                write!(f, "rate limit exceeded, retry in {}s", result.retry_after)
            }
        }
    }
}

impl std::error::Error for RateLimitError {}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let Self::LimitExceeded(result) = self else {
            let body = json!({
                "error": "service_unavailable",
                "message": "Rate limiting is temporarily unavailable",
            });
            return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
        };

        let body = json!({
            "error": "rate_limited",
            "message": format!("Too many requests, retry in {} seconds", result.retry_after),
            "retry_after": result.retry_after,
            "limit": result.limit,
            "remaining": 0,
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(result.retry_after));
        response
    }
}
