//! Rate limiting for public authentication endpoints.
//!
//! Redis fixed-window counters keyed by category and normalized client IP.

pub mod config;
pub mod error;
pub mod ip;
pub mod limiter;
pub mod middleware;
pub mod types;

pub use config::*;
pub use error::*;
pub use ip::*;
pub use limiter::*;
pub use middleware::{rate_limit_by_ip, with_category};
pub use types::*;
