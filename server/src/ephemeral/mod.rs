//! Ephemeral Records
//!
//! Pending signups and OAuth authorization codes: short-lived, consumed
//! once, loss-tolerant. Losing one only forces the user to restart that
//! flow.

mod record;
mod store;

use sha2::{Digest, Sha256};
use thiserror::Error;

pub use record::TimeBoxed;
pub use store::EphemeralStore;

/// Key prefix for pending 2FA signups.
pub const SIGNUP_PREFIX: &str = "signup_2fa";

/// Key prefix for OAuth authorization codes.
pub const OAUTH_CODE_PREFIX: &str = "oauth_code";

/// Lifetime of pending signups and authorization codes, in seconds.
pub const EPHEMERAL_TTL_SECONDS: i64 = 600;

/// Ephemeral store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EphemeralError {
    #[error("record not found")]
    NotFound,

    #[error("record expired")]
    Expired,

    #[error("record already consumed")]
    Replayed,

    #[error("record serialization failed: {0}")]
    Serialization(String),

    #[error("ephemeral backend unavailable: {0}")]
    Backend(String),
}

impl EphemeralError {
    /// Whether the caller presented a dead or unknown identifier.
    pub const fn is_unusable_record(&self) -> bool {
        matches!(self, Self::NotFound | Self::Expired | Self::Replayed)
    }
}

/// Storage key for a bearer identifier.
///
/// Identifiers are hashed so that codes and session ids never sit in the
/// store in plaintext.
pub fn storage_key(prefix: &str, id: &str) -> String {
    format!("{prefix}:{}", hex::encode(Sha256::digest(id.as_bytes())))
}
