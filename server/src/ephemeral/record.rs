//! Time-boxed, single-consumption records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::EphemeralError;

/// A payload that may be consumed once before `expires_at`.
///
/// After consumption the record stays behind as a tombstone (payload
/// dropped, `consumed` set) until its expiry, so a replay is reported as
/// such instead of looking like an unknown key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBoxed<T> {
    pub payload: Option<T>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl<T> TimeBoxed<T> {
    pub fn new(payload: T, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            payload: Some(payload),
            expires_at: now + ttl,
            consumed: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Seconds left before expiry, never negative.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Consume the record, leaving a tombstone in its place.
    ///
    /// Consumed wins over expired: a replayed code is reported as a replay
    /// even after it would have expired.
    pub fn take(&mut self, now: DateTime<Utc>) -> Result<T, EphemeralError> {
        if self.consumed {
            return Err(EphemeralError::Replayed);
        }
        self.consumed = true;
        if self.is_expired(now) {
            self.payload = None;
            return Err(EphemeralError::Expired);
        }
        self.payload.take().ok_or(EphemeralError::Replayed)
    }

    /// Tombstone left after consumption.
    pub fn tombstone(&self) -> TimeBoxed<T> {
        TimeBoxed {
            payload: None,
            expires_at: self.expires_at,
            consumed: true,
        }
    }
}
