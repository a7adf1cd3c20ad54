//! Failed-Login Lockout Policy
//!
//! The counter itself lives on the user row and is bumped by a single
//! `UPDATE` (see `db::record_failed_login`); this module only decides the
//! threshold and the lock length.

use chrono::{DateTime, Duration, Utc};

/// Named lockout policy selected with `LOCKOUT_POLICY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures that trigger the lock.
    pub max_attempts: i32,
    /// How long the lock holds once applied.
    pub lock_duration: Duration,
}

impl LockoutPolicy {
    /// 3 attempts, 15 minute lock.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            lock_duration: Duration::minutes(15),
        }
    }

    /// 5 attempts, lock that only an administrator lifts in practice.
    pub fn strict() -> Self {
        Self {
            max_attempts: 5,
            lock_duration: Duration::days(3650),
        }
    }

    /// Resolve a policy by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::standard()),
            "strict" => Some(Self::strict()),
            _ => None,
        }
    }

    /// Lock length in whole seconds.
    pub fn lock_seconds(&self) -> i64 {
        self.lock_duration.num_seconds()
    }

    /// Whether a counter value has reached the threshold.
    pub const fn is_exceeded(&self, failed_attempts: i32) -> bool {
        failed_attempts >= self.max_attempts
    }

    /// When a lock applied at `now` expires.
    pub fn locked_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.lock_duration
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
