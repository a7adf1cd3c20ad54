//! Versioned System Settings
//!
//! Global toggles live in `system_settings` and are read per request, so
//! every instance sees the same value. Writes are optimistic: the caller
//! names the version it read, and a stale version is a conflict.

use serde_json::Value;
use sqlx::PgPool;

use crate::auth::{AuthError, AuthResult};
use crate::db::{self, SystemSetting};

/// Whether login responses advertise mandatory 2FA to clients.
pub const ENFORCE_2FA_LOGIN: &str = "enforce_2fa_login";

/// Read a boolean setting, treating absence or a read failure as `false`.
pub async fn flag(pool: &PgPool, key: &str) -> bool {
    match db::get_setting(pool, key).await {
        Ok(Some(setting)) => setting.value.as_bool().unwrap_or(false),
        Ok(None) => false,
        Err(e) => {
            tracing::warn!(config_key = %key, error = %e, "Falling back to default for setting");
            false
        }
    }
}

/// Current value of [`ENFORCE_2FA_LOGIN`].
pub async fn enforce_2fa_login(pool: &PgPool) -> bool {
    flag(pool, ENFORCE_2FA_LOGIN).await
}

/// Write a setting at `expected_version` (0 creates it).
pub async fn update(
    pool: &PgPool,
    key: &str,
    value: Value,
    expected_version: i64,
    updated_by: i64,
) -> AuthResult<SystemSetting> {
    if let Some(setting) = db::put_setting(pool, key, value, expected_version, updated_by).await? {
        tracing::info!(
            config_key = %key,
            version = setting.version,
            updated_by,
            "System setting updated"
        );
        return Ok(setting);
    }

    let current = db::get_setting(pool, key).await?.map(|s| s.version);
    Err(AuthError::Conflict(match current {
        Some(version) => format!(
            "Setting '{key}' is at version {version}, not {expected_version}"
        ),
        None => format!("Setting '{key}' does not exist; create it with version 0"),
    }))
}
