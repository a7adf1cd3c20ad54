//! Database Queries
//!
//! Runtime queries (no compile-time `DATABASE_URL` required).
//!
//! All query functions include error context logging to aid debugging.
//! Functions that take `&mut PgConnection` are meant to run inside a
//! caller-owned transaction.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::models::{
    AdminCounts, Domain, LockStatus, NewUser, SystemSetting, User, UserStatus,
};

/// Log and return a database error with context.
///
/// This helper ensures all database errors are logged with relevant context
/// before being propagated, making production debugging easier.
macro_rules! db_error {
    ($query:expr, $($field:tt)*) => {
        |e| {
            ::tracing::error!(query = $query, $($field)*, error = %e, "Database query failed");
            e
        }
    };
}

pub(crate) use db_error;

// ============================================================================
// User Queries
// ============================================================================

/// Find user by internal ID.
pub async fn find_user_by_id(pool: &PgPool, id: i64) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_error!("find_user_by_id", user_id = id))
}

/// Find user by external UUID.
pub async fn find_user_by_uuid(pool: &PgPool, uuid: Uuid) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE uuid = $1 AND deleted_at IS NULL")
        .bind(uuid)
        .fetch_optional(pool)
        .await
        .map_err(db_error!("find_user_by_uuid", user_uuid = %uuid))
}

/// Find user by email.
pub async fn find_user_by_email(pool: &PgPool, email: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1 AND deleted_at IS NULL")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(db_error!("find_user_by_email", email = %email))
}

/// Find user by UUID, falling back to email.
pub async fn find_user_by_uuid_or_email(
    conn: &mut PgConnection,
    uuid: Uuid,
    email: &str,
) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "SELECT * FROM users
         WHERE (uuid = $1 OR email = $2) AND deleted_at IS NULL
         ORDER BY (uuid = $1) DESC
         LIMIT 1
         FOR UPDATE",
    )
    .bind(uuid)
    .bind(email)
    .fetch_optional(conn)
    .await
    .map_err(db_error!("find_user_by_uuid_or_email", user_uuid = %uuid, email = %email))
}

/// Check if an email is already registered (including soft-deleted rows, which keep the unique key).
pub async fn email_exists(conn: &mut PgConnection, email: &str) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(email)
        .fetch_one(conn)
        .await
        .map_err(db_error!("email_exists", email = %email))
}

/// Insert a user together with its OAuth client mapping.
pub async fn insert_user(conn: &mut PgConnection, new: &NewUser<'_>) -> sqlx::Result<User> {
    sqlx::query_as::<_, User>(
        r"WITH inserted AS (
              INSERT INTO users (uuid, first_name, last_name, email, password_hash, external_role,
                                 status, is_approved, user_origin, two_factor_secret,
                                 is_2fa_enabled, is_2fa_verified)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
              RETURNING *
          ), client AS (
              INSERT INTO oauth_clients (client_id, user_id)
              SELECT uuid::text, id FROM inserted
          )
          SELECT * FROM inserted",
    )
    .bind(new.uuid)
    .bind(new.first_name)
    .bind(new.last_name)
    .bind(new.email)
    .bind(new.password_hash)
    .bind(new.external_role)
    .bind(new.status)
    .bind(new.is_approved)
    .bind(new.user_origin)
    .bind(new.two_factor_secret)
    .bind(new.is_2fa_enabled)
    .bind(new.is_2fa_verified)
    .fetch_one(conn)
    .await
    .map_err(db_error!("insert_user", user_uuid = %new.uuid, email = %new.email))
}

/// Overwrite identity fields pushed by a sibling system.
///
/// The uuid is never rewritten; the OAuth client mapping is keyed on it.
pub async fn update_user_identity(
    conn: &mut PgConnection,
    user_id: i64,
    first_name: &str,
    last_name: &str,
    email: &str,
    external_role: Option<&str>,
    password_hash: &str,
) -> sqlx::Result<User> {
    sqlx::query_as::<_, User>(
        "UPDATE users
         SET first_name = $2, last_name = $3, email = $4, external_role = $5,
             password_hash = $6, updated_at = NOW()
         WHERE id = $1
         RETURNING *",
    )
    .bind(user_id)
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(external_role)
    .bind(password_hash)
    .fetch_one(conn)
    .await
    .map_err(db_error!("update_user_identity", user_id = user_id))
}

/// Atomically count a failed login and apply the lock once the threshold is reached.
///
/// Returns the new counter and lock expiry.
pub async fn record_failed_login(
    pool: &PgPool,
    user_id: i64,
    max_attempts: i32,
    lock_seconds: i64,
) -> sqlx::Result<(i32, Option<DateTime<Utc>>)> {
    sqlx::query_as(
        "UPDATE users
         SET failed_attempts = failed_attempts + 1,
             locked_until = CASE
                 WHEN failed_attempts + 1 >= $2 THEN NOW() + make_interval(secs => $3)
                 ELSE locked_until
             END,
             updated_at = NOW()
         WHERE id = $1
         RETURNING failed_attempts, locked_until",
    )
    .bind(user_id)
    .bind(max_attempts)
    .bind(lock_seconds as f64)
    .fetch_one(pool)
    .await
    .map_err(db_error!("record_failed_login", user_id = user_id))
}

/// Reset the failure counter unless a lock window is still running.
///
/// Returns `false` if the account is locked and nothing was cleared.
pub async fn clear_failed_logins(pool: &PgPool, user_id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE users
         SET failed_attempts = 0, locked_until = NULL
         WHERE id = $1 AND (locked_until IS NULL OR locked_until <= NOW())",
    )
    .bind(user_id)
    .execute(pool)
    .await
    .map_err(db_error!("clear_failed_logins", user_id = user_id))?;

    Ok(result.rows_affected() > 0)
}

/// Clear a lock unconditionally (administrator action).
pub async fn unlock_user(pool: &PgPool, user_id: i64) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE users SET failed_attempts = 0, locked_until = NULL, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(user_id)
    .execute(pool)
    .await
    .map_err(db_error!("unlock_user", user_id = user_id))?;
    Ok(())
}

/// Lock state for a set of users.
pub async fn lock_statuses(pool: &PgPool, uuids: &[Uuid]) -> sqlx::Result<Vec<LockStatus>> {
    if uuids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, LockStatus>(
        "SELECT uuid, email, failed_attempts, locked_until
         FROM users WHERE uuid = ANY($1) AND deleted_at IS NULL
         ORDER BY email",
    )
    .bind(uuids)
    .fetch_all(pool)
    .await
    .map_err(db_error!("lock_statuses", count = uuids.len()))
}

/// Store a new (sealed) 2FA secret; enrollment restarts unverified.
pub async fn set_two_factor_secret(
    pool: &PgPool,
    user_id: i64,
    sealed_secret: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE users
         SET two_factor_secret = $2, is_2fa_enabled = TRUE, is_2fa_verified = FALSE,
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(user_id)
    .bind(sealed_secret)
    .execute(pool)
    .await
    .map_err(db_error!("set_two_factor_secret", user_id = user_id))?;
    Ok(())
}

/// Mark 2FA as verified. Returns `true` on the first verification only.
pub async fn mark_two_factor_verified(pool: &PgPool, user_id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE users SET is_2fa_verified = TRUE, updated_at = NOW()
         WHERE id = $1 AND is_2fa_verified = FALSE",
    )
    .bind(user_id)
    .execute(pool)
    .await
    .map_err(db_error!("mark_two_factor_verified", user_id = user_id))?;
    Ok(result.rows_affected() > 0)
}

/// Set one entry of the user's per-domain external status map.
pub async fn set_user_external_status(
    pool: &PgPool,
    user_id: i64,
    domain_key: &str,
    status: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE users
         SET external_active_status = jsonb_set(external_active_status, ARRAY[$2], to_jsonb($3::text)),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(user_id)
    .bind(domain_key)
    .bind(status)
    .execute(pool)
    .await
    .map_err(db_error!("set_user_external_status", user_id = user_id, domain_key = %domain_key))?;
    Ok(())
}

/// Soft-delete a user. Returns `false` if already deleted.
pub async fn soft_delete_user(pool: &PgPool, user_id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE users SET deleted_at = NOW(), status = $2, updated_at = NOW()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(user_id)
    .bind(UserStatus::Inactive)
    .execute(pool)
    .await
    .map_err(db_error!("soft_delete_user", user_id = user_id))?;
    Ok(result.rows_affected() > 0)
}

/// Aggregate counts for the admin panel.
pub async fn admin_counts(pool: &PgPool) -> sqlx::Result<AdminCounts> {
    let (total_users, un_approved_user_count, total_domains, un_approved_request_count): (
        i64,
        i64,
        i64,
        i64,
    ) = sqlx::query_as(
        "SELECT
             (SELECT COUNT(*) FROM users WHERE deleted_at IS NULL),
             (SELECT COUNT(*) FROM users WHERE deleted_at IS NULL AND NOT is_approved),
             (SELECT COUNT(*) FROM domains),
             (SELECT COUNT(*) FROM access_requests WHERE status = 'pending')",
    )
    .fetch_one(pool)
    .await
    .map_err(db_error!("admin_counts", scope = "global"))?;

    Ok(AdminCounts {
        total_users,
        total_domains,
        un_approved_user_count,
        un_approved_request_count,
    })
}

// ============================================================================
// Domain Queries
// ============================================================================

/// List all domains.
pub async fn list_domains(pool: &PgPool) -> sqlx::Result<Vec<Domain>> {
    sqlx::query_as::<_, Domain>("SELECT * FROM domains ORDER BY name")
        .fetch_all(pool)
        .await
        .map_err(db_error!("list_domains", scope = "all"))
}

/// Find domain by ID.
pub async fn find_domain_by_id(pool: &PgPool, id: i64) -> sqlx::Result<Option<Domain>> {
    sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_error!("find_domain_by_id", domain_id = id))
}

/// Find domain by its stable key.
pub async fn find_domain_by_key(
    conn: &mut PgConnection,
    key: &str,
) -> sqlx::Result<Option<Domain>> {
    sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE key = $1")
        .bind(key)
        .fetch_optional(conn)
        .await
        .map_err(db_error!("find_domain_by_key", domain_key = %key))
}

/// IDs of domains granted to a user.
pub async fn domain_ids_for_user(pool: &PgPool, user_id: i64) -> sqlx::Result<Vec<i64>> {
    sqlx::query_scalar(
        "SELECT domain_id FROM user_domain_access WHERE user_id = $1 ORDER BY domain_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(db_error!("domain_ids_for_user", user_id = user_id))
}

/// Keys of domains granted to a user.
pub async fn domain_keys_for_user(pool: &PgPool, user_id: i64) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar(
        "SELECT d.key FROM user_domain_access uda
         JOIN domains d ON d.id = uda.domain_id
         WHERE uda.user_id = $1
         ORDER BY d.key",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(db_error!("domain_keys_for_user", user_id = user_id))
}

/// Check whether a user holds a grant for a domain.
pub async fn user_has_domain(
    conn: &mut PgConnection,
    user_id: i64,
    domain_id: i64,
) -> sqlx::Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM user_domain_access WHERE user_id = $1 AND domain_id = $2)",
    )
    .bind(user_id)
    .bind(domain_id)
    .fetch_one(conn)
    .await
    .map_err(db_error!("user_has_domain", user_id = user_id, domain_id = domain_id))
}

/// Attach a grant. Idempotent; returns `true` if a row was created.
pub async fn attach_domain(
    conn: &mut PgConnection,
    user_id: i64,
    domain_id: i64,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "INSERT INTO user_domain_access (user_id, domain_id) VALUES ($1, $2)
         ON CONFLICT (user_id, domain_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(domain_id)
    .execute(conn)
    .await
    .map_err(db_error!("attach_domain", user_id = user_id, domain_id = domain_id))?;
    Ok(result.rows_affected() > 0)
}

/// Remove a grant. Returns `true` if a row was deleted.
pub async fn detach_domain(
    conn: &mut PgConnection,
    user_id: i64,
    domain_id: i64,
) -> sqlx::Result<bool> {
    let result =
        sqlx::query("DELETE FROM user_domain_access WHERE user_id = $1 AND domain_id = $2")
            .bind(user_id)
            .bind(domain_id)
            .execute(conn)
            .await
            .map_err(db_error!("detach_domain", user_id = user_id, domain_id = domain_id))?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Token Queries
// ============================================================================

/// Persist a refresh token hash.
pub async fn insert_refresh_token(
    pool: &PgPool,
    user_uuid: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO refresh_tokens (user_uuid, token_hash, expires_at) VALUES ($1, $2, $3)",
    )
    .bind(user_uuid)
    .bind(token_hash)
    .bind(expires_at)
    .execute(pool)
    .await
    .map_err(db_error!("insert_refresh_token", user_uuid = %user_uuid))?;
    Ok(())
}

/// Check for a non-expired refresh token matching user and hash.
pub async fn refresh_token_is_valid(
    pool: &PgPool,
    user_uuid: Uuid,
    token_hash: &str,
) -> sqlx::Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS(
             SELECT 1 FROM refresh_tokens
             WHERE user_uuid = $1 AND token_hash = $2 AND expires_at > NOW()
         )",
    )
    .bind(user_uuid)
    .bind(token_hash)
    .fetch_one(pool)
    .await
    .map_err(db_error!("refresh_token_is_valid", user_uuid = %user_uuid))
}

/// Blacklist a token identifier until its natural expiry.
///
/// Also drops entries whose tokens have expired on their own.
pub async fn blacklist_jti(
    pool: &PgPool,
    jti: &str,
    user_id: i64,
    expires_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO blacklisted_jwts (jti, user_id, expires_at) VALUES ($1, $2, $3)
         ON CONFLICT (jti) DO NOTHING",
    )
    .bind(jti)
    .bind(user_id)
    .bind(expires_at)
    .execute(pool)
    .await
    .map_err(db_error!("blacklist_jti", jti = %jti, user_id = user_id))?;

    let purged = sqlx::query("DELETE FROM blacklisted_jwts WHERE expires_at < NOW()")
        .execute(pool)
        .await
        .map_err(db_error!("purge_blacklist", jti = %jti))?;
    if purged.rows_affected() > 0 {
        tracing::debug!(purged = purged.rows_affected(), "Purged expired blacklist entries");
    }
    Ok(())
}

/// Check whether a token identifier is blacklisted.
pub async fn is_jti_blacklisted(pool: &PgPool, jti: &str) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM blacklisted_jwts WHERE jti = $1)")
        .bind(jti)
        .fetch_one(pool)
        .await
        .map_err(db_error!("is_jti_blacklisted", jti = %jti))
}

// ============================================================================
// OAuth Client Queries
// ============================================================================

/// Resolve the user behind an OAuth client identifier.
pub async fn find_user_by_client_id(pool: &PgPool, client_id: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "SELECT u.* FROM oauth_clients c
         JOIN users u ON u.id = c.user_id
         WHERE c.client_id = $1 AND u.deleted_at IS NULL",
    )
    .bind(client_id)
    .fetch_optional(pool)
    .await
    .map_err(db_error!("find_user_by_client_id", client_id = %client_id))
}

// ============================================================================
// Activity Queries
// ============================================================================

/// Insert an activity row.
///
/// With `dedup_seconds`, nothing is written if the same event was recorded
/// for the user within that window. Returns `true` if a row was written.
pub async fn record_activity(
    pool: &PgPool,
    user_id: i64,
    domain_id: Option<i64>,
    event_type: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    dedup_seconds: Option<i64>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "INSERT INTO user_activities (user_id, domain_id, event_type, ip_address, user_agent)
         SELECT $1, $2, $3, $4, $5
         WHERE $6::float8 IS NULL OR NOT EXISTS (
             SELECT 1 FROM user_activities
             WHERE user_id = $1 AND event_type = $3
               AND event_time > NOW() - make_interval(secs => $6::float8)
         )",
    )
    .bind(user_id)
    .bind(domain_id)
    .bind(event_type)
    .bind(ip_address)
    .bind(user_agent)
    .bind(dedup_seconds.map(|s| s as f64))
    .execute(pool)
    .await
    .map_err(db_error!("record_activity", user_id = user_id, event_type = %event_type))?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// System Settings Queries
// ============================================================================

/// Get a system setting.
pub async fn get_setting(pool: &PgPool, key: &str) -> sqlx::Result<Option<SystemSetting>> {
    sqlx::query_as::<_, SystemSetting>("SELECT * FROM system_settings WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(db_error!("get_setting", config_key = %key))
}

/// List all system settings.
pub async fn list_settings(pool: &PgPool) -> sqlx::Result<Vec<SystemSetting>> {
    sqlx::query_as::<_, SystemSetting>("SELECT * FROM system_settings ORDER BY key")
        .fetch_all(pool)
        .await
        .map_err(db_error!("list_settings", scope = "all"))
}

/// Write a setting if its version still matches `expected_version`.
///
/// A missing key is created when `expected_version` is 0. Returns `None`
/// when another writer got there first.
pub async fn put_setting(
    pool: &PgPool,
    key: &str,
    value: serde_json::Value,
    expected_version: i64,
    updated_by: i64,
) -> sqlx::Result<Option<SystemSetting>> {
    let query = if expected_version == 0 {
        "INSERT INTO system_settings (key, value, version, updated_by)
         VALUES ($1, $2, $4 + 1, $3)
         ON CONFLICT (key) DO NOTHING
         RETURNING *"
    } else {
        "UPDATE system_settings
         SET value = $2, version = version + 1, updated_by = $3, updated_at = NOW()
         WHERE key = $1 AND version = $4
         RETURNING *"
    };

    sqlx::query_as::<_, SystemSetting>(query)
        .bind(key)
        .bind(&value)
        .bind(updated_by)
        .bind(expected_version)
        .fetch_optional(pool)
        .await
        .map_err(db_error!("put_setting", config_key = %key, expected_version = expected_version))
}
