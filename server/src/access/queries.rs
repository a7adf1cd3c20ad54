//! Access Request Queries

use chrono::Utc;
use sqlx::{PgConnection, PgPool};

use super::types::RequestFilter;
use crate::db::{db_error, AccessRequest, AccessRequestRow, RequestStatus, RequestType};

/// Fields for a new request row.
#[derive(Debug, Clone)]
pub struct NewAccessRequest<'a> {
    pub user_uuid: uuid::Uuid,
    pub user_id: i64,
    pub domain_id: i64,
    pub domain_name: &'a str,
    pub request_type: RequestType,
    pub message: Option<&'a str>,
}

/// Listing join: request plus requester and domain columns.
const ROW_SELECT: &str = "SELECT ar.*, u.first_name AS requester_first_name,
            u.last_name AS requester_last_name, u.email AS requester_email,
            d.key AS domain_key
     FROM access_requests ar
     JOIN users u ON u.id = ar.user_id
     JOIN domains d ON d.id = ar.domain_id";

/// Filter shared by listing and count. `$5` is an escaped ILIKE term.
const ROW_FILTER: &str = "WHERE ($1::bigint IS NULL OR ar.user_id = $1)
       AND ($2::request_status IS NULL OR ar.status = $2)
       AND ($3::request_type IS NULL OR ar.request_type = $3)
       AND ($4::bigint IS NULL OR ar.domain_id = $4)
       AND ($5::text IS NULL
            OR u.first_name ILIKE '%' || $5 || '%'
            OR u.last_name ILIKE '%' || $5 || '%'
            OR u.email ILIKE '%' || $5 || '%'
            OR d.name ILIKE '%' || $5 || '%'
            OR ar.domain_name ILIKE '%' || $5 || '%'
            OR ar.message ILIKE '%' || $5 || '%')";

/// Escape ILIKE metacharacters in user-supplied search text.
pub fn escape_ilike(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub async fn insert_request(
    conn: &mut PgConnection,
    new: &NewAccessRequest<'_>,
) -> sqlx::Result<AccessRequest> {
    sqlx::query_as::<_, AccessRequest>(
        "INSERT INTO access_requests (user_uuid, user_id, domain_id, domain_name, request_type, message)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *",
    )
    .bind(new.user_uuid)
    .bind(new.user_id)
    .bind(new.domain_id)
    .bind(new.domain_name)
    .bind(new.request_type)
    .bind(new.message)
    .fetch_one(conn)
    .await
    .map_err(db_error!("insert_access_request", user_id = new.user_id, domain_id = new.domain_id))
}

pub async fn find_request(pool: &PgPool, id: i64) -> sqlx::Result<Option<AccessRequest>> {
    sqlx::query_as::<_, AccessRequest>("SELECT * FROM access_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_error!("find_access_request", request_id = id))
}

/// Load and row-lock a request for a decision.
pub async fn lock_request(conn: &mut PgConnection, id: i64) -> sqlx::Result<Option<AccessRequest>> {
    sqlx::query_as::<_, AccessRequest>("SELECT * FROM access_requests WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(db_error!("lock_access_request", request_id = id))
}

/// Pending request of a type for a user and domain.
pub async fn find_pending(
    conn: &mut PgConnection,
    user_id: i64,
    domain_id: i64,
    request_type: RequestType,
) -> sqlx::Result<Option<AccessRequest>> {
    sqlx::query_as::<_, AccessRequest>(
        "SELECT * FROM access_requests
         WHERE user_id = $1 AND domain_id = $2 AND request_type = $3 AND status = 'pending'",
    )
    .bind(user_id)
    .bind(domain_id)
    .bind(request_type)
    .fetch_optional(conn)
    .await
    .map_err(db_error!("find_pending_access_request", user_id = user_id, domain_id = domain_id))
}

/// Pending requests held by one user, any domain or type.
pub async fn count_pending_for_user(conn: &mut PgConnection, user_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM access_requests WHERE user_id = $1 AND status = 'pending'",
    )
    .bind(user_id)
    .fetch_one(conn)
    .await
    .map_err(db_error!("count_pending_for_user", user_id = user_id))
}

/// Pending requests across all users.
pub async fn count_pending(pool: &PgPool) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM access_requests WHERE status = 'pending'")
        .fetch_one(pool)
        .await
        .map_err(db_error!("count_pending", scope = "global"))
}

/// Record an approve or reject decision.
pub async fn decide(
    conn: &mut PgConnection,
    id: i64,
    status: RequestStatus,
    acted_by: i64,
) -> sqlx::Result<AccessRequest> {
    sqlx::query_as::<_, AccessRequest>(
        "UPDATE access_requests
         SET status = $2, acted_by = $3, acted_at = NOW(), updated_at = NOW()
         WHERE id = $1
         RETURNING *",
    )
    .bind(id)
    .bind(status)
    .bind(acted_by)
    .fetch_one(conn)
    .await
    .map_err(db_error!("decide_access_request", request_id = id, status = status.as_str()))
}

/// Put a rejected request back into the queue.
///
/// `None` when the request is no longer rejected.
pub async fn resubmit(
    conn: &mut PgConnection,
    id: i64,
    message: &str,
) -> sqlx::Result<Option<AccessRequest>> {
    sqlx::query_as::<_, AccessRequest>(
        "UPDATE access_requests
         SET status = 'pending', acted_by = NULL, acted_at = NULL, message = $2, updated_at = NOW()
         WHERE id = $1 AND status = 'rejected'
         RETURNING *",
    )
    .bind(id)
    .bind(message)
    .fetch_optional(conn)
    .await
    .map_err(db_error!("resubmit_access_request", request_id = id))
}

pub async fn delete_request(pool: &PgPool, id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM access_requests WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(db_error!("delete_access_request", request_id = id))?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_external_status(
    pool: &PgPool,
    id: i64,
    status: &str,
) -> sqlx::Result<Option<AccessRequest>> {
    sqlx::query_as::<_, AccessRequest>(
        "UPDATE access_requests SET external_active_status = $2, updated_at = NOW()
         WHERE id = $1
         RETURNING *",
    )
    .bind(id)
    .bind(status)
    .fetch_optional(pool)
    .await
    .map_err(db_error!("set_request_external_status", request_id = id))
}

pub async fn set_deactivate_info(
    pool: &PgPool,
    id: i64,
    info: &serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE access_requests SET deactivate_info = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(info)
    .execute(pool)
    .await
    .map_err(db_error!("set_deactivate_info", request_id = id))?;
    Ok(())
}

/// Close every pending request of a user for a domain.
///
/// Used when an administrator grants or revokes directly.
pub async fn settle_pending_for_domain(
    conn: &mut PgConnection,
    user_id: i64,
    domain_id: i64,
    status: RequestStatus,
    acted_by: i64,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE access_requests
         SET status = $3, acted_by = $4, acted_at = $5, updated_at = NOW()
         WHERE user_id = $1 AND domain_id = $2 AND status = 'pending'",
    )
    .bind(user_id)
    .bind(domain_id)
    .bind(status)
    .bind(acted_by)
    .bind(Utc::now())
    .execute(conn)
    .await
    .map_err(db_error!("settle_pending_for_domain", user_id = user_id, domain_id = domain_id))?;
    Ok(result.rows_affected())
}

/// One page of requests matching `filter`, newest first, plus the total.
pub async fn list_requests(
    pool: &PgPool,
    filter: &RequestFilter,
) -> sqlx::Result<(Vec<AccessRequestRow>, i64)> {
    let search = filter.search.as_deref().map(escape_ilike);
    let offset = (filter.page - 1) * filter.per_page;

    let rows = sqlx::query_as::<_, AccessRequestRow>(&format!(
        "{ROW_SELECT} {ROW_FILTER}
         ORDER BY ar.created_at DESC, ar.id DESC
         LIMIT $6 OFFSET $7"
    ))
    .bind(filter.user_id)
    .bind(filter.status)
    .bind(filter.request_type)
    .bind(filter.domain_id)
    .bind(search.as_deref())
    .bind(filter.per_page)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(db_error!("list_access_requests", page = filter.page))?;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM access_requests ar
         JOIN users u ON u.id = ar.user_id
         JOIN domains d ON d.id = ar.domain_id
         {ROW_FILTER}"
    ))
    .bind(filter.user_id)
    .bind(filter.status)
    .bind(filter.request_type)
    .bind(filter.domain_id)
    .bind(search.as_deref())
    .fetch_one(pool)
    .await
    .map_err(db_error!("count_access_requests", page = filter.page))?;

    Ok((rows, total))
}
