//! Domains and Grants
//!
//! Satellite domains (`solucomp_cop`, `solucomp_compare`) imply a grant on
//! their parent and map to a page permission in the parent's
//! page-permission service.

mod handlers;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use sqlx::PgConnection;

use crate::api::AppState;
use crate::auth::{require_admin, require_auth};
use crate::db::{self, Domain};

/// Parent domain implied by a satellite grant.
pub fn parent_domain_key(key: &str) -> Option<&'static str> {
    match key {
        "solucomp_cop" | "solucomp_compare" => Some("solucomp"),
        _ => None,
    }
}

/// Page permission mirrored for a satellite grant.
pub fn page_permission_path(key: &str) -> Option<&'static str> {
    match key {
        "solucomp_cop" => Some("/Admin/cop"),
        "solucomp_compare" => Some("/Admin/compare"),
        _ => None,
    }
}

/// Attach a grant and, for satellites, the parent grant. Idempotent.
pub async fn attach_with_parent(
    conn: &mut PgConnection,
    user_id: i64,
    domain: &Domain,
) -> sqlx::Result<()> {
    db::attach_domain(&mut *conn, user_id, domain.id).await?;

    if let Some(parent_key) = parent_domain_key(&domain.key) {
        match db::find_domain_by_key(&mut *conn, parent_key).await? {
            Some(parent) => {
                db::attach_domain(&mut *conn, user_id, parent.id).await?;
            }
            None => tracing::warn!(domain_key = parent_key, "Parent domain missing"),
        }
    }
    Ok(())
}

/// [`attach_with_parent`] by domain key. `None` if the key is unknown.
pub async fn attach_by_key(
    conn: &mut PgConnection,
    user_id: i64,
    key: &str,
) -> sqlx::Result<Option<Domain>> {
    let Some(domain) = db::find_domain_by_key(&mut *conn, key).await? else {
        return Ok(None);
    };
    attach_with_parent(conn, user_id, &domain).await?;
    Ok(Some(domain))
}

/// Create the domains router.
///
/// - GET /auth/domains (authenticated)
/// - GET /admin/users/{uuid}/domains (admin)
/// - POST/DELETE /admin/users/{uuid}/domains/{domain_id} (admin)
pub fn router(state: AppState) -> Router<AppState> {
    let admin_routes = Router::new()
        .route(
            "/admin/users/{uuid}/domains",
            get(handlers::user_domains),
        )
        .route(
            "/admin/users/{uuid}/domains/{domain_id}",
            post(handlers::grant).delete(handlers::revoke),
        )
        .layer(from_fn(require_admin));

    Router::new()
        .route("/auth/domains", get(handlers::list_for_user))
        .merge(admin_routes)
        .layer(from_fn_with_state(state, require_auth))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satellites_map_to_solucomp() {
        assert_eq!(parent_domain_key("solucomp_cop"), Some("solucomp"));
        assert_eq!(parent_domain_key("solucomp_compare"), Some("solucomp"));
        assert_eq!(parent_domain_key("solucomp"), None);
        assert_eq!(parent_domain_key("ccms"), None);
    }

    #[test]
    fn satellites_carry_page_permissions() {
        assert_eq!(page_permission_path("solucomp_cop"), Some("/Admin/cop"));
        assert_eq!(page_permission_path("solucomp_compare"), Some("/Admin/compare"));
        assert_eq!(page_permission_path("jobfinder"), None);
    }
}
