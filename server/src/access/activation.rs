//! Activation side effects.
//!
//! Activation requests drive two downstream calls, both detached from the
//! request that triggered them: the reactivation itself and a lookup of
//! who deactivated the user.

use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::queries;
use crate::db;
use crate::sync::DownstreamClient;

/// What a detached activation job needs to know about its request.
#[derive(Debug, Clone)]
pub struct ActivationTarget {
    pub request_id: i64,
    pub user_id: i64,
    pub user_uuid: Uuid,
    pub domain_key: String,
}

/// Reactivate the user downstream and record the result locally.
pub fn spawn_activation(db: PgPool, client: DownstreamClient, target: ActivationTarget) {
    if !client.supports_activation(&target.domain_key) {
        info!(domain_key = %target.domain_key, request_id = target.request_id, "Domain does not support user activation");
        return;
    }

    tokio::spawn(async move {
        if let Err(e) = client.activate(&target.domain_key, target.user_uuid).await {
            error!(
                request_id = target.request_id,
                user_uuid = %target.user_uuid,
                domain_key = %target.domain_key,
                error = %e,
                "User activation failed"
            );
            return;
        }

        if let Err(e) =
            db::set_user_external_status(&db, target.user_id, &target.domain_key, "active").await
        {
            error!(user_id = target.user_id, error = %e, "Failed to record external activation");
        }
        if let Err(e) = queries::set_external_status(&db, target.request_id, "active").await {
            error!(request_id = target.request_id, error = %e, "Failed to mark request active");
        }
    });
}

/// Ask the domain who deactivated the user; `None` on any failure.
pub async fn fetch_deactivation_info(
    client: &DownstreamClient,
    target: &ActivationTarget,
) -> Option<Value> {
    if !client.supports_activation(&target.domain_key) {
        info!(domain_key = %target.domain_key, "Domain does not report deactivation info");
        return None;
    }

    match client
        .deactivated_by(&target.domain_key, target.user_uuid)
        .await
    {
        Ok(info) => info,
        Err(e) => {
            warn!(
                request_id = target.request_id,
                domain_key = %target.domain_key,
                error = %e,
                "Deactivation lookup failed"
            );
            None
        }
    }
}

/// Fetch deactivation info and store it on the request.
pub async fn refresh_deactivation_info(
    db: &PgPool,
    client: &DownstreamClient,
    target: &ActivationTarget,
) -> Option<Value> {
    let info = fetch_deactivation_info(client, target).await?;
    if let Err(e) = queries::set_deactivate_info(db, target.request_id, &info).await {
        error!(request_id = target.request_id, error = %e, "Failed to store deactivation info");
    }
    Some(info)
}

/// Run [`refresh_deactivation_info`] on its own task.
pub fn spawn_deactivation_lookup(db: PgPool, client: DownstreamClient, target: ActivationTarget) {
    tokio::spawn(async move {
        if refresh_deactivation_info(&db, &client, &target).await.is_some() {
            info!(request_id = target.request_id, "Deactivation info stored");
        }
    });
}
