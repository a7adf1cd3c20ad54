//! Fire-and-forget downstream jobs.
//!
//! Each job runs on its own task, logs its outcome and never reports back
//! to the request that started it.

use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::client::{DownstreamClient, PermissionAction, UserSyncPayload};
use crate::db::{self, User};

/// Domains that accept user propagation and deletion.
pub const SYNC_TARGETS: [&str; 3] = ["ccms", "jobfinder", "solucomp"];

/// Domains to push an update to: granted sync targets except the origin.
pub fn propagation_targets(granted: &[String], origin: Option<&str>) -> Vec<String> {
    granted
        .iter()
        .filter(|key| SYNC_TARGETS.contains(&key.as_str()))
        .filter(|key| Some(key.as_str()) != origin)
        .cloned()
        .collect()
}

/// Push a user's identity to every other domain they can reach.
pub fn spawn_propagation(db: PgPool, client: DownstreamClient, user: User, origin: Option<String>) {
    tokio::spawn(async move {
        let granted = match db::domain_keys_for_user(&db, user.id).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(user_uuid = %user.uuid, error = %e, "Failed to load domains for propagation");
                return;
            }
        };

        let targets = propagation_targets(&granted, origin.as_deref());
        if targets.is_empty() {
            info!(user_uuid = %user.uuid, origin = ?origin, "No linked domains to propagate to");
            return;
        }

        let payload = UserSyncPayload {
            uuid: user.uuid,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            password: user.password_hash,
        };

        for key in targets {
            if let Err(e) = client.propagate_user(&key, &payload).await {
                error!(domain_key = %key, user_uuid = %payload.uuid, error = %e, "User propagation failed");
            }
        }
    });
}

/// Tell each listed domain that the user was deleted.
pub fn spawn_deletion(client: DownstreamClient, uuid: Uuid, domain_keys: Vec<String>) {
    tokio::spawn(async move {
        for key in domain_keys
            .iter()
            .filter(|key| SYNC_TARGETS.contains(&key.as_str()))
        {
            if let Err(e) = client.delete_user(key, uuid).await {
                error!(domain_key = %key, user_uuid = %uuid, error = %e, "User deletion sync failed");
            }
        }
    });
}

/// Assign or revoke a page permission in the background.
pub fn spawn_page_permission(
    client: DownstreamClient,
    uuid: Uuid,
    permission: &'static str,
    action: PermissionAction,
) {
    tokio::spawn(async move {
        if let Err(e) = client.sync_page_permission(uuid, permission, action).await {
            warn!(user_uuid = %uuid, permission, ?action, error = %e, "Page permission sync failed");
        }
    });
}
