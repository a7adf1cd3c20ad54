//! Admin request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::db::{LockStatus, SystemSetting};

/// Upper bound on uuids per lock status lookup.
pub const MAX_LOCK_STATUS_BATCH: u64 = 200;

#[derive(Debug, Deserialize, Validate)]
pub struct LockStatusRequest {
    #[validate(length(min = 1, max = MAX_LOCK_STATUS_BATCH))]
    pub uuids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct LockStatusResponse {
    pub users: Vec<LockStatus>,
}

/// Optimistic write of one setting. `version` is the version last read;
/// 0 creates the setting.
#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub value: Value,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub settings: Vec<SystemSetting>,
}

#[derive(Debug, Serialize)]
pub struct AdminMessage {
    pub message: &'static str,
}
