//! Downstream HTTP Client
//!
//! Calls into the domain services. Every call is bounded by a timeout and
//! reports failure as a [`SyncError`]; callers decide whether to log or
//! surface it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::signing::{sign_payload, SIGNATURE_HEADER};
use crate::config::DownstreamConfig;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("No endpoint for domain '{0}'")]
    NoEndpoint(String),

    #[error("Downstream responded with HTTP {0}")]
    Status(StatusCode),

    #[error("Failed to sign payload")]
    Signing,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Assign or revoke a page permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Assign,
    Revoke,
}

/// Identity fields pushed to sibling domains.
#[derive(Debug, Clone, Serialize)]
pub struct UserSyncPayload {
    pub uuid: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Password hash as stored here.
    pub password: String,
}

/// Client for downstream domain services.
#[derive(Clone)]
pub struct DownstreamClient {
    http: reqwest::Client,
    config: Arc<DownstreamConfig>,
    sync_key: Option<Arc<[u8]>>,
}

impl std::fmt::Debug for DownstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownstreamClient")
            .field("activation_domains", &self.config.activation_urls.keys())
            .field("sync_domains", &self.config.sync_urls.keys())
            .field("signing", &self.sync_key.is_some())
            .finish_non_exhaustive()
    }
}

impl DownstreamClient {
    pub fn new(config: DownstreamConfig) -> Self {
        let sync_key = config.sync_key().map(Arc::from);
        Self {
            http: reqwest::Client::new(),
            config: Arc::new(config),
            sync_key,
        }
    }

    /// Decoded HMAC key shared with the domain services.
    pub fn sync_key(&self) -> Option<&[u8]> {
        self.sync_key.as_deref()
    }

    /// Whether the domain exposes activation endpoints.
    pub fn supports_activation(&self, domain_key: &str) -> bool {
        self.config.activation_urls.contains_key(domain_key)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn bearer(&self) -> Result<&str, SyncError> {
        self.config
            .sync_secret
            .as_deref()
            .ok_or(SyncError::NotConfigured("SYNC_SECRET"))
    }

    fn activation_base(&self, domain_key: &str) -> Result<&str, SyncError> {
        self.config
            .activation_urls
            .get(domain_key)
            .map(|url| url.trim_end_matches('/'))
            .ok_or_else(|| SyncError::NoEndpoint(domain_key.to_string()))
    }

    fn ensure_success(response: &reqwest::Response) -> Result<(), SyncError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SyncError::Status(status))
        }
    }

    /// Ask a domain to reactivate a user.
    ///
    /// POST `{base}/users/{uuid}/activate`
    #[tracing::instrument(skip(self))]
    pub async fn activate(&self, domain_key: &str, uuid: Uuid) -> Result<(), SyncError> {
        let url = format!("{}/users/{uuid}/activate", self.activation_base(domain_key)?);

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.bearer()?)
            .timeout(self.timeout())
            .json(&json!({ "user_uuid": uuid, "need_active": true }))
            .send()
            .await?;
        Self::ensure_success(&response)?;

        info!(domain_key = %domain_key, user_uuid = %uuid, "User activated downstream");
        Ok(())
    }

    /// Who deactivated a user in a domain, if the domain knows.
    ///
    /// GET `{base}/users/{uuid}/deactivated-by`. The returned object carries
    /// the domain's `deactivated_by` fields plus `domain` and
    /// `deactivation_date`.
    #[tracing::instrument(skip(self))]
    pub async fn deactivated_by(
        &self,
        domain_key: &str,
        uuid: Uuid,
    ) -> Result<Option<Value>, SyncError> {
        let url = format!(
            "{}/users/{uuid}/deactivated-by",
            self.activation_base(domain_key)?
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.bearer()?)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout())
            .send()
            .await?;
        Self::ensure_success(&response)?;

        let body: Value = response.json().await?;
        Ok(deactivation_info(&body, domain_key))
    }

    /// Push identity changes to a sibling domain.
    #[tracing::instrument(skip(self, payload), fields(user_uuid = %payload.uuid))]
    pub async fn propagate_user(
        &self,
        domain_key: &str,
        payload: &UserSyncPayload,
    ) -> Result<(), SyncError> {
        let url = self
            .config
            .sync_urls
            .get(domain_key)
            .ok_or_else(|| SyncError::NoEndpoint(domain_key.to_string()))?;
        let body = serde_json::to_vec(payload)?;

        // Signed when a sync key is configured.
        let mut request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout());
        if self.sync_key.is_some() {
            request = request.header(SIGNATURE_HEADER, self.sign(&body)?);
        }

        let response = request.body(body).send().await?;
        Self::ensure_success(&response)?;

        info!(domain_key = %domain_key, "User propagated");
        Ok(())
    }

    /// Tell a domain the user is gone.
    ///
    /// DELETE `{url}/{uuid}`
    #[tracing::instrument(skip(self))]
    pub async fn delete_user(&self, domain_key: &str, uuid: Uuid) -> Result<(), SyncError> {
        let base = self
            .config
            .delete_urls
            .get(domain_key)
            .ok_or_else(|| SyncError::NoEndpoint(domain_key.to_string()))?;
        let url = format!("{}/{uuid}", base.trim_end_matches('/'));

        let response = self
            .http
            .delete(&url)
            .bearer_auth(self.bearer()?)
            .timeout(self.timeout())
            .send()
            .await?;
        Self::ensure_success(&response)?;

        info!(domain_key = %domain_key, user_uuid = %uuid, "User deletion synced");
        Ok(())
    }

    /// Assign or revoke a page permission in the page-permission service.
    #[tracing::instrument(skip(self))]
    pub async fn sync_page_permission(
        &self,
        uuid: Uuid,
        permission: &str,
        action: PermissionAction,
    ) -> Result<(), SyncError> {
        let url = self
            .config
            .page_permission_url
            .as_deref()
            .ok_or(SyncError::NotConfigured("PAGE_PERMISSION_URL"))?;
        let body = serde_json::to_vec(&json!({
            "uuid": uuid,
            "permission": permission,
            "action": action,
        }))?;
        let signature = self.sign(&body)?;

        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .timeout(self.timeout())
            .body(body)
            .send()
            .await?;
        Self::ensure_success(&response)?;

        info!(permission = %permission, ?action, "Page permission synced");
        Ok(())
    }

    /// Page permissions held by the caller, looked up with their own token.
    ///
    /// Any failure yields an empty list.
    pub async fn fetch_page_permissions(&self, bearer: &str) -> Vec<Value> {
        let Some(url) = self.config.user_page_permission_url.as_deref() else {
            debug!("USER_PAGE_PERMISSION_URL not configured");
            return Vec::new();
        };

        let result = async {
            let response = self
                .http
                .get(url)
                .bearer_auth(bearer)
                .header(reqwest::header::ACCEPT, "application/json")
                .timeout(Duration::from_secs(self.config.lookup_timeout_secs))
                .send()
                .await?;
            Self::ensure_success(&response)?;
            Ok::<Value, SyncError>(response.json().await?)
        }
        .await;

        match result {
            Ok(body) => page_permissions(&body),
            Err(e) => {
                warn!(error = %e, "Page permission lookup failed");
                Vec::new()
            }
        }
    }

    fn sign(&self, body: &[u8]) -> Result<String, SyncError> {
        let key = self
            .sync_key()
            .ok_or(SyncError::NotConfigured("SYNC_SECRET"))?;
        sign_payload(key, body).ok_or(SyncError::Signing)
    }
}

/// Extract deactivation details from a `deactivated-by` response.
fn deactivation_info(body: &Value, domain_key: &str) -> Option<Value> {
    if body.get("status").and_then(Value::as_str) != Some("success") {
        return None;
    }
    let data = body.get("data")?;
    let mut info = data.get("deactivated_by")?.as_object()?.clone();
    info.insert("domain".into(), Value::String(domain_key.to_string()));
    info.insert(
        "deactivation_date".into(),
        data.get("deactivation_date").cloned().unwrap_or(Value::Null),
    );
    Some(Value::Object(info))
}

fn page_permissions(body: &Value) -> Vec<Value> {
    body.get("page_permissions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
