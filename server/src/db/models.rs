//! Database Models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub uuid: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub external_role: Option<String>,
    pub status: UserStatus,
    pub is_approved: bool,
    pub user_origin: UserOrigin,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub two_factor_secret: Option<String>,
    pub is_2fa_enabled: bool,
    pub is_2fa_verified: bool,
    pub external_active_status: sqlx::types::Json<serde_json::Map<String, serde_json::Value>>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Partner-role value that marks an administrator in a partner system.
pub const PARTNER_ADMIN_ROLE: &str = "Admin";

impl User {
    /// Resolve the role used for every authorization decision.
    ///
    /// Accounts provisioned from `site_access_info` are administered by the
    /// partner system, so a partner role of `Admin` elevates them. Every
    /// other account uses its base role.
    pub fn effective_role(&self) -> Role {
        if self.user_origin == UserOrigin::SiteAccessInfo && self.has_partner_admin_role() {
            return Role::Admin;
        }
        self.role
    }

    /// Whether the user holds admin-equivalent privileges.
    pub fn is_admin(&self) -> bool {
        self.effective_role() == Role::Admin
    }

    /// Whether the partner-role field carries the admin sentinel.
    pub fn has_partner_admin_role(&self) -> bool {
        self.external_role.as_deref() == Some(PARTNER_ADMIN_ROLE)
    }

    /// Whether `locked_until` lies in the future.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Whether the account may authenticate at all.
    pub fn in_good_standing(&self) -> bool {
        self.is_approved && self.status == UserStatus::Active && self.deleted_at.is_none()
    }

    /// External status reported for a domain (`active` / `inactive`).
    pub fn external_status_for(&self, domain_key: &str) -> Option<&str> {
        self.external_active_status
            .get(domain_key)
            .and_then(serde_json::Value::as_str)
    }
}

/// Coarse role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

/// System that onboarded the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_origin", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserOrigin {
    Ccms,
    Jobfinder,
    Solucomp,
    Authcenter,
    SiteAccessInfo,
    Ets,
}

impl UserOrigin {
    /// Domain key of the origin system, for origins that are domains.
    pub const fn domain_key(self) -> Option<&'static str> {
        match self {
            Self::Ccms => Some("ccms"),
            Self::Jobfinder => Some("jobfinder"),
            Self::Solucomp => Some("solucomp"),
            Self::Authcenter | Self::SiteAccessInfo | Self::Ets => None,
        }
    }
}

/// Downstream tenant application.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Domain {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub url: String,
    pub image_url: Option<String>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Access request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Access,
    Activation,
}

/// Access request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Access request ledger row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: i64,
    pub user_uuid: Uuid,
    pub user_id: i64,
    pub domain_id: i64,
    pub domain_name: String,
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub message: Option<String>,
    pub acted_by: Option<i64>,
    pub acted_at: Option<DateTime<Utc>>,
    pub external_active_status: Option<String>,
    pub deactivate_info: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Access request joined with requester and domain fields for listings.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AccessRequestRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub request: AccessRequest,
    pub requester_first_name: String,
    pub requester_last_name: String,
    pub requester_email: String,
    pub domain_key: String,
}

/// Stored refresh token (hash only).
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: i64,
    pub user_uuid: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Versioned system setting.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: serde_json::Value,
    pub version: i64,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Lock state reported to administrators.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LockStatus {
    pub uuid: Uuid,
    pub email: String,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Counts shown on the admin panel after login.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdminCounts {
    pub total_users: i64,
    pub total_domains: i64,
    pub un_approved_user_count: i64,
    pub un_approved_request_count: i64,
}

/// Fields for a new user row.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub uuid: Uuid,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub external_role: Option<&'a str>,
    pub status: UserStatus,
    pub is_approved: bool,
    pub user_origin: UserOrigin,
    pub two_factor_secret: Option<&'a str>,
    pub is_2fa_enabled: bool,
    pub is_2fa_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, origin: UserOrigin, external_role: Option<&str>) -> User {
        let now = Utc::now();
        User {
            id: 1,
            uuid: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            role,
            external_role: external_role.map(str::to_string),
            status: UserStatus::Active,
            is_approved: true,
            user_origin: origin,
            failed_attempts: 0,
            locked_until: None,
            two_factor_secret: None,
            is_2fa_enabled: false,
            is_2fa_verified: false,
            external_active_status: sqlx::types::Json(serde_json::Map::new()),
            image_url: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn base_role_applies_outside_partner_origin() {
        let u = user(Role::User, UserOrigin::Jobfinder, Some("Admin"));
        assert_eq!(u.effective_role(), Role::User);
        assert!(!u.is_admin());

        let u = user(Role::Admin, UserOrigin::Jobfinder, None);
        assert!(u.is_admin());
    }

    #[test]
    fn partner_admin_elevates_site_access_accounts() {
        let u = user(Role::User, UserOrigin::SiteAccessInfo, Some("Admin"));
        assert_eq!(u.effective_role(), Role::Admin);

        let u = user(Role::User, UserOrigin::SiteAccessInfo, Some("Viewer"));
        assert_eq!(u.effective_role(), Role::User);
    }

    #[test]
    fn lock_window_is_exclusive_of_now() {
        let mut u = user(Role::User, UserOrigin::Authcenter, None);
        let now = Utc::now();
        assert!(!u.is_locked_at(now));

        u.locked_until = Some(now + chrono::Duration::minutes(15));
        assert!(u.is_locked_at(now));

        u.locked_until = Some(now);
        assert!(!u.is_locked_at(now));
    }

    #[test]
    fn good_standing_requires_approval_and_active_status() {
        let mut u = user(Role::User, UserOrigin::Authcenter, None);
        assert!(u.in_good_standing());

        u.is_approved = false;
        assert!(!u.in_good_standing());

        u.is_approved = true;
        u.status = UserStatus::Suspended;
        assert!(!u.in_good_standing());
    }
}
