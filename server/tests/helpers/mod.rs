//! Reusable test helpers for HTTP integration tests.
//!
//! `TestApp` drives the full axum router through `tower::ServiceExt::oneshot`
//! over a `#[sqlx::test]` database, with the in-memory ephemeral store and
//! no rate limiter.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{self, header, Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use totp_rs::{Algorithm, Secret, TOTP};

use authcenter_server::api::{create_router, AppState};
use authcenter_server::auth::mfa_crypto::SecretSealer;
use authcenter_server::auth::two_factor::TwoFactor;
use authcenter_server::auth::{hash_password, ExtraClaims, TokenService};
use authcenter_server::config::Config;
use authcenter_server::db::{self, NewUser, Role, User, UserOrigin, UserStatus};
use authcenter_server::ephemeral::EphemeralStore;

pub const PASSWORD: &str = "correct horse battery";

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: Router,
    pub pool: PgPool,
    pub config: Config,
    pub tokens: TokenService,
    /// Shared with the router, for reading parked records.
    pub ephemeral: EphemeralStore,
}

impl TestApp {
    /// Build with 2FA enforcement off so password login completes.
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(
            pool,
            Config {
                two_factor_required: false,
                ..Config::default_for_test()
            },
        )
    }

    pub fn with_config(pool: PgPool, config: Config) -> Self {
        let ephemeral = EphemeralStore::in_memory();
        let state = AppState::new(pool.clone(), config.clone(), ephemeral.clone(), None)
            .expect("Failed to build app state");
        let tokens = TokenService::from_config(&config).expect("Failed to build token service");

        Self {
            router: create_router(state),
            pool,
            config,
            tokens,
            ephemeral,
        }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// Send a JSON body, optionally with a bearer token.
    pub async fn send_json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Response<Body> {
        let mut builder = Self::request(method, uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Send a bodyless request, optionally with a bearer token.
    pub async fn send(&self, method: Method, uri: &str, token: Option<&str>) -> Response<Body> {
        let mut builder = Self::request(method, uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.oneshot(builder.body(Body::empty()).unwrap()).await
    }

    /// Send a raw body with extra headers.
    pub async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Response<Body> {
        let mut builder = Self::request(method, uri).header(header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.oneshot(builder.body(Body::from(body)).unwrap()).await
    }

    /// Give `user` a 2FA secret, sealed the way the app stores it, and
    /// return the plain secret.
    pub async fn enroll_two_factor(&self, user: &User) -> String {
        let secret = TwoFactor::generate_secret();
        let sealer = SecretSealer::from_hex(&self.config.mfa_encryption_key).expect("sealer");
        db::set_two_factor_secret(&self.pool, user.id, &sealer.seal(&secret).expect("seal"))
            .await
            .expect("Failed to store 2FA secret");
        secret
    }

    /// Access token for `user`, signed with the app's key.
    pub fn token_for(&self, user: &User) -> String {
        self.tokens
            .issue(user.uuid, &user.email, ExtraClaims::default())
            .expect("Failed to issue token")
    }
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

/// Assert the status and return the JSON body.
pub async fn expect_json(response: Response<Body>, status: StatusCode) -> Value {
    let actual = response.status();
    let body = body_json(response).await;
    assert_eq!(actual, status, "unexpected status, body: {body}");
    body
}

/// Options for [`create_user`].
#[derive(Debug, Clone, Copy)]
pub struct UserSpec<'a> {
    pub email: &'a str,
    pub approved: bool,
    pub status: UserStatus,
    pub admin: bool,
    pub external_role: Option<&'a str>,
}

impl<'a> UserSpec<'a> {
    pub const fn member(email: &'a str) -> Self {
        Self {
            email,
            approved: true,
            status: UserStatus::Active,
            admin: false,
            external_role: None,
        }
    }

    pub const fn admin(email: &'a str) -> Self {
        Self {
            admin: true,
            ..Self::member(email)
        }
    }
}

/// Insert a user with [`PASSWORD`].
pub async fn create_user(pool: &PgPool, spec: UserSpec<'_>) -> User {
    let password_hash = hash_password(PASSWORD).expect("hash");
    let mut conn = pool.acquire().await.expect("acquire");
    let user = db::insert_user(
        &mut conn,
        &NewUser {
            uuid: Uuid::new_v4(),
            first_name: "Test",
            last_name: "User",
            email: spec.email,
            password_hash: &password_hash,
            external_role: spec.external_role,
            status: spec.status,
            is_approved: spec.approved,
            user_origin: UserOrigin::Authcenter,
            two_factor_secret: None,
            is_2fa_enabled: false,
            is_2fa_verified: false,
        },
    )
    .await
    .expect("Failed to create user");

    if spec.admin {
        sqlx::query("UPDATE users SET role = $2 WHERE id = $1")
            .bind(user.id)
            .bind(Role::Admin)
            .execute(pool)
            .await
            .expect("Failed to promote user");
        return db::find_user_by_id(pool, user.id)
            .await
            .expect("query")
            .expect("user");
    }
    user
}

/// Domain id by key from the seeded domain set.
pub async fn domain_id(pool: &PgPool, key: &str) -> i64 {
    sqlx::query_scalar("SELECT id FROM domains WHERE key = $1")
        .bind(key)
        .fetch_one(pool)
        .await
        .expect("Seeded domain missing")
}

/// Grant `key` to `user` directly.
pub async fn grant(pool: &PgPool, user: &User, key: &str) {
    let id = domain_id(pool, key).await;
    let mut conn = pool.acquire().await.expect("acquire");
    db::attach_domain(&mut conn, user.id, id)
        .await
        .expect("Failed to attach domain");
}

/// Current TOTP code for a base32 secret.
pub fn totp_code(secret: &str) -> String {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .expect("base32 secret");
    TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, "test".to_string())
        .expect("valid TOTP parameters")
        .generate_current()
        .expect("system clock")
}

/// A six-digit code that differs from `code`.
pub fn wrong_code(code: &str) -> String {
    let n: u32 = code.parse().expect("numeric code");
    format!("{:06}", (n + 500_000) % 1_000_000)
}
