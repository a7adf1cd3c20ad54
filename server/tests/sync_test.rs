//! Signed inbound user sync.
//!
//! Run with: `cargo test --test sync_test`

mod helpers;

use axum::http::{header, Method, StatusCode};
use reqwest::Url;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use authcenter_server::config::{Config, DownstreamConfig};
use authcenter_server::db::{self, UserStatus};
use authcenter_server::oauth::pkce;
use authcenter_server::sync::signing::{sign_payload, SIGNATURE_HEADER};
use helpers::{expect_json, TestApp};

const SYNC_KEY: &[u8] = b"test-sync-key";

fn app(pool: PgPool) -> TestApp {
    let base = Config::default_for_test();
    TestApp::with_config(
        pool,
        Config {
            two_factor_required: false,
            downstream: DownstreamConfig {
                sync_secret: Some("dGVzdC1zeW5jLWtleQ==".into()),
                ..base.downstream.clone()
            },
            ..base
        },
    )
}

fn payload(uuid: Uuid, email: &str, action: &str) -> Value {
    json!({
        "uuid": uuid,
        "full_name": "Mary",
        "last_name": "Jackson",
        "role": "Manager",
        "personal_email": email,
        "password": "synced-password",
        "action": action,
        "user_origin": "ccms",
    })
}

async fn push(app: &TestApp, body: &Value) -> axum::http::Response<axum::body::Body> {
    let raw = body.to_string().into_bytes();
    let signature = sign_payload(SYNC_KEY, &raw).unwrap();
    app.send_raw(
        Method::POST,
        "/internal-sync-user",
        &[(SIGNATURE_HEADER, signature.as_str())],
        raw,
    )
    .await
}

async fn login_status(app: &TestApp, email: &str, password: &str) -> StatusCode {
    app.send_json(
        Method::POST,
        "/auth/login",
        None,
        &json!({ "email": email, "password": password }),
    )
    .await
    .status()
}

#[sqlx::test]
async fn test_bad_signature_is_refused(pool: PgPool) {
    let app = app(pool.clone());
    let body = payload(Uuid::new_v4(), "mary@example.com", "created");
    let raw = body.to_string().into_bytes();

    let response = app
        .send_raw(Method::POST, "/internal-sync-user", &[], raw.clone())
        .await;
    let error = expect_json(response, StatusCode::UNAUTHORIZED).await;
    assert_eq!(error["error"], "invalid_signature");

    let forged = sign_payload(b"some-other-key", &raw).unwrap();
    let response = app
        .send_raw(
            Method::POST,
            "/internal-sync-user",
            &[(SIGNATURE_HEADER, forged.as_str())],
            raw,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(db::find_user_by_email(&pool, "mary@example.com")
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
async fn test_created_user_gets_origin_and_default_domains(pool: PgPool) {
    let app = app(pool.clone());
    let uuid = Uuid::new_v4();

    let response = push(&app, &payload(uuid, "mary@example.com", "created")).await;
    expect_json(response, StatusCode::OK).await;

    let user = db::find_user_by_uuid(&pool, uuid).await.unwrap().unwrap();
    assert!(user.is_approved);
    assert_eq!(user.status, UserStatus::Active);
    assert_eq!(user.external_role.as_deref(), Some("Manager"));

    let mut keys = db::domain_keys_for_user(&pool, user.id).await.unwrap();
    keys.sort();
    assert_eq!(keys, ["ccms", "jobfinder"]);

    assert_eq!(
        login_status(&app, "mary@example.com", "synced-password").await,
        StatusCode::OK
    );
}

#[sqlx::test]
async fn test_deactivated_user_is_created_inactive(pool: PgPool) {
    let app = app(pool.clone());
    let uuid = Uuid::new_v4();

    let response = push(&app, &payload(uuid, "gone@example.com", "deactivated")).await;
    expect_json(response, StatusCode::OK).await;

    let user = db::find_user_by_uuid(&pool, uuid).await.unwrap().unwrap();
    assert_eq!(user.status, UserStatus::Inactive);
}

#[sqlx::test]
async fn test_update_by_email_keeps_uuid_and_oauth_client(pool: PgPool) {
    let app = app(pool.clone());
    let original = Uuid::new_v4();

    let response = push(&app, &payload(original, "mary@example.com", "created")).await;
    expect_json(response, StatusCode::OK).await;

    // The sibling system knows her under a different id.
    let mut update = payload(Uuid::new_v4(), "mary@example.com", "updated");
    update["full_name"] = json!("Mary W.");
    update["password"] = json!("rotated-password");
    let response = push(&app, &update).await;
    expect_json(response, StatusCode::OK).await;

    let user = db::find_user_by_email(&pool, "mary@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.uuid, original);
    assert_eq!(user.first_name, "Mary W.");

    let client_id: String = sqlx::query_scalar("SELECT client_id FROM oauth_clients WHERE user_id = $1")
        .bind(user.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(client_id, original.to_string());

    let challenge = pkce::challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
    let client_id = original.to_string();
    let url = Url::parse_with_params(
        "http://localhost/authorize",
        &[
            ("client_id", client_id.as_str()),
            ("redirect_uri", "https://admin.example.com/callback"),
            ("response_type", "code"),
            ("scope", "openid"),
            ("state", "s1"),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
        ],
    )
    .unwrap();
    let response = app
        .send(
            Method::GET,
            &format!("{}?{}", url.path(), url.query().unwrap_or_default()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = Url::parse(response.headers()[header::LOCATION].to_str().unwrap()).unwrap();
    assert!(location.query_pairs().all(|(k, _)| k != "error"));
    assert!(location.query_pairs().any(|(k, _)| k == "code"));

    assert_eq!(
        login_status(&app, "mary@example.com", "rotated-password").await,
        StatusCode::OK
    );
}

#[sqlx::test]
async fn test_prehashed_password_is_stored_verbatim(pool: PgPool) {
    let app = app(pool.clone());
    let uuid = Uuid::new_v4();
    let hash = authcenter_server::auth::hash_password("hashed-elsewhere").unwrap();

    let mut body = payload(uuid, "hashed@example.com", "created");
    body["password"] = json!(hash);
    let response = push(&app, &body).await;
    expect_json(response, StatusCode::OK).await;

    let user = db::find_user_by_uuid(&pool, uuid).await.unwrap().unwrap();
    assert_eq!(user.password_hash, hash);
    assert_eq!(
        login_status(&app, "hashed@example.com", "hashed-elsewhere").await,
        StatusCode::OK
    );
}
