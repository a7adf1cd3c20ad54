//! OAuth2 authorization-code + PKCE integration tests.
//!
//! Run with: `cargo test --test oauth_test`

mod helpers;

use axum::body::Body;
use axum::http::{header, Method, Response, StatusCode};
use reqwest::Url;
use serde_json::json;
use sqlx::PgPool;

use authcenter_server::db::User;
use authcenter_server::oauth::pkce;
use helpers::{create_user, expect_json, TestApp, UserSpec};

const REDIRECT_URI: &str = "https://admin.example.com/callback";
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

fn authorize_uri(pairs: &[(&str, &str)]) -> String {
    let url = Url::parse_with_params("http://localhost/authorize", pairs).unwrap();
    format!("{}?{}", url.path(), url.query().unwrap_or_default())
}

fn standard_params<'a>(client_id: &'a str, scope: &'a str, challenge: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("client_id", client_id),
        ("redirect_uri", REDIRECT_URI),
        ("response_type", "code"),
        ("scope", scope),
        ("state", "xyz"),
        ("code_challenge", challenge),
        ("code_challenge_method", "S256"),
    ]
}

/// Query pairs of the `Location` header of a 302.
fn redirect_pairs(response: &Response<Body>) -> Vec<(String, String)> {
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let url = Url::parse(location).unwrap();
    assert!(location.starts_with(REDIRECT_URI));
    url.query_pairs().into_owned().collect()
}

fn param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

async fn authorize(app: &TestApp, user: &User, scope: &str) -> String {
    let client_id = user.uuid.to_string();
    let challenge = pkce::challenge_for(VERIFIER);
    let uri = authorize_uri(&standard_params(&client_id, scope, &challenge));

    let response = app.send(Method::GET, &uri, None).await;
    let pairs = redirect_pairs(&response);
    assert_eq!(param(&pairs, "state"), Some("xyz"));
    assert_eq!(param(&pairs, "error"), None);
    param(&pairs, "code").expect("code missing").to_string()
}

async fn redeem(app: &TestApp, user: &User, code: &str, verifier: &str) -> Response<Body> {
    let form = Url::parse_with_params(
        "http://localhost/",
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", &user.uuid.to_string()),
            ("code_verifier", verifier),
        ],
    )
    .unwrap()
    .query()
    .unwrap_or_default()
    .to_string();

    app.oneshot(
        TestApp::request(Method::POST, "/oauth/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap(),
    )
    .await
}

#[sqlx::test]
async fn test_full_code_flow(pool: PgPool) {
    let app = TestApp::new(pool.clone());
    let user = create_user(&pool, UserSpec::member("oauth@example.com")).await;

    let code = authorize(&app, &user, "openid profile").await;
    assert!(code.len() >= 32);

    let response = redeem(&app, &user, &code, VERIFIER).await;
    let body = expect_json(response, StatusCode::OK).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "openid profile");
    assert_eq!(body["expires_in"], app.config.jwt_ttl);
    let access_token = body["access_token"].as_str().unwrap().to_string();

    let claims = app.tokens.decode(&access_token).unwrap();
    assert_eq!(claims.scope.as_deref(), Some("openid profile"));
    assert_eq!(claims.client_id, Some(user.uuid.to_string()));

    let response = app
        .send(Method::GET, "/oauth/validate", Some(&access_token))
        .await;
    let body = expect_json(response, StatusCode::OK).await;
    assert_eq!(body["user"]["uuid"], user.uuid.to_string());
    assert_eq!(body["user"]["full_name"], "Test");
    assert_eq!(body["user"]["status"], "active");
}

#[sqlx::test]
async fn test_code_is_single_use(pool: PgPool) {
    let app = TestApp::new(pool.clone());
    let user = create_user(&pool, UserSpec::member("once@example.com")).await;
    let code = authorize(&app, &user, "openid").await;

    let first = redeem(&app, &user, &code, VERIFIER).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = redeem(&app, &user, &code, VERIFIER).await;
    let body = expect_json(second, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["error"], "invalid_grant");
}

#[sqlx::test]
async fn test_wrong_verifier_spends_the_code(pool: PgPool) {
    let app = TestApp::new(pool.clone());
    let user = create_user(&pool, UserSpec::member("pkce@example.com")).await;
    let code = authorize(&app, &user, "openid").await;

    let mut mutated = VERIFIER.to_string();
    mutated.replace_range(0..1, "e");
    let response = redeem(&app, &user, &code, &mutated).await;
    let body = expect_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "Invalid code verifier");

    let response = redeem(&app, &user, &code, VERIFIER).await;
    let body = expect_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["error"], "invalid_grant");
}

#[sqlx::test]
async fn test_token_accepts_json_and_checks_client(pool: PgPool) {
    let app = TestApp::new(pool.clone());
    let user = create_user(&pool, UserSpec::member("json@example.com")).await;
    let code = authorize(&app, &user, "openid").await;

    let response = app
        .send_json(
            Method::POST,
            "/oauth/token",
            None,
            &json!({
                "grant_type": "authorization_code",
                "code": code,
                "redirect_uri": REDIRECT_URI,
                "client_id": "someone-else",
                "code_verifier": VERIFIER,
            }),
        )
        .await;
    let body = expect_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["error"], "invalid_client");

    let response = app
        .send_json(
            Method::POST,
            "/oauth/token",
            None,
            &json!({ "grant_type": "password", "code": "x" }),
        )
        .await;
    let body = expect_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[sqlx::test]
async fn test_unknown_client_redirects_with_error(pool: PgPool) {
    let app = TestApp::new(pool);
    let challenge = pkce::challenge_for(VERIFIER);
    let uri = authorize_uri(&standard_params("unknown-client", "openid", &challenge));

    let response = app.send(Method::GET, &uri, None).await;
    let pairs = redirect_pairs(&response);
    assert_eq!(param(&pairs, "error"), Some("invalid_client"));
    assert_eq!(param(&pairs, "state"), Some("xyz"));
    assert_eq!(param(&pairs, "code"), None);
}

#[sqlx::test]
async fn test_admin_scope_needs_partner_admin(pool: PgPool) {
    let app = TestApp::new(pool.clone());
    let member = create_user(&pool, UserSpec::member("plain@example.com")).await;
    let partner_admin = create_user(
        &pool,
        UserSpec {
            external_role: Some("Admin"),
            ..UserSpec::member("partner@example.com")
        },
    )
    .await;
    let challenge = pkce::challenge_for(VERIFIER);

    let client_id = member.uuid.to_string();
    let uri = authorize_uri(&standard_params(&client_id, "openid admin:access", &challenge));
    let response = app.send(Method::GET, &uri, None).await;
    let pairs = redirect_pairs(&response);
    assert_eq!(param(&pairs, "error"), Some("access_denied"));

    authorize(&app, &partner_admin, "openid admin:access").await;
}

#[sqlx::test]
async fn test_unapproved_user_is_denied(pool: PgPool) {
    let app = TestApp::new(pool.clone());
    let user = create_user(
        &pool,
        UserSpec {
            approved: false,
            ..UserSpec::member("pending@example.com")
        },
    )
    .await;
    let challenge = pkce::challenge_for(VERIFIER);
    let client_id = user.uuid.to_string();

    let response = app
        .send(
            Method::GET,
            &authorize_uri(&standard_params(&client_id, "openid", &challenge)),
            None,
        )
        .await;
    let pairs = redirect_pairs(&response);
    assert_eq!(param(&pairs, "error"), Some("access_denied"));
}

#[sqlx::test]
async fn test_bad_parameters(pool: PgPool) {
    let app = TestApp::new(pool.clone());
    let user = create_user(&pool, UserSpec::member("params@example.com")).await;
    let client_id = user.uuid.to_string();

    // No usable redirect target: a direct JSON error.
    let response = app
        .send(
            Method::GET,
            &authorize_uri(&[("client_id", client_id.as_str()), ("redirect_uri", "not a url")]),
            None,
        )
        .await;
    let body = expect_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["error"], "invalid_request");

    // Plain PKCE is refused through the redirect.
    let mut params = standard_params(&client_id, "openid", "challenge");
    params.retain(|(k, _)| *k != "code_challenge_method");
    params.push(("code_challenge_method", "plain"));
    let response = app.send(Method::GET, &authorize_uri(&params), None).await;
    let pairs = redirect_pairs(&response);
    assert_eq!(param(&pairs, "error"), Some("invalid_request"));
}

#[sqlx::test]
async fn test_validate_checks_blacklist(pool: PgPool) {
    let app = TestApp::new(pool.clone());
    let user = create_user(&pool, UserSpec::member("revoked@example.com")).await;
    let token = app.token_for(&user);

    let response = app.send(Method::GET, "/oauth/validate", None).await;
    let body = expect_json(response, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "invalid_request");

    let response = app.send(Method::POST, "/auth/logout", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.send(Method::GET, "/oauth/validate", Some(&token)).await;
    let body = expect_json(response, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "invalid_token");
}
