//! Integration tests for the HTTP API
//!
//! Drive the router directly with tower's `oneshot`; no sockets involved.
//! The rate cache is primed from a canned feed document so no network
//! access happens either.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use kursobot::email::Mailer;
use kursobot::rates::feed::parse_rate_table;
use kursobot::rates::RateCache;
use kursobot::storage::{create_pool, get_connection, DbPool};
use kursobot::web::{create_router, WebState};

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ValCurs Date="02.03.2026" name="Foreign Currency Market">
  <Valute ID="R01235">
    <NumCode>840</NumCode>
    <CharCode>USD</CharCode>
    <Nominal>1</Nominal>
    <Name>Доллар США</Name>
    <Value>90,50</Value>
  </Valute>
  <Valute ID="R01239">
    <NumCode>978</NumCode>
    <CharCode>EUR</CharCode>
    <Nominal>1</Nominal>
    <Name>Евро</Name>
    <Value>98,00</Value>
  </Valute>
  <Valute ID="R01760">
    <NumCode>203</NumCode>
    <CharCode>CZK</CharCode>
    <Nominal>10</Nominal>
    <Name>Чешских крон</Name>
    <Value>39,00</Value>
  </Valute>
</ValCurs>"#;

async fn create_test_app() -> (tempfile::TempDir, Router, Arc<DbPool>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.sqlite");
    let db = Arc::new(create_pool(path.to_str().unwrap()).unwrap());

    let rates = Arc::new(RateCache::with_ttl(
        "http://127.0.0.1:1/unused",
        Duration::from_secs(3600),
    ));
    rates.prime(parse_rate_table(FEED).unwrap()).await;

    let state = WebState {
        db: Arc::clone(&db),
        rates,
        mailer: Mailer::from_config().unwrap(),
    };
    (dir, create_router(state), db)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Reads the pending verification code straight from the database; the
/// mailer runs in no-op mode during tests.
fn pending_code(db: &Arc<DbPool>, user_id: i64) -> String {
    let conn = get_connection(db).unwrap();
    conn.query_row(
        "SELECT code FROM verification_codes WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )
    .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (_dir, app, _db) = create_test_app().await;
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_rates_list_and_pagination() {
    let (_dir, app, _db) = create_test_app().await;

    let (status, body) = get(&app, "/api/rates").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["date"], "2026-03-02");
    // 3 feed currencies + synthetic RUB
    assert_eq!(body["total"], 4);
    assert_eq!(body["currencies"].as_array().unwrap().len(), 4);

    let (status, body) = get(&app, "/api/rates?page=1&per_page=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 1);
    assert_eq!(body["total_pages"], 2);
    assert_eq!(body["currencies"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_single_rate() {
    let (_dir, app, _db) = create_test_app().await;

    let (status, body) = get(&app, "/api/rates/usd").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["char_code"], "USD");
    assert_eq!(body["value"], "90.50");
    assert_eq!(body["nominal"], 1);

    let (status, body) = get(&app, "/api/rates/XYZ").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_currency");
}

#[tokio::test]
async fn test_registration_verification_and_conversion_flow() {
    let (_dir, app, db) = create_test_app().await;

    // Register
    let (status, body) = post(
        &app,
        "/api/users",
        json!({"id": 100, "username": "alice", "email": "alice@example.com"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["verification"], "sent");

    // Converting before verification is forbidden
    let (status, body) = post(
        &app,
        "/api/convert",
        json!({"user_id": 100, "from": "USD", "to": "RUB", "amount": "100"}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "email_not_verified");

    // Wrong code burns an attempt
    let (status, body) = post(&app, "/api/users/100/verify", json!({"code": "000000"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "wrong_code");

    // Correct code verifies
    let code = pending_code(&db, 100);
    let (status, body) = post(&app, "/api/users/100/verify", json!({"code": code})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);

    // Conversion now works: 100 USD * 90.50 = 9050, 2% fee = 181
    let (status, body) = post(
        &app,
        "/api/convert",
        json!({"user_id": 100, "from": "USD", "to": "RUB", "amount": "100"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gross"], "9050.0000");
    assert_eq!(body["fee"], "181.0000");
    assert_eq!(body["result"], "8869.0000");

    // And lands in the history
    let (status, body) = get(&app, "/api/users/100/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    let entry = &body["conversions"][0];
    assert_eq!(entry["from"], "USD");
    assert_eq!(entry["to"], "RUB");
    assert_eq!(entry["result"], "8869.0000");
    assert_eq!(body["by_source"][0]["from"], "USD");
    assert_eq!(body["by_source"][0]["count"], 1);
}

#[tokio::test]
async fn test_register_rejects_malformed_email() {
    let (_dir, app, _db) = create_test_app().await;
    let (status, body) = post(
        &app,
        "/api/users",
        json!({"id": 1, "email": "not-an-email"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_email");
}

#[tokio::test]
async fn test_convert_unknown_user_and_currency() {
    let (_dir, app, db) = create_test_app().await;

    let (status, body) = post(
        &app,
        "/api/convert",
        json!({"user_id": 999, "from": "USD", "to": "RUB", "amount": "1"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_user");

    // Verified user, bogus currency
    post(&app, "/api/users", json!({"id": 5, "email": "b@example.com"})).await;
    let code = pending_code(&db, 5);
    post(&app, "/api/users/5/verify", json!({"code": code})).await;

    let (status, body) = post(
        &app,
        "/api/convert",
        json!({"user_id": 5, "from": "USD", "to": "XYZ", "amount": "1"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_currency");
}

#[tokio::test]
async fn test_convert_rejects_non_positive_amount() {
    let (_dir, app, db) = create_test_app().await;

    post(&app, "/api/users", json!({"id": 7, "email": "c@example.com"})).await;
    let code = pending_code(&db, 7);
    post(&app, "/api/users/7/verify", json!({"code": code})).await;

    let (status, body) = post(
        &app,
        "/api/convert",
        json!({"user_id": 7, "from": "USD", "to": "RUB", "amount": "0"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_history_clamps_absurd_page_numbers() {
    let (_dir, app, db) = create_test_app().await;

    post(&app, "/api/users", json!({"id": 8, "email": "d@example.com"})).await;
    let code = pending_code(&db, 8);
    post(&app, "/api/users/8/verify", json!({"code": code})).await;
    post(
        &app,
        "/api/convert",
        json!({"user_id": 8, "from": "USD", "to": "RUB", "amount": "1"}),
    )
    .await;

    let (status, body) = get(&app, "/api/users/8/history?page=9999999999999").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 0);
    assert_eq!(body["conversions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_history_of_unknown_user_is_404() {
    let (_dir, app, _db) = create_test_app().await;
    let (status, body) = get(&app, "/api/users/42/history").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_user");
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (_dir, app, _db) = create_test_app().await;
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("kursobot_"));
}
