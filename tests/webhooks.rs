//! Webhook endpoint management and delivery.

mod common;
use common::*;

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use axum::{Router, body::Bytes, extract::State, http::HeaderMap, http::StatusCode, routing::post};
use serde_json::json;

use gateflow::crypto::WEBHOOK_SECRET_PURPOSE;
use gateflow::db::queries;
use gateflow::dispatch::{SIGNATURE_HEADER, sign_payload};
use gateflow::models::{CreateWebhookEndpoint, WebhookEndpoint, WebhookEvent};

const RECEIVER_SECRET: &str = "whsec_receiver";

#[derive(Clone, Default)]
struct Receiver {
    hits: Arc<AtomicUsize>,
    /// (signature header, body) of every request
    seen: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

/// Fails the first delivery, accepts the rest.
async fn receive(State(rx): State<Receiver>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    rx.seen.lock().unwrap().push((signature, body.to_vec()));
    if rx.hits.fetch_add(1, Ordering::SeqCst) == 0 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn spawn_receiver() -> (String, Receiver) {
    let rx = Receiver::default();
    let app = Router::new().route("/hook", post(receive)).with_state(rx.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hook", addr), rx)
}

/// Loopback URLs are refused by the API, so the endpoint is stored directly.
fn insert_endpoint(app: &TestApp, url: &str) -> WebhookEndpoint {
    let conn = app.state.db.get().unwrap();
    let encrypted = app
        .state
        .master_key
        .encrypt_string(WEBHOOK_SECRET_PURPOSE, RECEIVER_SECRET)
        .unwrap();
    queries::create_webhook_endpoint(
        &conn,
        &CreateWebhookEndpoint {
            url: url.into(),
            description: None,
            events: vec![WebhookEvent::PurchaseCompleted],
            is_active: true,
        },
        &encrypted,
    )
    .unwrap()
}

#[tokio::test]
async fn test_private_address_rejected() {
    let app = create_test_app();
    for url in [
        "http://127.0.0.1/hook",
        "http://169.254.169.254/latest/meta-data",
        "http://10.0.0.5/hook",
        "http://localhost:8080/hook",
        "https://db.internal/hook",
    ] {
        let (status, body) = app
            .admin_post(
                "/api/v1/webhooks",
                json!({"url": url, "events": ["purchase.completed"]}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", url);
        assert!(body["error"]["details"]["url"].is_string(), "{}", url);
    }
}

#[tokio::test]
async fn test_create_returns_secret_once() {
    let app = create_test_app();
    let (status, created) = app
        .admin_post(
            "/api/v1/webhooks",
            json!({"url": "https://hooks.example.com/gateflow", "events": ["purchase.completed", "refund.issued"]}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let secret = created["secret"].as_str().unwrap();
    assert!(secret.starts_with("whsec_"));

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = app.admin_get(&format!("/api/v1/webhooks/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fetched.get("secret").is_none());
    assert!(!fetched.to_string().contains(secret));
}

#[tokio::test]
async fn test_empty_event_list_rejected() {
    let app = create_test_app();
    let (status, _) = app
        .admin_post(
            "/api/v1/webhooks",
            json!({"url": "https://hooks.example.com/gateflow", "events": []}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delivery_is_signed_with_endpoint_secret() {
    let app = create_test_app();
    let (url, rx) = spawn_receiver().await;
    let endpoint = insert_endpoint(&app, &url);

    let (status, log) = app
        .admin_post(&format!("/api/v1/webhooks/{}/test", endpoint.id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log["event_type"], "webhook.test");

    let seen = rx.seen.lock().unwrap();
    let (signature, body) = &seen[0];
    assert_eq!(signature, &sign_payload(RECEIVER_SECRET, body).unwrap());
}

#[tokio::test]
async fn test_retry_marks_old_log_retried() {
    let app = create_test_app();
    let (url, rx) = spawn_receiver().await;
    let endpoint = insert_endpoint(&app, &url);

    let (_, first) = app
        .admin_post(&format!("/api/v1/webhooks/{}/test", endpoint.id), json!({}))
        .await;
    assert_eq!(first["status"], "failed");
    assert_eq!(first["http_status"], 500);
    let first_id = first["id"].as_str().unwrap().to_string();

    let (status, retried) = app
        .admin_post(&format!("/api/v1/webhook-logs/{}/retry", first_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retried["status"], "success");
    assert_ne!(retried["id"], first["id"]);
    assert_eq!(rx.hits.load(Ordering::SeqCst), 2);

    let conn = app.state.db.get().unwrap();
    let old = queries::get_webhook_log_by_id(&conn, &first_id).unwrap().unwrap();
    assert_eq!(old.status.as_ref(), "retried");
    drop(conn);

    // A retried row cannot be retried again
    let (status, _) = app
        .admin_post(&format!("/api/v1/webhook-logs/{}/retry", first_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_successful_log_cannot_be_retried() {
    let app = create_test_app();
    let (url, _rx) = spawn_receiver().await;
    let endpoint = insert_endpoint(&app, &url);

    app.admin_post(&format!("/api/v1/webhooks/{}/test", endpoint.id), json!({}))
        .await;
    let (_, second) = app
        .admin_post(&format!("/api/v1/webhooks/{}/test", endpoint.id), json!({}))
        .await;
    assert_eq!(second["status"], "success");

    let (status, _) = app
        .admin_post(&format!("/api/v1/webhook-logs/{}/retry", second["id"].as_str().unwrap()), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
