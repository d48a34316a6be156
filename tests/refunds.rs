//! Admin refunds and buyer refund requests.

mod common;
use common::*;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use gateflow::db::{self, AppState, DbPool, queries};
use gateflow::error::Result;
use gateflow::models::TransactionStatus;
use gateflow::payments::{CheckoutRequest, PaymentProcessor, ProviderCheckout, ProviderRefund, StripeCharge};
use gateflow::services::{access, fulfillment};
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::json;

/// Delivers Stripe's `charge.refunded` event before the refund call returns.
struct EventFirstProcessor {
    state: Mutex<Option<AppState>>,
    charge_cents: i64,
    refunded: AtomicI64,
}

#[async_trait]
impl PaymentProcessor for EventFirstProcessor {
    async fn create_checkout_session(&self, _request: &CheckoutRequest) -> Result<ProviderCheckout> {
        unreachable!("checkout is not used here")
    }

    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount_cents: i64,
        _reason: Option<&str>,
    ) -> Result<ProviderRefund> {
        let total = self.refunded.fetch_add(amount_cents, Ordering::SeqCst) + amount_cents;
        let state = self.state.lock().unwrap().clone().unwrap();
        let charge = StripeCharge {
            id: "ch_test_1".into(),
            payment_intent: Some(payment_intent_id.into()),
            amount: self.charge_cents,
            amount_refunded: total,
            refunded: total >= self.charge_cents,
        };
        fulfillment::handle_charge_refunded(&state, &charge)?;
        Ok(ProviderRefund {
            id: format!("re_early_{}", total),
            amount_cents,
            status: "succeeded".into(),
        })
    }
}

/// Accepts the refund and then takes every free pool connection with it.
struct PoolDrainingProcessor {
    pool: DbPool,
    held: Mutex<Vec<r2d2::PooledConnection<SqliteConnectionManager>>>,
}

#[async_trait]
impl PaymentProcessor for PoolDrainingProcessor {
    async fn create_checkout_session(&self, _request: &CheckoutRequest) -> Result<ProviderCheckout> {
        unreachable!("checkout is not used here")
    }

    async fn create_refund(
        &self,
        _payment_intent_id: &str,
        amount_cents: i64,
        _reason: Option<&str>,
    ) -> Result<ProviderRefund> {
        let mut held = self.held.lock().unwrap();
        while let Some(conn) = self.pool.try_get() {
            held.push(conn);
        }
        Ok(ProviderRefund {
            id: "re_drained".into(),
            amount_cents,
            status: "succeeded".into(),
        })
    }
}

fn paid_product(app: &TestApp, refundable: bool) -> (String, String) {
    let conn = app.state.db.get().unwrap();
    let product = create_test_product(
        &conn,
        json!({
            "name": "Course",
            "price_cents": 1000,
            "is_refundable": refundable,
            "refund_period_days": if refundable { Some(14) } else { None }
        }),
    );
    let payment = create_test_payment(&conn, &app.user, &product);
    access::grant_access(&conn, &app.user.id, &product.id, None, Some(&payment.id), chrono::Utc::now().timestamp())
        .unwrap();
    (product.id, payment.id)
}

#[tokio::test]
async fn test_partial_then_full_refund() {
    let app = create_test_app();
    let (product_id, payment_id) = paid_product(&app, false);
    let uri = format!("/api/v1/payments/{}/refund", payment_id);

    let (status, body) = app.admin_post(&uri, json!({"amount_cents": 300})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refunded_cents"], 300);
    assert_eq!(body["transaction"]["status"], "partially_refunded");
    {
        let conn = app.state.db.get().unwrap();
        assert!(queries::get_access(&conn, &app.user.id, &product_id).unwrap().is_some());
    }

    // No amount refunds whatever remains
    let (status, body) = app.admin_post(&uri, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refunded_cents"], 700);
    assert_eq!(body["transaction"]["status"], "refunded");
    assert_eq!(body["transaction"]["refunded_amount_cents"], 1000);

    let conn = app.state.db.get().unwrap();
    assert!(queries::get_access(&conn, &app.user.id, &product_id).unwrap().is_none());
}

#[tokio::test]
async fn test_refund_over_remaining_rejected() {
    let app = create_test_app();
    let (_, payment_id) = paid_product(&app, false);
    let uri = format!("/api/v1/payments/{}/refund", payment_id);

    app.admin_post(&uri, json!({"amount_cents": 600})).await;
    let (status, body) = app.admin_post(&uri, json!({"amount_cents": 500})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["amount_cents"].is_string());

    let (status, _) = app.admin_post(&uri, json!({"amount_cents": 0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.processor.refunds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fully_refunded_payment_cannot_be_refunded_again() {
    let app = create_test_app();
    let (_, payment_id) = paid_product(&app, false);
    let uri = format!("/api/v1/payments/{}/refund", payment_id);

    app.admin_post(&uri, json!({})).await;
    let (status, body) = app.admin_post(&uri, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ALREADY_REFUNDED");
}

#[tokio::test]
async fn test_buyer_cannot_refund_directly() {
    let app = create_test_app();
    let (_, payment_id) = paid_product(&app, true);
    let (status, _) = app
        .request(
            "POST",
            &format!("/api/v1/payments/{}/refund", payment_id),
            Some(&app.user_key),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_refund_request_approval_flow() {
    let app = create_test_app();
    let (_, payment_id) = paid_product(&app, true);

    let (status, request) = app
        .request(
            "POST",
            "/api/v1/refund-requests",
            Some(&app.user_key),
            Some(json!({"transaction_id": payment_id, "reason": "Not what I expected"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "pending");

    // One pending request per payment
    let (status, body) = app
        .request(
            "POST",
            "/api/v1/refund-requests",
            Some(&app.user_key),
            Some(json!({"transaction_id": payment_id})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "REFUND_REQUEST_PENDING");

    let id = request["id"].as_str().unwrap();
    let (status, outcome) = app
        .admin_post(
            &format!("/api/v1/refund-requests/{}/approve", id),
            json!({"admin_response": "Sorry to see you go"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["request"]["status"], "approved");

    let (status, _) = app
        .admin_post(&format!("/api/v1/refund-requests/{}/reject", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let conn = app.state.db.get().unwrap();
    let payment = queries::get_transaction_by_id(&conn, &payment_id).unwrap().unwrap();
    assert_eq!(payment.refunded_amount_cents, 1000);
}

#[tokio::test]
async fn test_refund_request_after_period_rejected() {
    let app = create_test_app();
    let (_, payment_id) = paid_product(&app, true);
    {
        let conn = app.state.db.get().unwrap();
        let fifteen_days_ago = chrono::Utc::now().timestamp() - 15 * 86_400;
        conn.execute(
            "UPDATE payment_transactions SET created_at = ?1 WHERE id = ?2",
            rusqlite::params![fifteen_days_ago, payment_id],
        )
        .unwrap();
    }

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/refund-requests",
            Some(&app.user_key),
            Some(json!({"transaction_id": payment_id})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "REFUND_PERIOD_EXPIRED");
}

#[tokio::test]
async fn test_non_refundable_product_request_rejected() {
    let app = create_test_app();
    let (_, payment_id) = paid_product(&app, false);
    let (status, body) = app
        .request(
            "POST",
            "/api/v1/refund-requests",
            Some(&app.user_key),
            Some(json!({"transaction_id": payment_id})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NOT_REFUNDABLE");
}

#[tokio::test]
async fn test_buyer_sees_only_own_requests() {
    let app = create_test_app();
    let (_, payment_id) = paid_product(&app, true);
    app.request(
        "POST",
        "/api/v1/refund-requests",
        Some(&app.user_key),
        Some(json!({"transaction_id": payment_id})),
    )
    .await;

    let other_key = {
        let conn = app.state.db.get().unwrap();
        let other = create_test_user(&conn, "other@example.com", false);
        queries::create_api_key(&conn, &other.id, "other", &[gateflow::models::ApiScope::Full], None)
            .unwrap()
            .1
    };

    let (_, mine) = app.request("GET", "/api/v1/refund-requests", Some(&app.user_key), None).await;
    assert_eq!(mine["data"].as_array().unwrap().len(), 1);
    let (_, theirs) = app.request("GET", "/api/v1/refund-requests", Some(&other_key), None).await;
    assert_eq!(theirs["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_refund_reported_by_stripe_first_is_counted_once() {
    let mut app = create_test_app();
    let (product_id, payment_id) = paid_product(&app, false);
    let processor = Arc::new(EventFirstProcessor {
        state: Mutex::new(None),
        charge_cents: 1000,
        refunded: AtomicI64::new(0),
    });
    app.state.payments = processor.clone();
    *processor.state.lock().unwrap() = Some(app.state.clone());
    let uri = format!("/api/v1/payments/{}/refund", payment_id);

    let (status, body) = app.admin_post(&uri, json!({"amount_cents": 400})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("warnings").is_none());
    {
        let conn = app.state.db.get().unwrap();
        let payment = queries::get_transaction_by_id(&conn, &payment_id).unwrap().unwrap();
        assert_eq!(payment.refunded_amount_cents, 400);
        assert_eq!(payment.status, TransactionStatus::PartiallyRefunded);
    }

    let (status, _) = app.admin_post(&uri, json!({"amount_cents": 600})).await;
    assert_eq!(status, StatusCode::OK);
    let conn = app.state.db.get().unwrap();
    let payment = queries::get_transaction_by_id(&conn, &payment_id).unwrap().unwrap();
    assert_eq!(payment.refunded_amount_cents, 1000);
    assert_eq!(payment.status, TransactionStatus::Refunded);
    assert!(queries::get_access(&conn, &app.user.id, &product_id).unwrap().is_none());
}

#[tokio::test]
async fn test_approved_refund_survives_database_outage() {
    let mut app = create_test_app_with_pool(|path| {
        let pool = r2d2::Pool::builder()
            .max_size(2)
            .connection_timeout(Duration::from_millis(200))
            .build(SqliteConnectionManager::file(path))
            .unwrap();
        db::init_db(&pool.get().unwrap()).unwrap();
        pool
    });
    let (_, payment_id) = paid_product(&app, true);
    let (_, request) = app
        .request(
            "POST",
            "/api/v1/refund-requests",
            Some(&app.user_key),
            Some(json!({"transaction_id": payment_id})),
        )
        .await;
    let id = request["id"].as_str().unwrap();

    app.state.payments = Arc::new(PoolDrainingProcessor {
        pool: app.state.db.clone(),
        held: Mutex::new(Vec::new()),
    });
    let (status, outcome) = app
        .admin_post(&format!("/api/v1/refund-requests/{}/approve", id), json!({"admin_response": "ok"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["request"]["status"], "approved");
    assert_eq!(outcome["request"]["admin_response"], "ok");
    assert!(!outcome["warnings"].as_array().unwrap().is_empty());
}
