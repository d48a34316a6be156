//! Incoming Stripe events: signature checks, fulfillment and idempotency.

mod common;
use common::*;

use axum::{body::Body, http::Request, http::StatusCode};
use serde_json::{Value, json};

use gateflow::db::queries;
use gateflow::models::{CheckoutSession, CheckoutStatus, PaymentListQuery, Product};
use gateflow::payments::sign_stripe_payload;

async fn post_event(app: &TestApp, payload: &Value, signature: Option<String>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    app.send(builder.body(Body::from(payload.to_string())).unwrap()).await
}

fn sign(payload: &Value) -> String {
    let now = chrono::Utc::now().timestamp();
    sign_stripe_payload(STRIPE_SECRET, now, payload.to_string().as_bytes()).unwrap()
}

/// A pending local checkout session, as `POST /api/public/checkout` leaves it.
fn pending_session(app: &TestApp, product: &Product, email: &str) -> CheckoutSession {
    let session = new_session(product, email);
    insert_session(app, &session);
    session
}

fn insert_session(app: &TestApp, session: &CheckoutSession) {
    let conn = app.state.db.get().unwrap();
    assert!(queries::insert_checkout_session(&conn, session).unwrap());
}

fn new_session(product: &Product, email: &str) -> CheckoutSession {
    CheckoutSession {
        id: uuid::Uuid::new_v4().to_string(),
        idempotency_key: uuid::Uuid::new_v4().to_string(),
        product_id: product.id.clone(),
        email: email.into(),
        user_id: None,
        bump_product_id: None,
        coupon_code: None,
        subtotal_cents: product.price_cents,
        discount_cents: 0,
        total_cents: product.price_cents,
        vat_cents: 0,
        currency: product.currency.clone(),
        provider_session_id: Some("cs_test_1".into()),
        checkout_url: Some("https://checkout.stripe.test/pay/cs_test_1".into()),
        status: CheckoutStatus::Pending,
        created_at: chrono::Utc::now().timestamp(),
    }
}

fn completed_event(event_id: &str, session: &CheckoutSession) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_test_1",
            "payment_status": "paid",
            "customer_details": {"email": session.email},
            "payment_intent": "pi_test_paid",
            "amount_total": session.total_cents,
            "currency": session.currency.to_lowercase(),
            "metadata": {"gateflow_session_id": session.id, "product_id": session.product_id}
        }}
    })
}

fn payment_count(app: &TestApp) -> usize {
    let conn = app.state.db.get().unwrap();
    queries::list_transactions(
        &conn,
        &PaymentListQuery {
            cursor: None,
            limit: Some(100),
            status: None,
            product_id: None,
            email: None,
        },
    )
    .unwrap()
    .len()
}

#[tokio::test]
async fn test_missing_signature_rejected() {
    let app = create_test_app();
    let (status, _) = post_event(&app, &json!({"id": "evt_1", "type": "ping", "data": {"object": {}}}), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wrong_signature_rejected() {
    let app = create_test_app();
    let payload = json!({"id": "evt_1", "type": "ping", "data": {"object": {}}});
    let forged = sign_stripe_payload("whsec_other", chrono::Utc::now().timestamp(), payload.to_string().as_bytes())
        .unwrap();
    let (status, _) = post_event(&app, &payload, Some(forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stale_signature_rejected() {
    let app = create_test_app();
    let payload = json!({"id": "evt_1", "type": "ping", "data": {"object": {}}});
    let old = chrono::Utc::now().timestamp() - 3600;
    let signature = sign_stripe_payload(STRIPE_SECRET, old, payload.to_string().as_bytes()).unwrap();
    let (status, _) = post_event(&app, &payload, Some(signature)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unhandled_event_acknowledged() {
    let app = create_test_app();
    let payload = json!({"id": "evt_1", "type": "customer.created", "data": {"object": {}}});
    let (status, body) = post_event(&app, &payload, Some(sign(&payload))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn test_checkout_completed_grants_access_once() {
    let app = create_test_app();
    let product = {
        let conn = app.state.db.get().unwrap();
        create_test_product(&conn, json!({"name": "Course", "price_cents": 4900}))
    };
    let session = pending_session(&app, &product, "fresh@example.com");
    let payload = completed_event("evt_paid", &session);

    let (status, body) = post_event(&app, &payload, Some(sign(&payload))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");

    {
        let conn = app.state.db.get().unwrap();
        let user = queries::get_user_by_email(&conn, "fresh@example.com").unwrap().unwrap();
        assert!(queries::get_access(&conn, &user.id, &product.id).unwrap().is_some());
        let stored = queries::get_checkout_session_by_id(&conn, &session.id).unwrap().unwrap();
        assert_eq!(stored.status, CheckoutStatus::Completed);
    }
    assert_eq!(payment_count(&app), 1);

    // Stripe redelivers the same event
    let (status, body) = post_event(&app, &payload, Some(sign(&payload))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(payment_count(&app), 1);
}

#[tokio::test]
async fn test_second_event_for_same_session_not_fulfilled_twice() {
    let app = create_test_app();
    let product = {
        let conn = app.state.db.get().unwrap();
        create_test_product(&conn, json!({"name": "Course", "price_cents": 4900}))
    };
    let session = pending_session(&app, &product, "fresh@example.com");

    let first = completed_event("evt_a", &session);
    post_event(&app, &first, Some(sign(&first))).await;
    let second = completed_event("evt_b", &session);
    let (status, body) = post_event(&app, &second, Some(sign(&second))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(payment_count(&app), 1);
}

#[tokio::test]
async fn test_dashboard_refund_reconciled() {
    let app = create_test_app();
    let product = {
        let conn = app.state.db.get().unwrap();
        create_test_product(&conn, json!({"name": "Course", "price_cents": 4900}))
    };
    let session = pending_session(&app, &product, "fresh@example.com");
    let paid = completed_event("evt_paid", &session);
    post_event(&app, &paid, Some(sign(&paid))).await;

    let refunded = json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": {"object": {
            "id": "ch_1",
            "payment_intent": "pi_test_paid",
            "amount": 4900,
            "amount_refunded": 4900,
            "refunded": true
        }}
    });
    let (status, body) = post_event(&app, &refunded, Some(sign(&refunded))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");

    let conn = app.state.db.get().unwrap();
    let payment = queries::get_transaction_by_payment_intent(&conn, "pi_test_paid").unwrap().unwrap();
    assert_eq!(payment.refunded_amount_cents, 4900);
    let user = queries::get_user_by_email(&conn, "fresh@example.com").unwrap().unwrap();
    assert!(queries::get_access(&conn, &user.id, &product.id).unwrap().is_none());
}

#[tokio::test]
async fn test_purchase_unlocks_one_time_offer() {
    let app = create_test_app();
    let (status, _) = app.request("GET", "/api/public/oto/unknown", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (session, upsell) = purchase_with_offer(&app).await;
    let (status, offer) = app
        .request("GET", &format!("/api/public/oto/{}", session.id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offer["product_id"], upsell.id.as_str());
    assert_eq!(offer["discount_value"], 30);
    let remaining = offer["seconds_remaining"].as_i64().unwrap();
    assert!(remaining > 0 && remaining <= 600);

    // The issued coupon only works for the buyer on the offered product
    let conn = app.state.db.get().unwrap();
    let code = offer["coupon_code"].as_str().unwrap();
    let coupon = queries::get_coupon_by_code(&conn, code).unwrap().unwrap();
    assert_eq!(coupon.usage_limit_global, Some(1));
    assert_eq!(coupon.allowed_emails, vec!["upsell@example.com".to_string()]);
    assert_eq!(coupon.allowed_product_ids, vec![upsell.id.clone()]);
}

#[tokio::test]
async fn test_fulfillment_grants_bump_and_redeems_coupon() {
    let app = create_test_app();
    let (product, bump, coupon) = {
        let conn = app.state.db.get().unwrap();
        (
            create_test_product(&conn, json!({"name": "Course", "price_cents": 4900})),
            create_test_product(&conn, json!({"name": "Templates", "price_cents": 1500})),
            create_test_coupon(&conn, json!({"code": "SAVE10", "discount_type": "percentage", "discount_value": 10})),
        )
    };
    let mut session = new_session(&product, "bundle@example.com");
    session.bump_product_id = Some(bump.id.clone());
    session.coupon_code = Some("SAVE10".into());
    session.subtotal_cents = 6400;
    session.discount_cents = 640;
    session.total_cents = 5760;
    insert_session(&app, &session);

    let payload = completed_event("evt_bundle", &session);
    let (status, body) = post_event(&app, &payload, Some(sign(&payload))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");

    let conn = app.state.db.get().unwrap();
    let user = queries::get_user_by_email(&conn, "bundle@example.com").unwrap().unwrap();
    assert!(queries::get_access(&conn, &user.id, &product.id).unwrap().is_some());
    assert!(queries::get_access(&conn, &user.id, &bump.id).unwrap().is_some());

    let coupon = queries::get_coupon_by_id(&conn, &coupon.id).unwrap().unwrap();
    assert_eq!(coupon.current_usage_count, 1);
    assert_eq!(
        queries::count_coupon_redemptions_by_email(&conn, &coupon.id, "bundle@example.com").unwrap(),
        1
    );

    let payment = queries::get_transaction_by_payment_intent(&conn, "pi_test_paid").unwrap().unwrap();
    assert_eq!(payment.bump_product_id.as_deref(), Some(bump.id.as_str()));
    assert_eq!(payment.coupon_id.as_deref(), Some(coupon.id.as_str()));
    assert_eq!(payment.amount_cents, 5760);
}

/// Completes a checkout for a product with a 10 minute offer attached.
async fn purchase_with_offer(app: &TestApp) -> (CheckoutSession, Product) {
    let (product, upsell) = {
        let conn = app.state.db.get().unwrap();
        (
            create_test_product(&conn, json!({"name": "Course", "price_cents": 4900})),
            create_test_product(&conn, json!({"name": "Workbook", "price_cents": 2000})),
        )
    };
    let (status, _) = app
        .admin_post(
            "/api/v1/oto-offers",
            json!({
                "source_product_id": product.id,
                "oto_product_id": upsell.id,
                "discount_type": "percentage",
                "discount_value": 30,
                "duration_minutes": 10
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let session = pending_session(app, &product, "upsell@example.com");
    let payload = completed_event("evt_offer", &session);
    let (status, _) = post_event(app, &payload, Some(sign(&payload))).await;
    assert_eq!(status, StatusCode::OK);
    (session, upsell)
}

#[tokio::test]
async fn test_expired_offer_is_gone() {
    let app = create_test_app();
    let (session, _) = purchase_with_offer(&app).await;
    {
        let conn = app.state.db.get().unwrap();
        conn.execute(
            "UPDATE oto_grants SET expires_at = ?1 WHERE session_id = ?2",
            rusqlite::params![chrono::Utc::now().timestamp() - 1, session.id],
        )
        .unwrap();
    }

    let (status, body) = app
        .request("GET", &format!("/api/public/oto/{}", session.id), None, None)
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"]["code"], "GONE");
}

#[tokio::test]
async fn test_used_offer_is_gone() {
    let app = create_test_app();
    let (session, _) = purchase_with_offer(&app).await;
    {
        let conn = app.state.db.get().unwrap();
        conn.execute(
            "UPDATE coupons SET current_usage_count = 1
             WHERE id = (SELECT coupon_id FROM oto_grants WHERE session_id = ?1)",
            rusqlite::params![session.id],
        )
        .unwrap();
    }

    let (status, _) = app
        .request("GET", &format!("/api/public/oto/{}", session.id), None, None)
        .await;
    assert_eq!(status, StatusCode::GONE);
}
