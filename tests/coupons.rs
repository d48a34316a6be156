//! Coupon administration.

mod common;
use common::*;

use axum::http::StatusCode;
use gateflow::db::queries;
use serde_json::json;

#[tokio::test]
async fn test_create_coupon_normalizes_code() {
    let app = create_test_app();
    let (status, body) = app
        .admin_post(
            "/api/v1/coupons",
            json!({"code": " spring-10 ", "discount_type": "percentage", "discount_value": 10}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["code"], "SPRING-10");
    assert_eq!(body["current_usage_count"], 0);
}

#[tokio::test]
async fn test_fixed_coupon_needs_currency() {
    let app = create_test_app();
    let (status, body) = app
        .admin_post(
            "/api/v1/coupons",
            json!({"code": "FLAT5", "discount_type": "fixed", "discount_value": 500}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["currency"].is_string());
}

#[tokio::test]
async fn test_percentage_over_100_rejected() {
    let app = create_test_app();
    let (status, _) = app
        .admin_post(
            "/api/v1/coupons",
            json!({"code": "TOOMUCH", "discount_type": "percentage", "discount_value": 150}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_patch_cannot_reset_usage_count() {
    let app = create_test_app();
    let coupon = {
        let conn = app.state.db.get().unwrap();
        let product = create_test_product(&conn, json!({"name": "Course", "price_cents": 1000}));
        let coupon = create_test_coupon(
            &conn,
            json!({"code": "ONCE", "discount_type": "percentage", "discount_value": 20, "usage_limit_global": 1}),
        );
        let payment = create_test_payment(&conn, &app.user, &product);
        assert!(queries::redeem_coupon(&conn, &coupon.id, &app.user.email, &payment.id).unwrap());
        coupon
    };

    let (status, body) = app
        .admin_patch(
            &format!("/api/v1/coupons/{}", coupon.id),
            json!({"current_usage_count": 0, "name": "One shot"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "One shot");
    assert_eq!(body["current_usage_count"], 1);

    let conn = app.state.db.get().unwrap();
    let stored = queries::get_coupon_by_id(&conn, &coupon.id).unwrap().unwrap();
    assert_eq!(stored.current_usage_count, 1);
}

#[tokio::test]
async fn test_exhausted_coupon_fails_verification() {
    let app = create_test_app();
    let product = {
        let conn = app.state.db.get().unwrap();
        let product = create_test_product(&conn, json!({"name": "Course", "price_cents": 1000}));
        let coupon = create_test_coupon(
            &conn,
            json!({"code": "ONCE", "discount_type": "percentage", "discount_value": 20, "usage_limit_global": 1}),
        );
        let payment = create_test_payment(&conn, &app.user, &product);
        queries::redeem_coupon(&conn, &coupon.id, &app.user.email, &payment.id).unwrap();
        // The limit holds even under a second redemption attempt
        assert!(!queries::redeem_coupon(&conn, &coupon.id, "other@example.com", &payment.id).unwrap());
        product
    };

    let (_, body) = app
        .public_post("/api/public/coupons/verify", json!({"code": "ONCE", "product_id": product.id}))
        .await;
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_coupon_changes_are_audited() {
    let app = create_test_app();
    let (_, created) = app
        .admin_post(
            "/api/v1/coupons",
            json!({"code": "AUDITME", "discount_type": "percentage", "discount_value": 5}),
        )
        .await;
    let id = created["id"].as_str().unwrap();
    app.admin_patch(&format!("/api/v1/coupons/{}", id), json!({"is_active": false}))
        .await;

    let (status, logs) = app.admin_get("/api/v1/audit-logs?resource_type=coupon").await;
    assert_eq!(status, StatusCode::OK);
    let entries = logs["data"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["resource_id"] == id));
}
