//! Product administration, access grants and content delivery.

mod common;
use common::*;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_slug_generated_and_deduplicated() {
    let app = create_test_app();
    let (status, first) = app
        .admin_post("/api/v1/products", json!({"name": "Zażółć Course!", "price_cents": 1000}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let slug = first["slug"].as_str().unwrap().to_string();
    assert!(!slug.is_empty());

    let (_, second) = app
        .admin_post("/api/v1/products", json!({"name": "Zażółć Course!", "price_cents": 1000}))
        .await;
    assert_eq!(second["slug"], format!("{}-2", slug));
}

#[tokio::test]
async fn test_invalid_product_rejected_with_field_errors() {
    let app = create_test_app();
    let (status, body) = app
        .admin_post(
            "/api/v1/products",
            json!({"name": "", "price_cents": -5, "currency": "DOLLARS"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let details = &body["error"]["details"];
    assert!(details["name"].is_string());
    assert!(details["price_cents"].is_string());
    assert!(details["currency"].is_string());
}

#[tokio::test]
async fn test_amounts_above_maximum_rejected() {
    let app = create_test_app();
    let (status, body) = app
        .admin_post("/api/v1/products", json!({"name": "Huge", "price_cents": 4611686018427387904i64}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["price_cents"].is_string());

    let (main, extra) = {
        let conn = app.state.db.get().unwrap();
        (
            create_test_product(&conn, json!({"name": "Main", "price_cents": 1000})),
            create_test_product(&conn, json!({"name": "Extra", "price_cents": 500})),
        )
    };
    let (status, body) = app
        .admin_patch(&format!("/api/v1/products/{}", main.id), json!({"price_cents": 100_000_000}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["price_cents"].is_string());

    let (status, body) = app
        .admin_post(
            &format!("/api/v1/products/{}/order-bumps", main.id),
            json!({"bump_product_id": extra.id, "title": "Add extra", "bump_price_cents": i64::MAX}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["bump_price_cents"].is_string());

    let (status, body) = app
        .admin_post(
            "/api/v1/coupons",
            json!({"code": "BIG", "discount_type": "fixed", "discount_value": i64::MAX, "currency": "USD"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["discount_value"].is_string());
}

#[tokio::test]
async fn test_patch_records_price_history() {
    let app = create_test_app();
    let (_, product) = app
        .admin_post("/api/v1/products", json!({"name": "Course", "price_cents": 1000}))
        .await;
    let id = product["id"].as_str().unwrap();

    let (status, updated) = app
        .admin_patch(&format!("/api/v1/products/{}", id), json!({"price_cents": 1500}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["price_cents"], 1500);

    let (status, history) = app.admin_get(&format!("/api/v1/products/{}/price-history", id)).await;
    assert_eq!(status, StatusCode::OK);
    let prices: Vec<i64> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["price_cents"].as_i64().unwrap())
        .collect();
    assert!(prices.contains(&1500));
    assert!(prices.contains(&1000));
}

#[tokio::test]
async fn test_sold_product_cannot_be_deleted() {
    let app = create_test_app();
    let product = {
        let conn = app.state.db.get().unwrap();
        let product = create_test_product(&conn, json!({"name": "Course", "price_cents": 1000}));
        create_test_payment(&conn, &app.user, &product);
        product
    };
    let (status, body) = app
        .request("DELETE", &format!("/api/v1/products/{}", product.id), Some(&app.admin_key), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "PRODUCT_HAS_TRANSACTIONS");
}

#[tokio::test]
async fn test_product_list_is_paginated() {
    let app = create_test_app();
    {
        let conn = app.state.db.get().unwrap();
        for i in 0..3 {
            create_test_product(&conn, json!({"name": format!("P{}", i), "price_cents": 1000}));
        }
    }
    let (_, page) = app.admin_get("/api/v1/products?limit=2").await;
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    let cursor = page["pagination"]["next_cursor"].as_str().unwrap();

    let (_, rest) = app.admin_get(&format!("/api/v1/products?limit=2&cursor={}", cursor)).await;
    assert_eq!(rest["data"].as_array().unwrap().len(), 1);
    assert!(rest["pagination"]["next_cursor"].is_null());
}

#[tokio::test]
async fn test_order_bump_must_share_currency() {
    let app = create_test_app();
    let (main, eur) = {
        let conn = app.state.db.get().unwrap();
        (
            create_test_product(&conn, json!({"name": "Main", "price_cents": 1000})),
            create_test_product(&conn, json!({"name": "Euro", "price_cents": 500, "currency": "EUR"})),
        )
    };
    let (status, _) = app
        .admin_post(
            &format!("/api/v1/products/{}/order-bumps", main.id),
            json!({"bump_product_id": eur.id, "title": "Add the euro thing"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_grant_and_revoke_access() {
    let app = create_test_app();
    let product = {
        let conn = app.state.db.get().unwrap();
        create_test_product(&conn, json!({"name": "Course", "price_cents": 1000}))
    };
    let access_uri = format!("/api/v1/users/{}/access", app.user.id);

    let (status, granted) = app
        .admin_post(&access_uri, json!({"product_id": product.id, "duration_days": 30}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(granted["access_expires_at"].is_i64());

    let (_, list) = app.request("GET", &access_uri, Some(&app.user_key), None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let revoke_uri = format!("{}/{}", access_uri, product.id);
    let (status, _) = app.request("DELETE", &revoke_uri, Some(&app.admin_key), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.request("DELETE", &revoke_uri, Some(&app.admin_key), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_link_follows_access() {
    let app = create_test_app();
    let product = {
        let conn = app.state.db.get().unwrap();
        create_test_product(
            &conn,
            json!({
                "name": "Ebook",
                "price_cents": 1000,
                "content": {"type": "download", "url": "https://files.example.com/ebook.pdf"}
            }),
        )
    };
    let content_uri = format!("/api/v1/products/{}/content", product.id);

    let (status, _) = app.request("GET", &content_uri, Some(&app.user_key), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.admin_post(
        &format!("/api/v1/users/{}/access", app.user.id),
        json!({"product_id": product.id}),
    )
    .await;

    let (status, content) = app.request("GET", &content_uri, Some(&app.user_key), None).await;
    assert_eq!(status, StatusCode::OK);
    let link = content["download_url"].as_str().unwrap();
    assert!(!link.contains("files.example.com"));
    let path = link.trim_start_matches("http://localhost:3000");

    let response = {
        use tower::ServiceExt;
        app.router()
            .oneshot(
                axum::http::Request::builder()
                    .uri(path)
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    };
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "https://files.example.com/ebook.pdf"
    );

    app.request(
        "DELETE",
        &format!("/api/v1/users/{}/access/{}", app.user.id, product.id),
        Some(&app.admin_key),
        None,
    )
    .await;
    let (status, _) = app.request("GET", path, None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_dashboard_totals_per_currency() {
    let app = create_test_app();
    {
        let conn = app.state.db.get().unwrap();
        let usd = create_test_product(&conn, json!({"name": "Usd", "price_cents": 1000}));
        let eur = create_test_product(&conn, json!({"name": "Eur", "price_cents": 2000, "currency": "EUR"}));
        create_test_payment(&conn, &app.user, &usd);
        create_test_payment(&conn, &app.user, &eur);
    }
    let (status, stats) = app.admin_get("/api/v1/analytics/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    let totals = stats["totals"].as_array().unwrap();
    assert_eq!(totals.len(), 2);
    let eur = totals.iter().find(|t| t["currency"] == "EUR").unwrap();
    assert_eq!(eur["revenue_cents"], 2000);
    assert_eq!(eur["orders"], 1);
    assert_eq!(stats["total_users"], 2);
}

#[tokio::test]
async fn test_revenue_range_validated() {
    let app = create_test_app();
    let (status, _) = app.admin_get("/api/v1/analytics/revenue?from=2000&to=1000").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.admin_get("/api/v1/analytics/revenue").await;
    assert_eq!(status, StatusCode::OK);
}
