//! Shared fixtures for integration tests.
//!
//! Every test gets its own SQLite file in a temp directory, a fake payment
//! processor and two API keys: one admin, one regular buyer.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use gateflow::crypto::MasterKey;
use gateflow::db::{self, AppState, DbPool, queries};
use gateflow::dispatch::WebhookDispatcher;
use gateflow::error::Result;
use gateflow::middleware::build_rate_limiter;
use gateflow::models::{ApiScope, Coupon, CreateCoupon, CreateProduct, CreateUser, PaymentTransaction, Product, User};
use gateflow::payments::{CheckoutRequest, PaymentProcessor, ProviderCheckout, ProviderRefund};

pub const STRIPE_SECRET: &str = "whsec_test_secret";

/// Records calls and always succeeds.
#[derive(Default)]
pub struct FakeProcessor {
    pub checkouts: AtomicUsize,
    pub refunds: AtomicUsize,
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_checkout_session(&self, _request: &CheckoutRequest) -> Result<ProviderCheckout> {
        let n = self.checkouts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderCheckout {
            id: format!("cs_test_{}", n),
            url: format!("https://checkout.stripe.test/pay/cs_test_{}", n),
        })
    }

    async fn create_refund(
        &self,
        _payment_intent_id: &str,
        amount_cents: i64,
        _reason: Option<&str>,
    ) -> Result<ProviderRefund> {
        let n = self.refunds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderRefund {
            id: format!("re_test_{}", n),
            amount_cents,
            status: "succeeded".into(),
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    pub processor: Arc<FakeProcessor>,
    pub admin: User,
    pub admin_key: String,
    pub user: User,
    pub user_key: String,
    _dir: TempDir,
}

pub fn test_master_key() -> MasterKey {
    MasterKey::from_bytes([7u8; 32])
}

pub fn create_test_app() -> TestApp {
    create_test_app_with_pool(|path| db::open_pool(path, 4).unwrap())
}

/// Like `create_test_app`, with a pool built by the caller on the given file.
pub fn create_test_app_with_pool(open: impl FnOnce(&Path) -> DbPool) -> TestApp {
    let dir = TempDir::new().unwrap();
    let pool = open(&dir.path().join("gateflow.db"));
    let master_key = test_master_key();
    let processor = Arc::new(FakeProcessor::default());

    let state = AppState {
        db: pool.clone(),
        base_url: "http://localhost:3000".into(),
        audit_log_enabled: true,
        allow_http_webhooks: true,
        dispatcher: WebhookDispatcher::new(pool.clone(), master_key.clone()),
        master_key,
        stripe_webhook_secret: Some(STRIPE_SECRET.into()),
        payments: processor.clone(),
        rate_limiter: build_rate_limiter(10_000),
    };

    let conn = pool.get().unwrap();
    let admin = create_test_user(&conn, "admin@example.com", true);
    let (_, admin_key) = queries::create_api_key(&conn, &admin.id, "admin", &[ApiScope::Full], None).unwrap();
    let user = create_test_user(&conn, "buyer@example.com", false);
    let (_, user_key) = queries::create_api_key(&conn, &user.id, "buyer", &[ApiScope::Full], None).unwrap();
    drop(conn);

    TestApp {
        state,
        processor,
        admin,
        admin_key,
        user,
        user_key,
        _dir: dir,
    }
}

pub fn create_test_user(conn: &rusqlite::Connection, email: &str, is_admin: bool) -> User {
    queries::create_user(
        conn,
        &CreateUser {
            email: email.into(),
            full_name: None,
            is_admin,
        },
    )
    .unwrap()
}

/// Product from a JSON body shaped like `POST /api/v1/products`.
pub fn create_test_product(conn: &rusqlite::Connection, body: Value) -> Product {
    let input: CreateProduct = serde_json::from_value(body).unwrap();
    let slug = input.slug.clone().unwrap_or_else(|| gateflow::util::slugify(&input.name));
    queries::create_product(conn, &input, &slug).unwrap()
}

pub fn create_test_coupon(conn: &rusqlite::Connection, body: Value) -> Coupon {
    let input: CreateCoupon = serde_json::from_value(body).unwrap();
    queries::create_coupon(conn, &input).unwrap()
}

/// A completed payment with a processor charge, as fulfillment would record it.
pub fn create_test_payment(conn: &rusqlite::Connection, user: &User, product: &Product) -> PaymentTransaction {
    let payment_intent = format!("pi_{}", uuid::Uuid::new_v4().simple());
    queries::create_transaction(
        conn,
        &queries::NewTransaction {
            session_id: None,
            user_id: Some(&user.id),
            email: &user.email,
            product_id: &product.id,
            bump_product_id: None,
            amount_cents: product.price_cents,
            currency: &product.currency,
            vat_cents: 0,
            coupon_id: None,
            stripe_payment_intent_id: Some(&payment_intent),
        },
    )
    .unwrap()
}

impl TestApp {
    pub fn router(&self) -> Router {
        gateflow::app(self.state.clone(), &[])
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
        };
        (status, body)
    }

    pub async fn request(&self, method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {}", key));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    pub async fn admin_get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, Some(&self.admin_key), None).await
    }

    pub async fn admin_post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(&self.admin_key), Some(body)).await
    }

    pub async fn admin_patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("PATCH", uri, Some(&self.admin_key), Some(body)).await
    }

    pub async fn public_post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, None, Some(body)).await
    }
}
