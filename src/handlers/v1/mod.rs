mod analytics;
mod api_keys;
mod audit_logs;
mod coupons;
mod oto_offers;
mod payments;
mod products;
mod refund_requests;
mod users;
mod webhooks;

pub use analytics::*;
pub use api_keys::*;
pub use audit_logs::*;
pub use coupons::*;
pub use oto_offers::*;
pub use payments::*;
pub use products::*;
pub use refund_requests::*;
pub use users::*;
pub use webhooks::*;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::db::AppState;
use crate::middleware::{api_auth, rate_limit, rate_limit_api_key};
use crate::openapi::openapi_json;

/// Authenticated management API. Every route needs an API key; the rate
/// limiter runs first so unauthenticated floods are throttled too.
pub fn router(state: AppState) -> Router<AppState> {
    let api = Router::new()
        // Products
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/{id}",
            get(get_product).patch(update_product).delete(delete_product),
        )
        .route("/products/{id}/price-history", get(get_price_history))
        .route(
            "/products/{id}/order-bumps",
            get(list_order_bumps).post(create_order_bump),
        )
        .route("/products/{id}/order-bumps/{bump_id}", delete(delete_order_bump))
        .route("/products/{id}/content", get(get_product_content))
        // Payments and refunds
        .route("/payments", get(list_payments))
        .route("/payments/{id}", get(get_payment))
        .route("/payments/{id}/refund", post(refund_payment))
        .route(
            "/refund-requests",
            get(list_refund_requests).post(create_refund_request),
        )
        .route("/refund-requests/{id}/approve", post(approve_refund_request))
        .route("/refund-requests/{id}/reject", post(reject_refund_request))
        // Coupons
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route(
            "/coupons/{id}",
            get(get_coupon).patch(update_coupon).delete(delete_coupon),
        )
        // Users and access
        .route("/me", get(get_me))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/access", get(list_user_access).post(grant_user_access))
        .route("/users/{id}/access/{product_id}", delete(revoke_user_access))
        // Outgoing webhooks
        .route("/webhooks", get(list_webhooks).post(create_webhook))
        .route(
            "/webhooks/{id}",
            get(get_webhook).patch(update_webhook).delete(delete_webhook),
        )
        .route("/webhooks/{id}/test", post(test_webhook))
        .route("/webhook-logs", get(list_webhook_logs))
        .route("/webhook-logs/{id}/retry", post(retry_webhook_log))
        // One-time offers
        .route("/oto-offers", get(list_oto_offers).post(create_oto_offer))
        .route("/oto-offers/{id}", delete(delete_oto_offer))
        // Analytics
        .route("/analytics/dashboard", get(get_dashboard))
        .route("/analytics/revenue", get(get_revenue))
        // Administration
        .route("/api-keys", get(list_api_keys).post(create_api_key))
        .route("/api-keys/{id}", delete(revoke_api_key))
        .route("/audit-logs", get(list_audit_logs))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_api_key))
        .layer(middleware::from_fn_with_state(state.clone(), api_auth))
        .layer(middleware::from_fn_with_state(state, rate_limit));

    Router::new().nest(
        "/api/v1",
        api.route("/docs/openapi.json", get(openapi_json)),
    )
}
