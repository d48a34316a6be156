mod checkout;
mod coupons;
mod downloads;
mod email;
mod oto;
mod products;

pub use checkout::*;
pub use coupons::*;
pub use downloads::*;
pub use email::*;
pub use oto::*;
pub use products::*;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::middleware::rate_limit;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Storefront endpoints. No authentication; rate limited per client IP.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/public/products/{slug}", get(get_public_product))
        .route("/api/public/products/{slug}/claim-free", post(claim_free))
        .route("/api/public/checkout", post(create_checkout))
        .route("/api/public/coupons/verify", post(verify_coupon))
        .route("/api/public/validate-email", post(validate_email))
        .route("/api/public/oto/{session_id}", get(get_oto_offer))
        .route("/api/public/downloads/{token}", get(download))
        .layer(middleware::from_fn_with_state(state, rate_limit))
        .route("/health", get(health))
}
