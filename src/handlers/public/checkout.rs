use axum::{extract::State, http::HeaderMap};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::models::{CheckoutResponse, CreateCheckout};
use crate::services::checkout;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Start a checkout. Repeating the request with the same `Idempotency-Key`
/// returns the stored session instead of opening a new one.
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateCheckout>,
) -> Result<Json<CheckoutResponse>> {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    let session = checkout::create_checkout(&state, &input, key).await?;
    Ok(Json(CheckoutResponse::from(&session)))
}
