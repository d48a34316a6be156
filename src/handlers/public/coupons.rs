use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{VerifyCouponRequest, VerifyCouponResponse};
use crate::services::checkout::resolve_coupon;

/// Check a coupon for a product. An unusable coupon is a normal answer
/// (`valid: false` plus a reason), not an error.
pub async fn verify_coupon(
    State(state): State<AppState>,
    Json(input): Json<VerifyCouponRequest>,
) -> Result<Json<VerifyCouponResponse>> {
    let conn = state.db.get()?;
    let now = chrono::Utc::now().timestamp();

    let product = queries::get_product_by_id(&conn, &input.product_id)?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let email = input.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
    let response = match resolve_coupon(&conn, &input.code, &product, email, now) {
        Ok(coupon) => VerifyCouponResponse {
            valid: true,
            code: Some(coupon.code),
            discount_type: Some(coupon.discount_type),
            discount_value: Some(coupon.discount_value),
            reason: None,
        },
        Err(AppError::Validation(errors)) => VerifyCouponResponse {
            valid: false,
            code: None,
            discount_type: None,
            discount_value: None,
            reason: errors.get("coupon_code").map(String::from),
        },
        Err(e) => return Err(e),
    };

    Ok(Json(response))
}
