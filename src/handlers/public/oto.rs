use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::models::OtoOfferView;

/// The one-time offer unlocked by a completed checkout, with its countdown.
pub async fn get_oto_offer(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<OtoOfferView>> {
    let conn = state.db.get()?;
    let now = chrono::Utc::now().timestamp();

    let grant = queries::get_oto_grant_by_session(&conn, &session_id)?
        .ok_or_else(|| AppError::NotFound("No offer for this checkout".into()))?;
    if grant.expires_at <= now {
        return Err(AppError::Gone("This offer has expired".into()));
    }

    let offer = queries::get_oto_offer_by_id(&conn, &grant.offer_id)?
        .filter(|o| o.is_active)
        .ok_or_else(|| AppError::NotFound("Offer not found".into()))?;
    let coupon = queries::get_coupon_by_id(&conn, &grant.coupon_id)?
        .ok_or_else(|| AppError::NotFound("Offer not found".into()))?;
    if coupon.current_usage_count > 0 {
        return Err(AppError::Gone("This offer was already used".into()));
    }
    let product = queries::get_product_by_id(&conn, &offer.oto_product_id)?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::NotFound("Offer not found".into()))?;

    Ok(Json(OtoOfferView {
        offer_id: offer.id,
        price_cents: product.effective_price_at(now),
        product_id: product.id,
        product_name: product.name,
        product_slug: product.slug,
        currency: product.currency,
        discount_type: offer.discount_type,
        discount_value: offer.discount_value,
        coupon_code: coupon.code,
        expires_at: grant.expires_at,
        seconds_remaining: grant.expires_at - now,
    }))
}
