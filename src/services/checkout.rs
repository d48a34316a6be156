//! Checkout session creation and free-product claims.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use rusqlite::Connection;
use uuid::Uuid;

use super::{access, now};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{
    Availability, CheckoutSession, CheckoutStatus, Coupon, CouponContext, CreateCheckout, OrderBump,
    Product, UserAccess, normalize_coupon_code,
};
use crate::payments::CheckoutRequest;
use crate::pricing::{PriceBreakdown, PriceInput, compute_price};
use crate::validation::is_valid_email_syntax;

/// A fully resolved price for one buyer, before any session exists.
#[derive(Debug, Clone)]
pub struct Quote {
    pub product: Product,
    pub bump: Option<(OrderBump, Product)>,
    pub coupon: Option<Coupon>,
    pub breakdown: PriceBreakdown,
}

pub fn ensure_available(product: &Product, now: i64) -> Result<()> {
    let message = match product.availability_at(now) {
        Availability::Available => return Ok(()),
        Availability::Inactive => "Product is not available for purchase",
        Availability::NotYetAvailable => "Product is not available yet",
        Availability::NoLongerAvailable => "Product is no longer available",
    };
    Err(AppError::rule(StatusCode::BAD_REQUEST, "PRODUCT_UNAVAILABLE", message))
}

pub fn ensure_not_owned(conn: &Connection, email: &str, product_id: &str, now: i64) -> Result<()> {
    if queries::has_active_access_by_email(conn, email, product_id, now)? {
        return Err(AppError::rule(
            StatusCode::CONFLICT,
            "ALREADY_HAS_ACCESS",
            "You already have access to this product",
        ));
    }
    Ok(())
}

/// Look up a coupon and check it against this purchase.
pub fn resolve_coupon(
    conn: &Connection,
    code: &str,
    product: &Product,
    email: Option<&str>,
    now: i64,
) -> Result<Coupon> {
    let coupon = queries::get_coupon_by_code(conn, code)?
        .ok_or_else(|| AppError::validation("coupon_code", "Coupon not found"))?;
    let uses_by_email = match email {
        Some(email) => queries::count_coupon_redemptions_by_email(conn, &coupon.id, email)?,
        None => 0,
    };
    coupon
        .check(&CouponContext {
            product_id: &product.id,
            currency: &product.currency,
            email,
            uses_by_email,
            now,
        })
        .map_err(|reason| AppError::validation("coupon_code", reason.message()))?;
    Ok(coupon)
}

/// Validate a checkout request and price it.
pub fn quote(conn: &Connection, input: &CreateCheckout, now: i64) -> Result<Quote> {
    let email = input.email.trim();
    if !is_valid_email_syntax(email) {
        return Err(AppError::validation("email", "Invalid email address"));
    }

    let product = queries::get_product_by_id(conn, &input.product_id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    ensure_available(&product, now)?;
    ensure_not_owned(conn, email, &product.id, now)?;

    let bump = match input.bump_product_id.as_deref() {
        Some(bump_product_id) => {
            let bump = queries::get_active_order_bump(conn, &product.id, bump_product_id)?
                .ok_or_else(|| {
                    AppError::validation("bump_product_id", "Order bump is not offered for this product")
                })?;
            let bump_product = queries::get_product_by_id(conn, &bump.bump_product_id)?
                .ok_or_else(|| AppError::validation("bump_product_id", "Order bump product not found"))?;
            if bump_product.availability_at(now) != Availability::Available {
                return Err(AppError::validation(
                    "bump_product_id",
                    "Order bump product is not available",
                ));
            }
            if !bump_product.currency.eq_ignore_ascii_case(&product.currency) {
                return Err(AppError::validation(
                    "bump_product_id",
                    "Order bump currency does not match the product",
                ));
            }
            Some((bump, bump_product))
        }
        None => None,
    };

    let coupon = match input.coupon_code.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(code) => Some(resolve_coupon(conn, code, &product, Some(email), now)?),
        None => None,
    };

    let mut price = PriceInput::for_product(&product, now);
    if let Some((bump, bump_product)) = &bump {
        price = price.with_bump(
            bump.bump_price_cents
                .unwrap_or_else(|| bump_product.effective_price_at(now)),
        );
    }
    if let Some(coupon) = &coupon {
        price = price.with_discount(coupon.discount_type, coupon.discount_value);
    }
    let breakdown = compute_price(&price);

    Ok(Quote {
        product,
        bump,
        coupon,
        breakdown,
    })
}

fn same_request(session: &CheckoutSession, input: &CreateCheckout) -> bool {
    session.product_id == input.product_id
        && session.email.eq_ignore_ascii_case(input.email.trim())
        && session.bump_product_id == input.bump_product_id
        && session.coupon_code
            == input
                .coupon_code
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .map(normalize_coupon_code)
}

/// Replay of a stored session for a repeated idempotency key.
fn replay(existing: CheckoutSession, input: &CreateCheckout) -> Result<CheckoutSession> {
    if !same_request(&existing, input) {
        return Err(AppError::rule(
            StatusCode::CONFLICT,
            "IDEMPOTENCY_KEY_REUSED",
            "Idempotency key was already used for a different checkout",
        ));
    }
    if existing.checkout_url.is_none() && existing.status == CheckoutStatus::Pending {
        return Err(AppError::Conflict(
            "Checkout for this idempotency key is still being created".into(),
        ));
    }
    tracing::info!("Checkout replayed for idempotency key: session={}", existing.id);
    Ok(existing)
}

/// Create a processor checkout session, or return the stored one when the
/// idempotency key was seen before.
pub async fn create_checkout(
    state: &AppState,
    input: &CreateCheckout,
    idempotency_key: Option<&str>,
) -> Result<CheckoutSession> {
    let key = match idempotency_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(k) if k.len() > 255 => {
            return Err(AppError::BadRequest("Idempotency-Key is too long".into()));
        }
        Some(k) => k.to_string(),
        None => Uuid::new_v4().to_string(),
    };
    let now = now();

    let (session, quote) = {
        let conn = state.db.get()?;
        if let Some(existing) = queries::get_checkout_session_by_key(&conn, &key)? {
            return replay(existing, input);
        }

        let quote = quote(&conn, input, now)?;
        if quote.breakdown.is_free() {
            return Err(AppError::rule(
                StatusCode::BAD_REQUEST,
                "FREE_PRODUCT",
                "Free products are claimed without checkout",
            ));
        }

        let email = input.email.trim().to_lowercase();
        let session = CheckoutSession {
            id: Uuid::new_v4().to_string(),
            idempotency_key: key.clone(),
            product_id: quote.product.id.clone(),
            user_id: queries::get_user_by_email(&conn, &email)?.map(|u| u.id),
            email,
            bump_product_id: quote.bump.as_ref().map(|(b, _)| b.bump_product_id.clone()),
            coupon_code: quote.coupon.as_ref().map(|c| c.code.clone()),
            subtotal_cents: quote.breakdown.subtotal_cents,
            discount_cents: quote.breakdown.discount_cents,
            total_cents: quote.breakdown.total_cents,
            vat_cents: quote.breakdown.vat_cents,
            currency: quote.breakdown.currency.clone(),
            provider_session_id: None,
            checkout_url: None,
            status: CheckoutStatus::Pending,
            created_at: now,
        };

        if !queries::insert_checkout_session(&conn, &session)? {
            // Lost a race with a concurrent request using the same key
            let existing = queries::get_checkout_session_by_key(&conn, &key)?
                .ok_or_else(|| AppError::Internal("Checkout session vanished".into()))?;
            return replay(existing, input);
        }
        (session, quote)
    };

    let mut line_item_name = quote.product.name.clone();
    if let Some((_, bump_product)) = &quote.bump {
        line_item_name.push_str(" + ");
        line_item_name.push_str(&bump_product.name);
    }
    let mut metadata = BTreeMap::new();
    metadata.insert("gateflow_session_id".to_string(), session.id.clone());
    metadata.insert("product_id".to_string(), session.product_id.clone());

    let request = CheckoutRequest {
        line_item_name,
        amount_cents: session.total_cents,
        currency: session.currency.clone(),
        customer_email: session.email.clone(),
        success_url: format!(
            "{}/checkout/success?session_id={}",
            state.base_url.trim_end_matches('/'),
            session.id
        ),
        cancel_url: format!(
            "{}/p/{}",
            state.base_url.trim_end_matches('/'),
            quote.product.slug
        ),
        metadata,
    };

    let provider = match state.payments.create_checkout_session(&request).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Processor checkout failed for session {}: {}", session.id, e);
            let conn = state.db.get()?;
            queries::delete_checkout_session(&conn, &session.id)?;
            return Err(e);
        }
    };

    {
        let conn = state.db.get()?;
        queries::set_checkout_session_provider(&conn, &session.id, &provider.id, &provider.url)?;
    }

    tracing::info!(
        "Checkout created: session={}, product={}, total={} {}",
        session.id,
        session.product_id,
        session.total_cents,
        session.currency
    );

    Ok(CheckoutSession {
        provider_session_id: Some(provider.id),
        checkout_url: Some(provider.url),
        ..session
    })
}

/// Grant a zero-price product without going through the processor.
pub fn claim_free_product(conn: &Connection, slug: &str, email: &str) -> Result<(Product, UserAccess)> {
    let email = email.trim();
    if !is_valid_email_syntax(email) {
        return Err(AppError::validation("email", "Invalid email address"));
    }
    let now = now();
    let product = queries::get_product_by_slug(conn, slug)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    ensure_available(&product, now)?;
    if product.effective_price_at(now) != 0 {
        return Err(AppError::rule(
            StatusCode::BAD_REQUEST,
            "NOT_FREE",
            "This product must be purchased",
        ));
    }
    ensure_not_owned(conn, email, &product.id, now)?;

    let user = queries::find_or_create_user_by_email(conn, email)?;
    let granted = access::grant_access(
        conn,
        &user.id,
        &product.id,
        product.auto_grant_duration_days,
        None,
        now,
    )?;
    Ok((product, granted))
}
