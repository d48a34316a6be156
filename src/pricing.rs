//! Checkout price computation.
//!
//! Everything here is pure integer arithmetic on cents so the same inputs
//! always produce the same breakdown. VAT rates are the only floats.

use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{DiscountType, PricePoint, Product};

/// Seconds in the Omnibus lookback window.
pub const OMNIBUS_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

/// Largest amount accepted for any price, bump or fixed discount.
pub const MAX_AMOUNT_CENTS: i64 = 99_999_999;

/// Smallest amount the payment processor will charge, per currency.
pub fn minimum_charge_cents(currency: &str) -> i64 {
    match currency.to_ascii_uppercase().as_str() {
        "USD" | "EUR" | "GBP" | "CHF" => 50,
        "PLN" => 200,
        _ => 50,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discount {
    pub discount_type: DiscountType,
    pub value: i64,
}

#[derive(Debug, Clone)]
pub struct PriceInput {
    /// Product price before bump and coupon (sale price already applied)
    pub base_cents: i64,
    pub bump_cents: Option<i64>,
    pub discount: Option<Discount>,
    pub currency: String,
    pub vat_rate: Option<f64>,
    pub price_includes_vat: bool,
}

impl PriceInput {
    pub fn for_product(product: &Product, now: i64) -> Self {
        Self {
            base_cents: product.effective_price_at(now),
            bump_cents: None,
            discount: None,
            currency: product.currency.clone(),
            vat_rate: product.vat_rate,
            price_includes_vat: product.price_includes_vat,
        }
    }

    pub fn with_bump(mut self, bump_cents: i64) -> Self {
        self.bump_cents = Some(bump_cents);
        self
    }

    pub fn with_discount(mut self, discount_type: DiscountType, value: i64) -> Self {
        self.discount = Some(Discount {
            discount_type,
            value,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PriceBreakdown {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    /// VAT contained in (or added to) the total
    pub vat_cents: i64,
    /// Amount the buyer is charged
    pub total_cents: i64,
    pub currency: String,
    /// Whether the minimum-charge floor raised the total
    pub floor_applied: bool,
}

impl PriceBreakdown {
    pub fn is_free(&self) -> bool {
        self.subtotal_cents == 0
    }
}

/// `numerator / denominator` rounded half-up, for non-negative inputs.
fn div_round(numerator: i64, denominator: i64) -> i64 {
    let (n, d) = (i128::from(numerator), i128::from(denominator));
    i64::try_from((n * 2 + d) / (d * 2)).unwrap_or(i64::MAX)
}

fn vat_round(amount: f64) -> i64 {
    amount.round() as i64
}

pub fn discount_cents(subtotal: i64, discount: Discount) -> i64 {
    let raw = match discount.discount_type {
        DiscountType::Percentage => div_round(subtotal.saturating_mul(discount.value.clamp(0, 100)), 100),
        DiscountType::Fixed => discount.value.max(0),
    };
    raw.min(subtotal)
}

pub fn compute_price(input: &PriceInput) -> PriceBreakdown {
    let subtotal = input.base_cents.max(0).saturating_add(input.bump_cents.unwrap_or(0).max(0));
    let discount = input
        .discount
        .map(|d| discount_cents(subtotal, d))
        .unwrap_or(0);

    let mut total = subtotal - discount;
    let mut floor_applied = false;
    if subtotal > 0 {
        let floor = minimum_charge_cents(&input.currency);
        if total < floor {
            total = floor;
            floor_applied = true;
        }
    }

    let rate = input.vat_rate.filter(|r| *r > 0.0).unwrap_or(0.0);
    let vat = if rate == 0.0 || total == 0 {
        0
    } else if input.price_includes_vat {
        vat_round(total as f64 * rate / (100.0 + rate))
    } else {
        let vat = vat_round(total as f64 * rate / 100.0);
        total = total.saturating_add(vat);
        vat
    };

    PriceBreakdown {
        subtotal_cents: subtotal,
        discount_cents: discount,
        vat_cents: vat,
        total_cents: total,
        currency: input.currency.to_ascii_uppercase(),
        floor_applied,
    }
}

/// Lowest price during the 30 days before the running reduction started, for
/// the Omnibus "lowest price in the last 30 days" notice.
///
/// `history` must be sorted by `effective_from`. The running reduction is the
/// trailing run of points with a sale price; everything before it is the
/// reference period. Returns `None` when no sale is running or when the
/// product has no price history from before the sale.
pub fn omnibus_lowest_price(history: &[PricePoint], now: i64) -> Option<i64> {
    let current = history.iter().rposition(|p| p.effective_from <= now)?;
    let history = &history[..=current];
    let sale_start = history
        .iter()
        .rposition(|p| p.sale_price_cents.is_none())
        .map_or(0, |i| i + 1);
    if sale_start == history.len() {
        return None;
    }

    let reduced_at = history[sale_start].effective_from;
    let window_start = reduced_at - OMNIBUS_WINDOW_SECS;
    let before = &history[..sale_start];
    before
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let superseded_at = before.get(i + 1).map_or(reduced_at, |next| next.effective_from);
            superseded_at > window_start
        })
        .map(|(_, point)| point.sale_price_cents.unwrap_or(point.price_cents))
        .min()
}
