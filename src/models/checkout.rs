use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CheckoutStatus {
    Pending,
    Completed,
}

/// A checkout attempt. The idempotency key maps one request to one row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(skip_serializing)]
    pub idempotency_key: String,
    pub product_id: String,
    pub email: String,
    pub user_id: Option<String>,
    pub bump_product_id: Option<String>,
    pub coupon_code: Option<String>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub vat_cents: i64,
    pub currency: String,
    pub provider_session_id: Option<String>,
    pub checkout_url: Option<String>,
    pub status: CheckoutStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateCheckout {
    pub product_id: String,
    pub email: String,
    #[serde(default)]
    pub bump_product_id: Option<String>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub vat_cents: i64,
    pub total_cents: i64,
    pub currency: String,
}

impl From<&CheckoutSession> for CheckoutResponse {
    fn from(s: &CheckoutSession) -> Self {
        Self {
            session_id: s.id.clone(),
            checkout_url: s.checkout_url.clone().unwrap_or_default(),
            subtotal_cents: s.subtotal_cents,
            discount_cents: s.discount_cents,
            vat_cents: s.vat_cents,
            total_cents: s.total_cents,
            currency: s.currency.clone(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClaimFreeProduct {
    pub email: String,
}
