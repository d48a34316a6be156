use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::DiscountType;
use super::coupon::validate_discount;
use crate::error::{FieldErrors, Result};

/// A one-time offer shown after buying `source_product_id`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OtoOffer {
    pub id: String,
    pub source_product_id: String,
    pub oto_product_id: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub duration_minutes: i64,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOtoOffer {
    pub source_product_id: String,
    pub oto_product_id: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    #[serde(default = "default_duration")]
    pub duration_minutes: i64,
}

fn default_duration() -> i64 {
    15
}

impl CreateOtoOffer {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();
        if self.source_product_id == self.oto_product_id {
            errors.add("oto_product_id", "Offer must point at a different product");
        }
        validate_discount(&mut errors, self.discount_type, self.discount_value);
        if !(1..=10_080).contains(&self.duration_minutes) {
            errors.add("duration_minutes", "Duration must be between 1 minute and 7 days");
        }
        errors.into_result()
    }
}

/// The coupon issued to one buyer for one offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtoGrant {
    pub id: String,
    pub offer_id: String,
    pub session_id: String,
    pub email: String,
    pub coupon_id: String,
    pub expires_at: i64,
    pub created_at: i64,
}

/// Public view of a pending offer, shown on the thank-you page.
#[derive(Debug, Serialize, ToSchema)]
pub struct OtoOfferView {
    pub offer_id: String,
    pub product_id: String,
    pub product_name: String,
    pub product_slug: String,
    pub price_cents: i64,
    pub currency: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub coupon_code: String,
    pub expires_at: i64,
    pub seconds_remaining: i64,
}
