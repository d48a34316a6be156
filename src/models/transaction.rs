use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use utoipa::ToSchema;

use crate::pagination::{Cursor, CursorQuery, Cursored};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Refunded,
    PartiallyRefunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentTransaction {
    pub id: String,
    /// Checkout session this payment completed
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub email: String,
    pub product_id: String,
    pub bump_product_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub vat_cents: i64,
    pub coupon_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub status: TransactionStatus,
    pub refunded_amount_cents: i64,
    pub refunded_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Cursored for PaymentTransaction {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

impl PaymentTransaction {
    /// What can still be refunded.
    pub fn refundable_cents(&self) -> i64 {
        (self.amount_cents - self.refunded_amount_cents).max(0)
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefundPayment {
    /// Amount in cents; defaults to everything not yet refunded
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundResult {
    pub transaction: PaymentTransaction,
    pub refund_id: String,
    pub refunded_cents: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PaymentListQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl PaymentListQuery {
    pub fn page(&self) -> CursorQuery {
        CursorQuery {
            cursor: self.cursor.clone(),
            limit: self.limit,
        }
    }
}
