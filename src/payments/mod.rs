mod stripe;

pub use stripe::*;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// What the processor needs to open a hosted checkout page.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub line_item_name: String,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Echoed back on the completion event
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCheckout {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRefund {
    pub id: String,
    pub amount_cents: i64,
    pub status: String,
}

/// Outbound calls to the payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<ProviderCheckout>;

    /// Refund `amount_cents` of a captured payment.
    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount_cents: i64,
        reason: Option<&str>,
    ) -> Result<ProviderRefund>;
}

/// Stand-in used when no processor credentials are configured. Every call fails.
pub struct UnconfiguredProcessor;

#[async_trait]
impl PaymentProcessor for UnconfiguredProcessor {
    async fn create_checkout_session(&self, _request: &CheckoutRequest) -> Result<ProviderCheckout> {
        Err(AppError::PaymentProvider(
            "Payment processor is not configured".into(),
        ))
    }

    async fn create_refund(
        &self,
        _payment_intent_id: &str,
        _amount_cents: i64,
        _reason: Option<&str>,
    ) -> Result<ProviderRefund> {
        Err(AppError::PaymentProvider(
            "Payment processor is not configured".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_processor_fails_every_call() {
        let processor = UnconfiguredProcessor;
        let request = CheckoutRequest {
            line_item_name: "Course".into(),
            amount_cents: 1000,
            currency: "USD".into(),
            customer_email: "jan@example.com".into(),
            success_url: "https://shop.example.com/ok".into(),
            cancel_url: "https://shop.example.com/p/course".into(),
            metadata: BTreeMap::new(),
        };

        let err = tokio_test::block_on(processor.create_checkout_session(&request)).unwrap_err();
        assert_eq!(err.code(), "PAYMENT_PROVIDER_ERROR");
        let err = tokio_test::block_on(processor.create_refund("pi_1", 100, None)).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
    }
}
