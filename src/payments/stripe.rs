use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;

use super::{CheckoutRequest, PaymentProcessor, ProviderCheckout, ProviderRefund};
use crate::crypto::constant_time_eq;
use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a signed Stripe event, in seconds.
pub const STRIPE_SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct StripeCheckoutResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefundResponse {
    id: String,
    amount: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.to_string(),
        }
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", STRIPE_API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(body);
            tracing::warn!("Stripe API returned {}: {}", status, message);
            return Err(AppError::PaymentProvider(format!("Stripe API error: {}", message)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Failed to parse Stripe response: {}", e)))
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<ProviderCheckout> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("customer_email".into(), request.customer_email.clone()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                request.amount_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                request.line_item_name.clone(),
            ),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
            // Copied onto the payment intent so refunds made in the dashboard can be traced
            form.push((format!("payment_intent_data[metadata][{}]", key), value.clone()));
        }

        let session: StripeCheckoutResponse = self.post_form("/checkout/sessions", &form).await?;
        let url = session
            .url
            .ok_or_else(|| AppError::PaymentProvider("Stripe returned no checkout URL".into()))?;

        Ok(ProviderCheckout { id: session.id, url })
    }

    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount_cents: i64,
        reason: Option<&str>,
    ) -> Result<ProviderRefund> {
        let mut form: Vec<(String, String)> = vec![
            ("payment_intent".into(), payment_intent_id.to_string()),
            ("amount".into(), amount_cents.to_string()),
            ("reason".into(), "requested_by_customer".into()),
        ];
        if let Some(reason) = reason {
            form.push(("metadata[reason]".into(), reason.chars().take(500).collect()));
        }

        let refund: StripeRefundResponse = self.post_form("/refunds", &form).await?;
        Ok(ProviderRefund {
            id: refund.id,
            amount_cents: refund.amount,
            status: refund.status,
        })
    }
}

fn compute_signature(secret: &str, timestamp: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a `stripe-signature` header value for `payload`.
pub fn sign_stripe_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let ts = timestamp.to_string();
    Ok(format!("t={},v1={}", ts, compute_signature(secret, &ts, payload)?))
}

/// Verify a `stripe-signature` header (`t=...,v1=...[,v1=...]`).
///
/// Returns `Err` when the header is malformed, `Ok(false)` when no `v1`
/// signature matches or the timestamp is outside the tolerance window.
pub fn verify_stripe_signature(secret: &str, payload: &[u8], header: &str, now: i64) -> Result<bool> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| AppError::BadRequest("Missing timestamp in signature".into()))?;
    if signatures.is_empty() {
        return Err(AppError::BadRequest("Missing v1 signature".into()));
    }
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid signature timestamp".into()))?;

    if (now - ts).abs() > STRIPE_SIGNATURE_TOLERANCE_SECS {
        tracing::warn!("Stripe signature timestamp outside tolerance: {}", ts);
        return Ok(false);
    }

    let expected = compute_signature(secret, timestamp, payload)?;
    Ok(signatures
        .iter()
        .any(|sig| constant_time_eq(sig.as_bytes(), expected.as_bytes())))
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub payment_status: String,
    pub customer_email: Option<String>,
    pub customer_details: Option<StripeCustomerDetails>,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: StripeSessionMetadata,
}

impl StripeCheckoutSession {
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeSessionMetadata {
    pub gateflow_session_id: Option<String>,
    pub product_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    pub payment_intent: Option<String>,
    pub amount: i64,
    pub amount_refunded: i64,
    #[serde(default)]
    pub refunded: bool,
}
