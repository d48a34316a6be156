//! Outgoing webhook delivery.
//!
//! Each delivery POSTs `{event, timestamp, data}` signed with the endpoint's
//! secret and records exactly one `webhook_logs` row per attempt.

use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{Value, json};
use sha2::Sha256;

use crate::crypto::{MasterKey, WEBHOOK_SECRET_PURPOSE};
use crate::db::{DbPool, queries};
use crate::error::{AppError, Result};
use crate::models::{WebhookEndpoint, WebhookEvent, WebhookLog, WebhookLogStatus};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-GateFlow-Signature";
pub const EVENT_HEADER: &str = "X-GateFlow-Event";
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_BODY_CHARS: usize = 1000;

/// Hex HMAC-SHA256 of the exact request body.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn build_payload(event: WebhookEvent, data: Value) -> Value {
    json!({
        "event": event.as_ref(),
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "data": data,
    })
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_RESPONSE_BODY_CHARS).collect()
}

/// Result of one HTTP attempt, before it is logged.
struct Attempt {
    status: WebhookLogStatus,
    http_status: Option<i64>,
    response_body: Option<String>,
    error_message: Option<String>,
    duration_ms: i64,
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    db: DbPool,
    master_key: MasterKey,
    client: Client,
}

impl WebhookDispatcher {
    pub fn new(db: DbPool, master_key: MasterKey) -> Self {
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            db,
            master_key,
            client,
        }
    }

    /// Deliver `event` to every active endpoint subscribed to it.
    pub async fn trigger(&self, event: WebhookEvent, data: Value) -> Result<Vec<WebhookLog>> {
        let endpoints = {
            let conn = self.db.get()?;
            queries::list_endpoints_for_event(&conn, event)?
        };
        if endpoints.is_empty() {
            return Ok(Vec::new());
        }

        let payload = build_payload(event, data);
        let mut logs = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            match self.deliver(endpoint, event.as_ref(), &payload).await {
                Ok(log) => logs.push(log),
                Err(e) => tracing::error!(
                    "Failed to record webhook delivery to {}: {}",
                    endpoint.id,
                    e
                ),
            }
        }
        Ok(logs)
    }

    /// Fire-and-forget variant used where the caller must answer quickly.
    pub fn trigger_in_background(&self, event: WebhookEvent, data: Value) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.trigger(event, data).await {
                tracing::error!("Webhook dispatch for {} failed: {}", event.as_ref(), e);
            }
        });
    }

    /// Send one payload to one endpoint and log the outcome.
    pub async fn deliver(
        &self,
        endpoint: &WebhookEndpoint,
        event_type: &str,
        payload: &Value,
    ) -> Result<WebhookLog> {
        let secret = self
            .master_key
            .decrypt_string(WEBHOOK_SECRET_PURPOSE, &endpoint.secret_encrypted)?;
        let body = serde_json::to_vec(payload)?;
        let attempt = self.send(&endpoint.url, event_type, &secret, body).await;

        match attempt.status {
            WebhookLogStatus::Success => tracing::info!(
                "Webhook {} delivered to {} ({:?})",
                event_type,
                endpoint.id,
                attempt.http_status
            ),
            _ => tracing::warn!(
                "Webhook {} to {} failed: status={:?} error={:?}",
                event_type,
                endpoint.id,
                attempt.http_status,
                attempt.error_message
            ),
        }

        let conn = self.db.get()?;
        queries::create_webhook_log(
            &conn,
            queries::NewWebhookLog {
                endpoint_id: &endpoint.id,
                event_type,
                payload,
                status: attempt.status,
                http_status: attempt.http_status,
                response_body: attempt.response_body,
                error_message: attempt.error_message,
                duration_ms: attempt.duration_ms,
            },
        )
    }

    async fn send(&self, url: &str, event_type: &str, secret: &str, body: Vec<u8>) -> Attempt {
        let signature = match sign_payload(secret, &body) {
            Ok(s) => s,
            Err(e) => {
                return Attempt {
                    status: WebhookLogStatus::Failed,
                    http_status: None,
                    response_body: None,
                    error_message: Some(e.to_string()),
                    duration_ms: 0,
                };
            }
        };

        let started = Instant::now();
        let result = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, event_type)
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                Attempt {
                    status: if status.is_success() {
                        WebhookLogStatus::Success
                    } else {
                        WebhookLogStatus::Failed
                    },
                    http_status: Some(status.as_u16() as i64),
                    response_body: Some(truncate(&text)),
                    error_message: (!status.is_success()).then(|| format!("HTTP {}", status.as_u16())),
                    duration_ms: started.elapsed().as_millis() as i64,
                }
            }
            Err(e) => Attempt {
                status: WebhookLogStatus::Failed,
                http_status: None,
                response_body: None,
                error_message: Some(if e.is_timeout() {
                    format!("Timed out after {}s", DELIVERY_TIMEOUT.as_secs())
                } else {
                    e.to_string()
                }),
                duration_ms: started.elapsed().as_millis() as i64,
            },
        }
    }

    /// Re-send a failed delivery. The old row becomes `retried` and the new
    /// attempt gets its own row, which is returned.
    pub async fn retry(&self, log_id: &str) -> Result<WebhookLog> {
        let (log, endpoint) = {
            let conn = self.db.get()?;
            let log = queries::get_webhook_log_by_id(&conn, log_id)?
                .ok_or_else(|| AppError::NotFound("Webhook log not found".into()))?;
            if log.status != WebhookLogStatus::Failed {
                return Err(AppError::Conflict("Only failed deliveries can be retried".into()));
            }
            let endpoint = queries::get_webhook_endpoint_by_id(&conn, &log.endpoint_id)?
                .ok_or_else(|| AppError::NotFound("Webhook endpoint not found".into()))?;
            if !queries::try_mark_webhook_log_retried(&conn, log_id)? {
                return Err(AppError::Conflict("Delivery is already being retried".into()));
            }
            (log, endpoint)
        };

        match self.deliver(&endpoint, &log.event_type, &log.payload).await {
            Ok(new_log) => Ok(new_log),
            Err(e) => {
                let conn = self.db.get()?;
                queries::unmark_webhook_log_retried(&conn, log_id)?;
                Err(e)
            }
        }
    }

    /// Send a `webhook.test` event to one endpoint, regardless of its subscriptions.
    pub async fn send_test(&self, endpoint: &WebhookEndpoint) -> Result<WebhookLog> {
        let payload = build_payload(
            WebhookEvent::Test,
            json!({
                "endpoint_id": endpoint.id,
                "message": "Test event from GateFlow",
            }),
        );
        self.deliver(endpoint, WebhookEvent::Test.as_ref(), &payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_hex_hmac_of_body() {
        let sig = sign_payload("whsec_abc", br#"{"event":"webhook.test"}"#).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(sig, sign_payload("whsec_other", br#"{"event":"webhook.test"}"#).unwrap());
    }

    #[test]
    fn test_payload_shape() {
        let payload = build_payload(WebhookEvent::RefundIssued, json!({"amount_cents": 500}));
        assert_eq!(payload["event"], "refund.issued");
        assert_eq!(payload["data"]["amount_cents"], 500);
        let ts = payload["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_response_body_truncated() {
        let long = "x".repeat(5000);
        assert_eq!(truncate(&long).len(), MAX_RESPONSE_BODY_CHARS);
    }
}
