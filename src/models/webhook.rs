use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use utoipa::ToSchema;

use crate::pagination::{Cursor, CursorQuery, Cursored};
use crate::util::double_option;

/// Events delivered to outgoing webhook endpoints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, ToSchema,
)]
pub enum WebhookEvent {
    #[serde(rename = "purchase.completed")]
    #[strum(serialize = "purchase.completed")]
    PurchaseCompleted,
    #[serde(rename = "refund.issued")]
    #[strum(serialize = "refund.issued")]
    RefundIssued,
    #[serde(rename = "access.granted")]
    #[strum(serialize = "access.granted")]
    AccessGranted,
    #[serde(rename = "access.revoked")]
    #[strum(serialize = "access.revoked")]
    AccessRevoked,
    #[serde(rename = "webhook.test")]
    #[strum(serialize = "webhook.test")]
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEndpoint {
    pub id: String,
    pub url: String,
    pub description: Option<String>,
    pub events: Vec<WebhookEvent>,
    #[serde(skip)]
    pub secret_encrypted: Vec<u8>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Cursored for WebhookEndpoint {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

impl WebhookEndpoint {
    pub fn subscribes_to(&self, event: WebhookEvent) -> bool {
        self.is_active && self.events.contains(&event)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWebhookEndpoint {
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    pub events: Vec<WebhookEvent>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateWebhookEndpoint {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub events: Option<Vec<WebhookEvent>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Returned once on creation; the secret is not retrievable afterwards.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookEndpointCreated {
    #[serde(flatten)]
    pub endpoint: WebhookEndpoint,
    pub secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WebhookLogStatus {
    Success,
    Failed,
    /// A failed delivery that has since been re-sent as a new log row
    Retried,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookLog {
    pub id: String,
    pub endpoint_id: String,
    pub event_type: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub status: WebhookLogStatus,
    pub http_status: Option<i64>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub created_at: i64,
}

impl Cursored for WebhookLog {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookLogListQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub endpoint_id: Option<String>,
    #[serde(default)]
    pub status: Option<WebhookLogStatus>,
}

impl WebhookLogListQuery {
    pub fn page(&self) -> CursorQuery {
        CursorQuery {
            cursor: self.cursor.clone(),
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_event_names() {
        assert_eq!(WebhookEvent::PurchaseCompleted.as_ref(), "purchase.completed");
        assert_eq!(WebhookEvent::from_str("refund.issued").unwrap(), WebhookEvent::RefundIssued);
        let parsed: Vec<WebhookEvent> =
            serde_json::from_str(r#"["access.granted","access.revoked"]"#).unwrap();
        assert_eq!(parsed, vec![WebhookEvent::AccessGranted, WebhookEvent::AccessRevoked]);
    }

    #[test]
    fn test_inactive_endpoint_receives_nothing() {
        let mut endpoint = WebhookEndpoint {
            id: "w1".into(),
            url: "https://hooks.example.com".into(),
            description: None,
            events: vec![WebhookEvent::PurchaseCompleted],
            secret_encrypted: vec![],
            is_active: true,
            created_at: 0,
            updated_at: 0,
        };
        assert!(endpoint.subscribes_to(WebhookEvent::PurchaseCompleted));
        assert!(!endpoint.subscribes_to(WebhookEvent::RefundIssued));
        endpoint.is_active = false;
        assert!(!endpoint.subscribes_to(WebhookEvent::PurchaseCompleted));
    }
}
