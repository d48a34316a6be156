use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::pagination::{Cursor, CursorQuery, Cursored};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    CreateProduct,
    UpdateProduct,
    DeleteProduct,
    CreateOrderBump,
    DeleteOrderBump,
    CreateCoupon,
    UpdateCoupon,
    DeleteCoupon,
    GrantAccess,
    RevokeAccess,
    RefundPayment,
    ApproveRefundRequest,
    RejectRefundRequest,
    CreateWebhookEndpoint,
    UpdateWebhookEndpoint,
    DeleteWebhookEndpoint,
    RetryWebhook,
    CreateOtoOffer,
    DeleteOtoOffer,
    CreateApiKey,
    RevokeApiKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub created_at: i64,
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Cursored for AuditLog {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AuditLogListQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

impl AuditLogListQuery {
    pub fn page(&self) -> CursorQuery {
        CursorQuery {
            cursor: self.cursor.clone(),
            limit: self.limit,
        }
    }
}
