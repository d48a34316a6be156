use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use utoipa::ToSchema;

use crate::pagination::{Cursor, CursorQuery, Cursored};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RefundRequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundRequest {
    pub id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub reason: Option<String>,
    pub status: RefundRequestStatus,
    pub admin_response: Option<String>,
    pub processed_by: Option<String>,
    pub processed_at: Option<i64>,
    pub created_at: i64,
}

impl Cursored for RefundRequest {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRefundRequest {
    pub transaction_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProcessRefundRequest {
    #[serde(default)]
    pub admin_response: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundRequestOutcome {
    pub request: RefundRequest,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RefundRequestListQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub status: Option<RefundRequestStatus>,
}

impl RefundRequestListQuery {
    pub fn page(&self) -> CursorQuery {
        CursorQuery {
            cursor: self.cursor.clone(),
            limit: self.limit,
        }
    }
}
