use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use utoipa::ToSchema;

use crate::pagination::{Cursor, Cursored};

/// Permission carried by an API key. `write` implies `read` on the same resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, ToSchema,
)]
pub enum ApiScope {
    #[serde(rename = "*")]
    #[strum(serialize = "*")]
    Full,
    #[serde(rename = "products:read")]
    #[strum(serialize = "products:read")]
    ProductsRead,
    #[serde(rename = "products:write")]
    #[strum(serialize = "products:write")]
    ProductsWrite,
    #[serde(rename = "payments:read")]
    #[strum(serialize = "payments:read")]
    PaymentsRead,
    #[serde(rename = "payments:write")]
    #[strum(serialize = "payments:write")]
    PaymentsWrite,
    #[serde(rename = "coupons:read")]
    #[strum(serialize = "coupons:read")]
    CouponsRead,
    #[serde(rename = "coupons:write")]
    #[strum(serialize = "coupons:write")]
    CouponsWrite,
    #[serde(rename = "users:read")]
    #[strum(serialize = "users:read")]
    UsersRead,
    #[serde(rename = "users:write")]
    #[strum(serialize = "users:write")]
    UsersWrite,
    #[serde(rename = "webhooks:read")]
    #[strum(serialize = "webhooks:read")]
    WebhooksRead,
    #[serde(rename = "webhooks:write")]
    #[strum(serialize = "webhooks:write")]
    WebhooksWrite,
    #[serde(rename = "analytics:read")]
    #[strum(serialize = "analytics:read")]
    AnalyticsRead,
}

impl ApiScope {
    /// Whether holding `self` grants `required`.
    pub fn grants(self, required: ApiScope) -> bool {
        use ApiScope::*;
        self == Full
            || self == required
            || matches!(
                (self, required),
                (ProductsWrite, ProductsRead)
                    | (PaymentsWrite, PaymentsRead)
                    | (CouponsWrite, CouponsRead)
                    | (UsersWrite, UsersRead)
                    | (WebhooksWrite, WebhooksRead)
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub scopes: Vec<ApiScope>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
}

impl Cursored for ApiKey {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

impl ApiKey {
    pub fn has_scope(&self, required: ApiScope) -> bool {
        self.scopes.iter().any(|s| s.grants(required))
    }

    pub fn is_usable_at(&self, now: i64) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateApiKey {
    pub name: String,
    /// Owner of the key (defaults to the caller)
    #[serde(default)]
    pub user_id: Option<String>,
    /// Defaults to full access
    #[serde(default)]
    pub scopes: Option<Vec<ApiScope>>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

/// Response when creating an API key (includes full key, shown only once)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyCreated {
    pub id: String,
    pub name: String,
    /// Full API key - shown only on creation
    pub key: String,
    pub prefix: String,
    pub scopes: Vec<ApiScope>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_write_implies_read() {
        assert!(ApiScope::ProductsWrite.grants(ApiScope::ProductsRead));
        assert!(!ApiScope::ProductsRead.grants(ApiScope::ProductsWrite));
        assert!(!ApiScope::ProductsWrite.grants(ApiScope::CouponsRead));
        assert!(ApiScope::Full.grants(ApiScope::AnalyticsRead));
    }

    #[test]
    fn test_scope_string_forms() {
        assert_eq!(ApiScope::from_str("coupons:write").unwrap(), ApiScope::CouponsWrite);
        assert_eq!(ApiScope::Full.as_ref(), "*");
        let parsed: Vec<ApiScope> = serde_json::from_str(r#"["*","users:read"]"#).unwrap();
        assert_eq!(parsed, vec![ApiScope::Full, ApiScope::UsersRead]);
    }
}
