use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{FieldErrors, Result};
use crate::pagination::{Cursor, CursorQuery, Cursored};
use crate::validation::is_valid_email_syntax;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Cursored for User {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUser {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl CreateUser {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();
        if !is_valid_email_syntax(&self.email) {
            errors.add("email", "Invalid email address");
        }
        errors.into_result()
    }
}

/// A user's access grant to a product, joined with product display fields.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserAccess {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub product_name: String,
    pub product_slug: String,
    pub access_granted_at: i64,
    /// None = lifetime access
    pub access_expires_at: Option<i64>,
    pub transaction_id: Option<String>,
}

impl UserAccess {
    pub fn is_active_at(&self, now: i64) -> bool {
        self.access_expires_at.is_none_or(|exp| exp > now)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantAccess {
    pub product_id: String,
    /// Access duration in days (None = lifetime, or the product's default)
    #[serde(default)]
    pub duration_days: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UserListQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    /// Substring match on email or name
    #[serde(default)]
    pub search: Option<String>,
}

impl UserListQuery {
    pub fn page(&self) -> CursorQuery {
        CursorQuery {
            cursor: self.cursor.clone(),
            limit: self.limit,
        }
    }
}
