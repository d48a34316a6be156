use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use utoipa::ToSchema;

use crate::error::{FieldErrors, Result};
use crate::pagination::{Cursor, Cursored};
use crate::pricing::MAX_AMOUNT_CENTS;
use crate::util::double_option;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiscountType {
    /// `discount_value` is a whole percentage (1-100)
    Percentage,
    /// `discount_value` is an amount in cents
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Coupon {
    pub id: String,
    pub code: String,
    pub name: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    /// Required for fixed coupons; must match the product currency
    pub currency: Option<String>,
    /// Empty = any buyer
    pub allowed_emails: Vec<String>,
    /// Empty = any product
    pub allowed_product_ids: Vec<String>,
    pub usage_limit_global: Option<i64>,
    pub usage_limit_per_user: Option<i64>,
    pub current_usage_count: i64,
    pub expires_at: Option<i64>,
    pub is_active: bool,
    pub is_oto_coupon: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Cursored for Coupon {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

/// Why a coupon cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponRejection {
    Inactive,
    Expired,
    UsageLimitReached,
    PerUserLimitReached,
    EmailNotAllowed,
    ProductNotAllowed,
    CurrencyMismatch,
}

impl CouponRejection {
    pub fn message(&self) -> &'static str {
        match self {
            CouponRejection::Inactive => "Coupon is not active",
            CouponRejection::Expired => "Coupon has expired",
            CouponRejection::UsageLimitReached => "Coupon usage limit reached",
            CouponRejection::PerUserLimitReached => "You have already used this coupon",
            CouponRejection::EmailNotAllowed => "Coupon is not valid for this email",
            CouponRejection::ProductNotAllowed => "Coupon is not valid for this product",
            CouponRejection::CurrencyMismatch => "Coupon currency does not match the product",
        }
    }
}

/// Context a coupon is checked against.
pub struct CouponContext<'a> {
    pub product_id: &'a str,
    pub currency: &'a str,
    pub email: Option<&'a str>,
    /// How many times this email already redeemed the coupon
    pub uses_by_email: i64,
    pub now: i64,
}

impl Coupon {
    pub fn check(&self, ctx: &CouponContext<'_>) -> std::result::Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if self.expires_at.is_some_and(|exp| ctx.now >= exp) {
            return Err(CouponRejection::Expired);
        }
        if self
            .usage_limit_global
            .is_some_and(|limit| self.current_usage_count >= limit)
        {
            return Err(CouponRejection::UsageLimitReached);
        }
        if !self.allowed_product_ids.is_empty()
            && !self.allowed_product_ids.iter().any(|p| p == ctx.product_id)
        {
            return Err(CouponRejection::ProductNotAllowed);
        }
        if !self.allowed_emails.is_empty() {
            let allowed = ctx.email.is_some_and(|email| {
                self.allowed_emails
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(email.trim()))
            });
            if !allowed {
                return Err(CouponRejection::EmailNotAllowed);
            }
        }
        if self
            .usage_limit_per_user
            .is_some_and(|limit| ctx.uses_by_email >= limit)
        {
            return Err(CouponRejection::PerUserLimitReached);
        }
        if self.discount_type == DiscountType::Fixed
            && self
                .currency
                .as_deref()
                .is_some_and(|c| !c.eq_ignore_ascii_case(ctx.currency))
        {
            return Err(CouponRejection::CurrencyMismatch);
        }
        Ok(())
    }
}

/// Codes are stored trimmed and uppercase.
pub fn normalize_coupon_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCoupon {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub allowed_emails: Vec<String>,
    #[serde(default)]
    pub allowed_product_ids: Vec<String>,
    #[serde(default)]
    pub usage_limit_global: Option<i64>,
    #[serde(default)]
    pub usage_limit_per_user: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl CreateCoupon {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();
        let code = normalize_coupon_code(&self.code);
        if code.is_empty() || code.len() > 64 {
            errors.add("code", "Code must be 1-64 characters");
        } else if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            errors.add("code", "Code may only contain letters, digits, '-' and '_'");
        }
        validate_discount(&mut errors, self.discount_type, self.discount_value);
        if self.discount_type == DiscountType::Fixed && self.currency.is_none() {
            errors.add("currency", "Fixed discounts need a currency");
        }
        validate_limits(&mut errors, self.usage_limit_global, self.usage_limit_per_user);
        errors.into_result()
    }
}

/// Fields an admin may change on a coupon.
///
/// Usage counters, ids and timestamps are deliberately absent: unknown JSON
/// keys are ignored, so a body carrying `current_usage_count` cannot reset it.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateCoupon {
    #[serde(default, deserialize_with = "double_option")]
    pub name: Option<Option<String>>,
    #[serde(default)]
    pub discount_type: Option<DiscountType>,
    #[serde(default)]
    pub discount_value: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub currency: Option<Option<String>>,
    #[serde(default)]
    pub allowed_emails: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_product_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub usage_limit_global: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub usage_limit_per_user: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<i64>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl UpdateCoupon {
    pub fn validate(&self, existing: &Coupon) -> Result<()> {
        let mut errors = FieldErrors::new();
        let discount_type = self.discount_type.unwrap_or(existing.discount_type);
        let value = self.discount_value.unwrap_or(existing.discount_value);
        validate_discount(&mut errors, discount_type, value);
        let currency = self.currency.clone().unwrap_or(existing.currency.clone());
        if discount_type == DiscountType::Fixed && currency.is_none() {
            errors.add("currency", "Fixed discounts need a currency");
        }
        validate_limits(
            &mut errors,
            self.usage_limit_global.unwrap_or(existing.usage_limit_global),
            self.usage_limit_per_user.unwrap_or(existing.usage_limit_per_user),
        );
        errors.into_result()
    }
}

pub(crate) fn validate_discount(errors: &mut FieldErrors, discount_type: DiscountType, value: i64) {
    match discount_type {
        DiscountType::Percentage if !(1..=100).contains(&value) => {
            errors.add("discount_value", "Percentage must be between 1 and 100");
        }
        DiscountType::Fixed if value <= 0 => {
            errors.add("discount_value", "Fixed discount must be positive");
        }
        DiscountType::Fixed if value > MAX_AMOUNT_CENTS => {
            errors.add("discount_value", format!("Fixed discount cannot exceed {} cents", MAX_AMOUNT_CENTS));
        }
        _ => {}
    }
}

fn validate_limits(errors: &mut FieldErrors, global: Option<i64>, per_user: Option<i64>) {
    if global.is_some_and(|l| l <= 0) {
        errors.add("usage_limit_global", "Usage limit must be positive");
    }
    if per_user.is_some_and(|l| l <= 0) {
        errors.add("usage_limit_per_user", "Usage limit must be positive");
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyCouponRequest {
    pub code: String,
    pub product_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyCouponResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<DiscountType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupon() -> Coupon {
        Coupon {
            id: "c1".into(),
            code: "SAVE10".into(),
            name: None,
            discount_type: DiscountType::Percentage,
            discount_value: 10,
            currency: None,
            allowed_emails: vec![],
            allowed_product_ids: vec![],
            usage_limit_global: None,
            usage_limit_per_user: None,
            current_usage_count: 0,
            expires_at: None,
            is_active: true,
            is_oto_coupon: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn ctx<'a>(email: Option<&'a str>, uses: i64) -> CouponContext<'a> {
        CouponContext {
            product_id: "p1",
            currency: "USD",
            email,
            uses_by_email: uses,
            now: 1000,
        }
    }

    #[test]
    fn test_plain_coupon_applies() {
        assert!(coupon().check(&ctx(None, 0)).is_ok());
    }

    #[test]
    fn test_expired_and_inactive() {
        let mut c = coupon();
        c.expires_at = Some(1000);
        assert_eq!(c.check(&ctx(None, 0)), Err(CouponRejection::Expired));
        c.expires_at = None;
        c.is_active = false;
        assert_eq!(c.check(&ctx(None, 0)), Err(CouponRejection::Inactive));
    }

    #[test]
    fn test_usage_limits() {
        let mut c = coupon();
        c.usage_limit_global = Some(5);
        c.current_usage_count = 5;
        assert_eq!(c.check(&ctx(None, 0)), Err(CouponRejection::UsageLimitReached));

        let mut c = coupon();
        c.usage_limit_per_user = Some(1);
        assert_eq!(
            c.check(&ctx(Some("a@example.com"), 1)),
            Err(CouponRejection::PerUserLimitReached)
        );
    }

    #[test]
    fn test_email_allow_list_is_case_insensitive() {
        let mut c = coupon();
        c.allowed_emails = vec!["vip@example.com".into()];
        assert!(c.check(&ctx(Some("VIP@example.com"), 0)).is_ok());
        assert_eq!(
            c.check(&ctx(Some("other@example.com"), 0)),
            Err(CouponRejection::EmailNotAllowed)
        );
        assert_eq!(c.check(&ctx(None, 0)), Err(CouponRejection::EmailNotAllowed));
    }

    #[test]
    fn test_product_allow_list_and_currency() {
        let mut c = coupon();
        c.allowed_product_ids = vec!["other".into()];
        assert_eq!(c.check(&ctx(None, 0)), Err(CouponRejection::ProductNotAllowed));

        let mut c = coupon();
        c.discount_type = DiscountType::Fixed;
        c.discount_value = 500;
        c.currency = Some("EUR".into());
        assert_eq!(c.check(&ctx(None, 0)), Err(CouponRejection::CurrencyMismatch));
    }

    #[test]
    fn test_update_ignores_usage_counter() {
        let update: UpdateCoupon =
            serde_json::from_str(r#"{"current_usage_count":0,"is_active":false}"#).unwrap();
        assert_eq!(update.is_active, Some(false));
        assert!(update.validate(&coupon()).is_ok());
    }

    #[test]
    fn test_create_validation() {
        let bad: CreateCoupon = serde_json::from_str(
            r#"{"code":"no spaces!","discount_type":"percentage","discount_value":150}"#,
        )
        .unwrap();
        assert!(bad.validate().is_err());
        let fixed: CreateCoupon =
            serde_json::from_str(r#"{"code":"FLAT5","discount_type":"fixed","discount_value":500}"#)
                .unwrap();
        assert!(fixed.validate().is_err(), "fixed coupons need a currency");
    }
}
