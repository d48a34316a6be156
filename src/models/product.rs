use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use utoipa::ToSchema;

use crate::error::{FieldErrors, Result};
use crate::pagination::{Cursor, CursorQuery, Cursored};
use crate::pricing::MAX_AMOUNT_CENTS;
use crate::util::{double_option, is_valid_slug};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContentDeliveryType {
    Content,
    Redirect,
    Download,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContentItem {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// What a buyer receives once they have access to a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentDelivery {
    /// Content rendered on the product page
    Content { items: Vec<ContentItem> },
    /// Buyer is sent to an external URL
    Redirect { url: String },
    /// Buyer downloads a file through a short-lived signed link
    Download {
        url: String,
        #[serde(default)]
        filename: Option<String>,
    },
}

impl Default for ContentDelivery {
    fn default() -> Self {
        ContentDelivery::Content { items: Vec::new() }
    }
}

impl ContentDelivery {
    pub fn kind(&self) -> ContentDeliveryType {
        match self {
            ContentDelivery::Content { .. } => ContentDeliveryType::Content,
            ContentDelivery::Redirect { .. } => ContentDeliveryType::Redirect,
            ContentDelivery::Download { .. } => ContentDeliveryType::Download,
        }
    }

    fn validate(&self, errors: &mut FieldErrors) {
        let check_url = |url: &str| url.starts_with("https://") || url.starts_with("http://");
        match self {
            ContentDelivery::Content { items } => {
                if items.iter().any(|i| i.title.trim().is_empty()) {
                    errors.add("content", "Content items need a title");
                }
                if items.iter().filter_map(|i| i.url.as_deref()).any(|u| !check_url(u)) {
                    errors.add("content", "Content item URLs must be http(s)");
                }
            }
            ContentDelivery::Redirect { url } | ContentDelivery::Download { url, .. } => {
                if !check_url(url) {
                    errors.add("content", "Delivery URL must be http(s)");
                }
            }
        }
    }
}

/// Whether a product can be bought at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Inactive,
    NotYetAvailable,
    NoLongerAvailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub sale_price_cents: Option<i64>,
    /// None = sale runs until removed
    pub sale_price_until: Option<i64>,
    /// VAT rate in percent (e.g. 23.0)
    pub vat_rate: Option<f64>,
    pub price_includes_vat: bool,
    pub is_active: bool,
    pub available_from: Option<i64>,
    pub available_until: Option<i64>,
    /// Access length granted on purchase (None = lifetime)
    pub auto_grant_duration_days: Option<i32>,
    pub is_refundable: bool,
    pub refund_period_days: Option<i32>,
    pub content: ContentDelivery,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Cursored for Product {
    fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

impl Product {
    pub fn availability_at(&self, now: i64) -> Availability {
        if !self.is_active {
            return Availability::Inactive;
        }
        if self.available_from.is_some_and(|from| now < from) {
            return Availability::NotYetAvailable;
        }
        if self.available_until.is_some_and(|until| now >= until) {
            return Availability::NoLongerAvailable;
        }
        Availability::Available
    }

    pub fn sale_active_at(&self, now: i64) -> bool {
        self.sale_price_cents.is_some() && self.sale_price_until.is_none_or(|until| now < until)
    }

    /// The price a buyer pays right now, before bumps, coupons and VAT.
    pub fn effective_price_at(&self, now: i64) -> i64 {
        if self.sale_active_at(now) {
            self.sale_price_cents.unwrap_or(self.price_cents)
        } else {
            self.price_cents
        }
    }

    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProduct {
    pub name: String,
    /// Generated from the name when absent
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub sale_price_cents: Option<i64>,
    #[serde(default)]
    pub sale_price_until: Option<i64>,
    #[serde(default)]
    pub vat_rate: Option<f64>,
    #[serde(default = "default_true")]
    pub price_includes_vat: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub available_from: Option<i64>,
    #[serde(default)]
    pub available_until: Option<i64>,
    #[serde(default)]
    pub auto_grant_duration_days: Option<i32>,
    #[serde(default)]
    pub is_refundable: bool,
    #[serde(default)]
    pub refund_period_days: Option<i32>,
    #[serde(default)]
    pub content: ContentDelivery,
}

impl CreateProduct {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();
        validate_name(&mut errors, &self.name);
        if let Some(slug) = &self.slug {
            validate_slug(&mut errors, slug);
        }
        validate_prices(&mut errors, self.price_cents, self.sale_price_cents);
        validate_currency(&mut errors, &self.currency);
        validate_vat(&mut errors, self.vat_rate);
        validate_window(&mut errors, self.available_from, self.available_until);
        validate_days(&mut errors, "auto_grant_duration_days", self.auto_grant_duration_days);
        validate_days(&mut errors, "refund_period_days", self.refund_period_days);
        if self.is_refundable && self.refund_period_days.is_none() {
            errors.add("refund_period_days", "Refundable products need a refund period");
        }
        self.content.validate(&mut errors);
        errors.into_result()
    }
}

/// Partial update. Nullable columns use `Option<Option<T>>`:
/// absent = unchanged, `null` = cleared.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProduct {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub sale_price_cents: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub sale_price_until: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub vat_rate: Option<Option<f64>>,
    #[serde(default)]
    pub price_includes_vat: Option<bool>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub available_from: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub available_until: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub auto_grant_duration_days: Option<Option<i32>>,
    #[serde(default)]
    pub is_refundable: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub refund_period_days: Option<Option<i32>>,
    #[serde(default)]
    pub content: Option<ContentDelivery>,
}

impl UpdateProduct {
    /// Validate the update against the row it will be applied to.
    pub fn validate(&self, existing: &Product) -> Result<()> {
        let mut errors = FieldErrors::new();
        if let Some(name) = &self.name {
            validate_name(&mut errors, name);
        }
        if let Some(slug) = &self.slug {
            validate_slug(&mut errors, slug);
        }
        let price = self.price_cents.unwrap_or(existing.price_cents);
        let sale = self.sale_price_cents.unwrap_or(existing.sale_price_cents);
        validate_prices(&mut errors, price, sale);
        if let Some(currency) = &self.currency {
            validate_currency(&mut errors, currency);
        }
        validate_vat(&mut errors, self.vat_rate.unwrap_or(existing.vat_rate));
        validate_window(
            &mut errors,
            self.available_from.unwrap_or(existing.available_from),
            self.available_until.unwrap_or(existing.available_until),
        );
        let refund_days = self.refund_period_days.unwrap_or(existing.refund_period_days);
        validate_days(
            &mut errors,
            "auto_grant_duration_days",
            self.auto_grant_duration_days.unwrap_or(existing.auto_grant_duration_days),
        );
        validate_days(&mut errors, "refund_period_days", refund_days);
        if self.is_refundable.unwrap_or(existing.is_refundable) && refund_days.is_none() {
            errors.add("refund_period_days", "Refundable products need a refund period");
        }
        if let Some(content) = &self.content {
            content.validate(&mut errors);
        }
        errors.into_result()
    }

    pub fn changes_price(&self) -> bool {
        self.price_cents.is_some() || self.sale_price_cents.is_some()
    }
}

fn validate_name(errors: &mut FieldErrors, name: &str) {
    if name.trim().is_empty() {
        errors.add("name", "Name is required");
    } else if name.len() > 200 {
        errors.add("name", "Name must be at most 200 characters");
    }
}

fn validate_slug(errors: &mut FieldErrors, slug: &str) {
    if !is_valid_slug(slug) {
        errors.add("slug", "Slug may only contain lowercase letters, digits and dashes");
    }
}

fn validate_prices(errors: &mut FieldErrors, price: i64, sale: Option<i64>) {
    if price < 0 {
        errors.add("price_cents", "Price cannot be negative");
    } else if price > MAX_AMOUNT_CENTS {
        errors.add("price_cents", format!("Price cannot exceed {} cents", MAX_AMOUNT_CENTS));
    }
    if let Some(sale) = sale {
        if sale < 0 {
            errors.add("sale_price_cents", "Sale price cannot be negative");
        } else if sale >= price {
            errors.add("sale_price_cents", "Sale price must be lower than the regular price");
        }
    }
}

fn validate_currency(errors: &mut FieldErrors, currency: &str) {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        errors.add("currency", "Currency must be a 3-letter ISO code");
    }
}

fn validate_vat(errors: &mut FieldErrors, vat_rate: Option<f64>) {
    if let Some(rate) = vat_rate {
        if !(0.0..=100.0).contains(&rate) || rate.is_nan() {
            errors.add("vat_rate", "VAT rate must be between 0 and 100");
        }
    }
}

fn validate_window(errors: &mut FieldErrors, from: Option<i64>, until: Option<i64>) {
    if let (Some(from), Some(until)) = (from, until) {
        if from >= until {
            errors.add("available_until", "Availability window ends before it starts");
        }
    }
}

fn validate_days(errors: &mut FieldErrors, field: &str, days: Option<i32>) {
    if days.is_some_and(|d| d <= 0) {
        errors.add(field, "Must be a positive number of days");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderBump {
    pub id: String,
    pub product_id: String,
    pub bump_product_id: String,
    /// Overrides the bump product's own price when set
    pub bump_price_cents: Option<i64>,
    pub title: String,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderBump {
    pub bump_product_id: String,
    #[serde(default)]
    pub bump_price_cents: Option<i64>,
    pub title: String,
}

/// One entry of a product's price history, used for the Omnibus lowest price.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricePoint {
    pub price_cents: i64,
    pub sale_price_cents: Option<i64>,
    pub effective_from: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProductListQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    /// active | inactive | all (default all)
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

impl ProductListQuery {
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

    fn product() -> Product {
        Product {
            id: "p1".into(),
            name: "Course".into(),
            slug: "course".into(),
            description: None,
            price_cents: 10000,
            currency: "USD".into(),
            sale_price_cents: None,
            sale_price_until: None,
            vat_rate: None,
            price_includes_vat: true,
            is_active: true,
            available_from: None,
            available_until: None,
            auto_grant_duration_days: None,
            is_refundable: false,
            refund_period_days: None,
            content: ContentDelivery::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_availability_window() {
        let mut p = product();
        p.available_from = Some(100);
        p.available_until = Some(200);
        assert_eq!(p.availability_at(50), Availability::NotYetAvailable);
        assert_eq!(p.availability_at(150), Availability::Available);
        assert_eq!(p.availability_at(200), Availability::NoLongerAvailable);
        p.is_active = false;
        assert_eq!(p.availability_at(150), Availability::Inactive);
    }

    #[test]
    fn test_sale_price_applies_until_expiry() {
        let mut p = product();
        p.sale_price_cents = Some(7000);
        p.sale_price_until = Some(500);
        assert_eq!(p.effective_price_at(100), 7000);
        assert_eq!(p.effective_price_at(500), 10000);
        p.sale_price_until = None;
        assert_eq!(p.effective_price_at(10_000), 7000);
    }

    #[test]
    fn test_content_delivery_tagging() {
        let json = r#"{"type":"redirect","url":"https://example.com/course"}"#;
        let delivery: ContentDelivery = serde_json::from_str(json).unwrap();
        assert_eq!(delivery.kind(), ContentDeliveryType::Redirect);
        let back = serde_json::to_value(&delivery).unwrap();
        assert_eq!(back["type"], "redirect");
    }

    #[test]
    fn test_create_product_validation_collects_fields() {
        let input: CreateProduct = serde_json::from_value(serde_json::json!({
            "name": "",
            "slug": "Bad Slug",
            "price_cents": 1000,
            "sale_price_cents": 2000,
            "currency": "dollars",
            "vat_rate": 150.0,
            "is_refundable": true
        }))
        .unwrap();
        match input.validate() {
            Err(crate::error::AppError::Validation(errors)) => {
                for field in ["name", "slug", "sale_price_cents", "currency", "vat_rate", "refund_period_days"] {
                    assert!(errors.get(field).is_some(), "missing error for {field}");
                }
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_update_product_checks_merged_sale_price() {
        let p = product();
        let update = UpdateProduct {
            sale_price_cents: Some(Some(20000)),
            ..Default::default()
        };
        assert!(update.validate(&p).is_err());
        let clear = UpdateProduct {
            sale_price_cents: Some(None),
            ..Default::default()
        };
        assert!(clear.validate(&p).is_ok());
    }
}
