//! Row mapping for every table, plus the column lists the queries select.
//!
//! Each `*_COLS` constant must list columns in the order the matching
//! `FromRow` impl reads them.

use rusqlite::{Connection, Params, Row};
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::models::*;

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub fn query_one<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(T::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn query_all<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| T::from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Parse a strum-backed enum column, surfacing bad values as a conversion error.
fn parse_enum<T: std::str::FromStr>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected enum value '{}'", raw).into(),
        )
    })
}

/// Parse a JSON text column.
fn parse_json<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub const USER_COLS: &str = "id, email, full_name, is_admin, created_at, updated_at";

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            full_name: row.get(2)?,
            is_admin: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

pub const API_KEY_COLS: &str =
    "id, user_id, name, prefix, key_hash, scopes, created_at, last_used_at, expires_at, revoked_at";

impl FromRow for ApiKey {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ApiKey {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            prefix: row.get(3)?,
            key_hash: row.get(4)?,
            scopes: parse_json(row, 5)?,
            created_at: row.get(6)?,
            last_used_at: row.get(7)?,
            expires_at: row.get(8)?,
            revoked_at: row.get(9)?,
        })
    }
}

pub const PRODUCT_COLS: &str = "id, name, slug, description, price_cents, currency, sale_price_cents, \
     sale_price_until, vat_rate, price_includes_vat, is_active, available_from, available_until, \
     auto_grant_duration_days, is_refundable, refund_period_days, content_config, created_at, updated_at";

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            price_cents: row.get(4)?,
            currency: row.get(5)?,
            sale_price_cents: row.get(6)?,
            sale_price_until: row.get(7)?,
            vat_rate: row.get(8)?,
            price_includes_vat: row.get(9)?,
            is_active: row.get(10)?,
            available_from: row.get(11)?,
            available_until: row.get(12)?,
            auto_grant_duration_days: row.get(13)?,
            is_refundable: row.get(14)?,
            refund_period_days: row.get(15)?,
            content: parse_json(row, 16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }
}

pub const PRICE_POINT_COLS: &str = "price_cents, sale_price_cents, effective_from";

impl FromRow for PricePoint {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PricePoint {
            price_cents: row.get(0)?,
            sale_price_cents: row.get(1)?,
            effective_from: row.get(2)?,
        })
    }
}

pub const ORDER_BUMP_COLS: &str =
    "id, product_id, bump_product_id, bump_price_cents, title, is_active, created_at";

impl FromRow for OrderBump {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderBump {
            id: row.get(0)?,
            product_id: row.get(1)?,
            bump_product_id: row.get(2)?,
            bump_price_cents: row.get(3)?,
            title: row.get(4)?,
            is_active: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

pub const COUPON_COLS: &str = "id, code, name, discount_type, discount_value, currency, allowed_emails, \
     allowed_product_ids, usage_limit_global, usage_limit_per_user, current_usage_count, expires_at, \
     is_active, is_oto_coupon, created_at, updated_at";

impl FromRow for Coupon {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Coupon {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            discount_type: parse_enum(row, 3)?,
            discount_value: row.get(4)?,
            currency: row.get(5)?,
            allowed_emails: parse_json(row, 6)?,
            allowed_product_ids: parse_json(row, 7)?,
            usage_limit_global: row.get(8)?,
            usage_limit_per_user: row.get(9)?,
            current_usage_count: row.get(10)?,
            expires_at: row.get(11)?,
            is_active: row.get(12)?,
            is_oto_coupon: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

pub const CHECKOUT_SESSION_COLS: &str = "id, idempotency_key, product_id, email, user_id, bump_product_id, \
     coupon_code, subtotal_cents, discount_cents, total_cents, vat_cents, currency, provider_session_id, \
     checkout_url, status, created_at";

impl FromRow for CheckoutSession {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CheckoutSession {
            id: row.get(0)?,
            idempotency_key: row.get(1)?,
            product_id: row.get(2)?,
            email: row.get(3)?,
            user_id: row.get(4)?,
            bump_product_id: row.get(5)?,
            coupon_code: row.get(6)?,
            subtotal_cents: row.get(7)?,
            discount_cents: row.get(8)?,
            total_cents: row.get(9)?,
            vat_cents: row.get(10)?,
            currency: row.get(11)?,
            provider_session_id: row.get(12)?,
            checkout_url: row.get(13)?,
            status: parse_enum(row, 14)?,
            created_at: row.get(15)?,
        })
    }
}

pub const TRANSACTION_COLS: &str = "id, session_id, user_id, email, product_id, bump_product_id, amount_cents, \
     currency, vat_cents, coupon_id, stripe_payment_intent_id, status, refunded_amount_cents, refunded_at, \
     created_at, updated_at";

impl FromRow for PaymentTransaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentTransaction {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            email: row.get(3)?,
            product_id: row.get(4)?,
            bump_product_id: row.get(5)?,
            amount_cents: row.get(6)?,
            currency: row.get(7)?,
            vat_cents: row.get(8)?,
            coupon_id: row.get(9)?,
            stripe_payment_intent_id: row.get(10)?,
            status: parse_enum(row, 11)?,
            refunded_amount_cents: row.get(12)?,
            refunded_at: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

/// Selected from `user_product_access a JOIN products p`.
pub const USER_ACCESS_COLS: &str = "a.id, a.user_id, a.product_id, p.name, p.slug, a.access_granted_at, \
     a.access_expires_at, a.transaction_id";

impl FromRow for UserAccess {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(UserAccess {
            id: row.get(0)?,
            user_id: row.get(1)?,
            product_id: row.get(2)?,
            product_name: row.get(3)?,
            product_slug: row.get(4)?,
            access_granted_at: row.get(5)?,
            access_expires_at: row.get(6)?,
            transaction_id: row.get(7)?,
        })
    }
}

pub const REFUND_REQUEST_COLS: &str = "id, transaction_id, user_id, reason, status, admin_response, \
     processed_by, processed_at, created_at";

impl FromRow for RefundRequest {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RefundRequest {
            id: row.get(0)?,
            transaction_id: row.get(1)?,
            user_id: row.get(2)?,
            reason: row.get(3)?,
            status: parse_enum(row, 4)?,
            admin_response: row.get(5)?,
            processed_by: row.get(6)?,
            processed_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

pub const WEBHOOK_ENDPOINT_COLS: &str =
    "id, url, description, events, secret_encrypted, is_active, created_at, updated_at";

impl FromRow for WebhookEndpoint {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookEndpoint {
            id: row.get(0)?,
            url: row.get(1)?,
            description: row.get(2)?,
            events: parse_json(row, 3)?,
            secret_encrypted: row.get(4)?,
            is_active: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

pub const WEBHOOK_LOG_COLS: &str = "id, endpoint_id, event_type, payload, status, http_status, response_body, \
     error_message, duration_ms, created_at";

impl FromRow for WebhookLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookLog {
            id: row.get(0)?,
            endpoint_id: row.get(1)?,
            event_type: row.get(2)?,
            payload: parse_json(row, 3)?,
            status: parse_enum(row, 4)?,
            http_status: row.get(5)?,
            response_body: row.get(6)?,
            error_message: row.get(7)?,
            duration_ms: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

pub const OTO_OFFER_COLS: &str = "id, source_product_id, oto_product_id, discount_type, discount_value, \
     duration_minutes, is_active, created_at";

impl FromRow for OtoOffer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OtoOffer {
            id: row.get(0)?,
            source_product_id: row.get(1)?,
            oto_product_id: row.get(2)?,
            discount_type: parse_enum(row, 3)?,
            discount_value: row.get(4)?,
            duration_minutes: row.get(5)?,
            is_active: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

pub const OTO_GRANT_COLS: &str = "id, offer_id, session_id, email, coupon_id, expires_at, created_at";

impl FromRow for OtoGrant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OtoGrant {
            id: row.get(0)?,
            offer_id: row.get(1)?,
            session_id: row.get(2)?,
            email: row.get(3)?,
            coupon_id: row.get(4)?,
            expires_at: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

pub const AUDIT_LOG_COLS: &str =
    "id, created_at, user_id, action, resource_type, resource_id, details, ip_address, user_agent";

impl FromRow for AuditLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let details: Option<String> = row.get(6)?;
        Ok(AuditLog {
            id: row.get(0)?,
            created_at: row.get(1)?,
            user_id: row.get(2)?,
            action: row.get(3)?,
            resource_type: row.get(4)?,
            resource_id: row.get(5)?,
            details: details.and_then(|d| serde_json::from_str(&d).ok()),
            ip_address: row.get(7)?,
            user_agent: row.get(8)?,
        })
    }
}
