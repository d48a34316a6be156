mod from_row;
pub mod queries;

use std::path::Path;
use std::sync::Arc;

use governor::DefaultKeyedRateLimiter;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::crypto::MasterKey;
use crate::dispatch::WebhookDispatcher;
use crate::error::Result;
use crate::payments::PaymentProcessor;

pub use from_row::{FromRow, query_all, query_one};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub base_url: String,
    pub audit_log_enabled: bool,
    /// Accept plain http:// webhook endpoint URLs
    pub allow_http_webhooks: bool,
    pub master_key: MasterKey,
    /// Signing secret for incoming Stripe events (None = ingress disabled)
    pub stripe_webhook_secret: Option<String>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub dispatcher: WebhookDispatcher,
    pub rate_limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

/// Open a pooled SQLite database (WAL mode) and make sure the schema exists.
pub fn open_pool(path: impl AsRef<Path>, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = Pool::builder().max_size(max_size).build(manager)?;
    init_db(&*pool.get()?)?;
    Ok(pool)
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            full_name TEXT,
            is_admin INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            prefix TEXT NOT NULL,
            key_hash TEXT NOT NULL UNIQUE,
            scopes TEXT NOT NULL DEFAULT '["*"]',
            created_at INTEGER NOT NULL,
            last_used_at INTEGER,
            expires_at INTEGER,
            revoked_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_api_keys_user ON api_keys(user_id);

        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            description TEXT,
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            sale_price_cents INTEGER,
            sale_price_until INTEGER,
            vat_rate REAL,
            price_includes_vat INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            available_from INTEGER,
            available_until INTEGER,
            auto_grant_duration_days INTEGER,
            is_refundable INTEGER NOT NULL DEFAULT 0,
            refund_period_days INTEGER,
            content_delivery_type TEXT NOT NULL DEFAULT 'content',
            content_config TEXT NOT NULL DEFAULT '{"type":"content","items":[]}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS price_history (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            price_cents INTEGER NOT NULL,
            sale_price_cents INTEGER,
            effective_from INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_price_history_product ON price_history(product_id, effective_from);

        CREATE TABLE IF NOT EXISTS order_bumps (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            bump_product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            bump_price_cents INTEGER,
            title TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            UNIQUE(product_id, bump_product_id)
        );

        CREATE TABLE IF NOT EXISTS coupons (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT,
            discount_type TEXT NOT NULL,
            discount_value INTEGER NOT NULL,
            currency TEXT,
            allowed_emails TEXT NOT NULL DEFAULT '[]',
            allowed_product_ids TEXT NOT NULL DEFAULT '[]',
            usage_limit_global INTEGER,
            usage_limit_per_user INTEGER,
            current_usage_count INTEGER NOT NULL DEFAULT 0,
            expires_at INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_oto_coupon INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS coupon_redemptions (
            id TEXT PRIMARY KEY,
            coupon_id TEXT NOT NULL REFERENCES coupons(id) ON DELETE CASCADE,
            email TEXT NOT NULL COLLATE NOCASE,
            transaction_id TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_coupon_redemptions_coupon ON coupon_redemptions(coupon_id, email);

        CREATE TABLE IF NOT EXISTS checkout_sessions (
            id TEXT PRIMARY KEY,
            idempotency_key TEXT NOT NULL UNIQUE,
            product_id TEXT NOT NULL REFERENCES products(id),
            email TEXT NOT NULL,
            user_id TEXT,
            bump_product_id TEXT,
            coupon_code TEXT,
            subtotal_cents INTEGER NOT NULL,
            discount_cents INTEGER NOT NULL,
            total_cents INTEGER NOT NULL,
            vat_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            provider_session_id TEXT,
            checkout_url TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_checkout_sessions_provider ON checkout_sessions(provider_session_id);

        CREATE TABLE IF NOT EXISTS payment_transactions (
            id TEXT PRIMARY KEY,
            session_id TEXT UNIQUE,
            user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            email TEXT NOT NULL,
            product_id TEXT NOT NULL REFERENCES products(id),
            bump_product_id TEXT,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            vat_cents INTEGER NOT NULL DEFAULT 0,
            coupon_id TEXT,
            stripe_payment_intent_id TEXT,
            status TEXT NOT NULL DEFAULT 'completed',
            refunded_amount_cents INTEGER NOT NULL DEFAULT 0,
            refunded_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_user ON payment_transactions(user_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_intent ON payment_transactions(stripe_payment_intent_id);

        CREATE TABLE IF NOT EXISTS refunds (
            id TEXT PRIMARY KEY,
            transaction_id TEXT NOT NULL REFERENCES payment_transactions(id),
            provider_refund_id TEXT NOT NULL UNIQUE,
            amount_cents INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_refunds_transaction ON refunds(transaction_id);

        CREATE TABLE IF NOT EXISTS user_product_access (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            access_granted_at INTEGER NOT NULL,
            access_expires_at INTEGER,
            transaction_id TEXT,
            UNIQUE(user_id, product_id)
        );

        CREATE TABLE IF NOT EXISTS refund_requests (
            id TEXT PRIMARY KEY,
            transaction_id TEXT NOT NULL REFERENCES payment_transactions(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            reason TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            admin_response TEXT,
            processed_by TEXT,
            processed_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_refund_requests_tx ON refund_requests(transaction_id);

        CREATE TABLE IF NOT EXISTS webhook_endpoints (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            description TEXT,
            events TEXT NOT NULL,
            secret_encrypted BLOB NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS webhook_logs (
            id TEXT PRIMARY KEY,
            endpoint_id TEXT NOT NULL REFERENCES webhook_endpoints(id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL,
            http_status INTEGER,
            response_body TEXT,
            error_message TEXT,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_endpoint ON webhook_logs(endpoint_id, created_at);

        CREATE TABLE IF NOT EXISTS oto_offers (
            id TEXT PRIMARY KEY,
            source_product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            oto_product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            discount_type TEXT NOT NULL,
            discount_value INTEGER NOT NULL,
            duration_minutes INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS oto_grants (
            id TEXT PRIMARY KEY,
            offer_id TEXT NOT NULL REFERENCES oto_offers(id) ON DELETE CASCADE,
            session_id TEXT NOT NULL,
            email TEXT NOT NULL,
            coupon_id TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(offer_id, session_id)
        );

        CREATE TABLE IF NOT EXISTS processed_stripe_events (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL UNIQUE,
            event_type TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            user_id TEXT,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            details TEXT,
            ip_address TEXT,
            user_agent TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_created ON audit_logs(created_at);
        "#,
    )
}
