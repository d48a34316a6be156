use chrono::Utc;
use rusqlite::{Connection, ToSql, params, types::Value};
use uuid::Uuid;

use crate::crypto::{generate_token, hash_secret};
use crate::error::{AppError, Result};
use crate::models::*;
use crate::pagination::{CursorQuery, push_cursor_clause};

use super::from_row::{
    API_KEY_COLS, AUDIT_LOG_COLS, CHECKOUT_SESSION_COLS, COUPON_COLS, FromRow, OTO_GRANT_COLS,
    OTO_OFFER_COLS, ORDER_BUMP_COLS, PRICE_POINT_COLS, PRODUCT_COLS, REFUND_REQUEST_COLS,
    TRANSACTION_COLS, USER_ACCESS_COLS, USER_COLS, WEBHOOK_ENDPOINT_COLS, WEBHOOK_LOG_COLS,
    query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Map a UNIQUE constraint failure to a 409, anything else to a database error.
fn conflict_on_unique(err: rusqlite::Error, message: &str) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict(message.to_string())
    } else {
        err.into()
    }
}

/// Builder for dynamic UPDATE statements with optional fields.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Apply a PATCH field: absent = untouched, `Some(None)` = NULL.
    fn set_patch<V: Into<Value>>(self, column: &'static str, value: Option<Option<V>>) -> Self {
        match value {
            Some(Some(v)) => self.set(column, v),
            Some(None) => self.set(column, Value::Null),
            None => self,
        }
    }

    fn execute(mut self, conn: &Connection) -> rusqlite::Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

/// WHERE clause with numbered parameters, for list queries with optional filters.
struct Filter {
    clause: String,
    params: Vec<Box<dyn ToSql>>,
}

impl Filter {
    fn new() -> Self {
        Self {
            clause: String::from("WHERE 1=1"),
            params: Vec::new(),
        }
    }

    /// Append ` AND {column} = ?n`.
    fn eq(&mut self, column: &str, value: impl ToSql + 'static) {
        let n = self.params.len() + 1;
        self.clause.push_str(&format!(" AND {} = ?{}", column, n));
        self.params.push(Box::new(value));
    }

    /// Append a condition where `?` stands for one shared parameter.
    fn raw(&mut self, condition: &str, value: impl ToSql + 'static) {
        let n = self.params.len() + 1;
        self.clause
            .push_str(&format!(" AND {}", condition.replace('?', &format!("?{}", n))));
        self.params.push(Box::new(value));
    }

    /// Keyset-paginated SELECT, newest first, fetching one extra row for `has_more`.
    fn page<T: FromRow>(
        mut self,
        conn: &Connection,
        cols: &str,
        from: &str,
        alias: &str,
        page: &CursorQuery,
    ) -> Result<Vec<T>> {
        push_cursor_clause(&mut self.clause, &mut self.params, page.after()?, alias);
        let prefix = if alias.is_empty() {
            String::new()
        } else {
            format!("{}.", alias)
        };
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY {p}created_at DESC, {p}id DESC LIMIT ?{}",
            cols,
            from,
            self.clause,
            self.params.len() + 1,
            p = prefix
        );
        self.params.push(Box::new(page.fetch_limit()));
        let refs: Vec<&dyn ToSql> = self.params.iter().map(|b| b.as_ref()).collect();
        query_all(conn, &sql, refs.as_slice())
    }
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = gen_id();
    let now = now();
    let email = input.email.trim().to_lowercase();

    conn.execute(
        "INSERT INTO users (id, email, full_name, is_admin, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &email, &input.full_name, input.is_admin, now, now],
    )
    .map_err(|e| conflict_on_unique(e, "A user with this email already exists"))?;

    Ok(User {
        id,
        email,
        full_name: input.full_name.clone(),
        is_admin: input.is_admin,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        &[&email.trim()],
    )
}

/// Buyers are identified by email; the first purchase creates their account.
pub fn find_or_create_user_by_email(conn: &Connection, email: &str) -> Result<User> {
    if let Some(user) = get_user_by_email(conn, email)? {
        return Ok(user);
    }
    create_user(
        conn,
        &CreateUser {
            email: email.to_string(),
            full_name: None,
            is_admin: false,
        },
    )
}

pub fn list_users(conn: &Connection, query: &UserListQuery) -> Result<Vec<User>> {
    let mut filter = Filter::new();
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        filter.raw(
            "(email LIKE ? ESCAPE '\\' OR full_name LIKE ? ESCAPE '\\')",
            like_pattern(search),
        );
    }
    filter.page(conn, USER_COLS, "users", "", &query.page())
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

// ============ API Keys ============

pub const API_KEY_PREFIX: &str = "gf_";

/// Create an API key. Returns the stored row and the full key, which is
/// never persisted and cannot be shown again.
pub fn create_api_key(
    conn: &Connection,
    user_id: &str,
    name: &str,
    scopes: &[ApiScope],
    expires_at: Option<i64>,
) -> Result<(ApiKey, String)> {
    let id = gen_id();
    let now = now();
    let full_key = generate_token(API_KEY_PREFIX, 24);
    let prefix: String = full_key.chars().take(API_KEY_PREFIX.len() + 8).collect();
    let key_hash = hash_secret(&full_key);
    let scopes_json = serde_json::to_string(scopes)?;

    conn.execute(
        "INSERT INTO api_keys (id, user_id, name, prefix, key_hash, scopes, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![&id, user_id, name, &prefix, &key_hash, &scopes_json, now, expires_at],
    )?;

    Ok((
        ApiKey {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            prefix,
            key_hash,
            scopes: scopes.to_vec(),
            created_at: now,
            last_used_at: None,
            expires_at,
            revoked_at: None,
        },
        full_key,
    ))
}

/// Resolve a raw API key to its owner. Revoked and expired keys resolve to None.
pub fn get_user_by_api_key(conn: &Connection, api_key: &str) -> Result<Option<(User, ApiKey)>> {
    let key: Option<ApiKey> = query_one(
        conn,
        &format!("SELECT {} FROM api_keys WHERE key_hash = ?1", API_KEY_COLS),
        &[&hash_secret(api_key)],
    )?;
    let Some(key) = key else {
        return Ok(None);
    };
    let now = now();
    if !key.is_usable_at(now) {
        return Ok(None);
    }
    let Some(user) = get_user_by_id(conn, &key.user_id)? else {
        return Ok(None);
    };
    conn.execute(
        "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
        params![now, &key.id],
    )?;
    Ok(Some((user, key)))
}

pub fn list_api_keys(conn: &Connection, page: &CursorQuery) -> Result<Vec<ApiKey>> {
    Filter::new().page(conn, API_KEY_COLS, "api_keys", "", page)
}

pub fn revoke_api_key(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE api_keys SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
        params![now(), id],
    )?;
    Ok(affected > 0)
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct, slug: &str) -> Result<Product> {
    let id = gen_id();
    let now = now();
    let currency = input.currency.to_uppercase();
    let content_json = serde_json::to_string(&input.content)?;

    conn.execute(
        "INSERT INTO products (id, name, slug, description, price_cents, currency, sale_price_cents,
            sale_price_until, vat_rate, price_includes_vat, is_active, available_from, available_until,
            auto_grant_duration_days, is_refundable, refund_period_days, content_delivery_type,
            content_config, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            &id,
            input.name.trim(),
            slug,
            &input.description,
            input.price_cents,
            &currency,
            input.sale_price_cents,
            input.sale_price_until,
            input.vat_rate,
            input.price_includes_vat,
            input.is_active,
            input.available_from,
            input.available_until,
            input.auto_grant_duration_days,
            input.is_refundable,
            input.refund_period_days,
            input.content.kind().as_ref(),
            &content_json,
            now,
            now
        ],
    )
    .map_err(|e| conflict_on_unique(e, "A product with this slug already exists"))?;

    record_price_point(conn, &id, input.price_cents, input.sale_price_cents)?;

    Ok(Product {
        id,
        name: input.name.trim().to_string(),
        slug: slug.to_string(),
        description: input.description.clone(),
        price_cents: input.price_cents,
        currency,
        sale_price_cents: input.sale_price_cents,
        sale_price_until: input.sale_price_until,
        vat_rate: input.vat_rate,
        price_includes_vat: input.price_includes_vat,
        is_active: input.is_active,
        available_from: input.available_from,
        available_until: input.available_until,
        auto_grant_duration_days: input.auto_grant_duration_days,
        is_refundable: input.is_refundable,
        refund_period_days: input.refund_period_days,
        content: input.content.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn get_product_by_slug(conn: &Connection, slug: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE slug = ?1", PRODUCT_COLS),
        &[&slug],
    )
}

pub fn slug_exists(conn: &Connection, slug: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM products WHERE slug = ?1",
        params![slug],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_products(conn: &Connection, query: &ProductListQuery) -> Result<Vec<Product>> {
    let mut filter = Filter::new();
    match query.status.as_deref() {
        Some("active") => filter.eq("is_active", true),
        Some("inactive") => filter.eq("is_active", false),
        None | Some("all") => {}
        Some(_) => {
            return Err(AppError::validation(
                "status",
                "Status must be one of: active, inactive, all",
            ));
        }
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        filter.raw(
            "(name LIKE ? ESCAPE '\\' OR slug LIKE ? ESCAPE '\\')",
            like_pattern(search),
        );
    }
    filter.page(conn, PRODUCT_COLS, "products", "", &query.page())
}

/// Apply a PATCH. Writes a price history row when the price changes.
pub fn update_product(conn: &Connection, id: &str, input: &UpdateProduct) -> Result<bool> {
    let content_json = input
        .content
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let updated = UpdateBuilder::new("products", id)
        .with_updated_at()
        .set_opt("name", input.name.as_ref().map(|n| n.trim().to_string()))
        .set_opt("slug", input.slug.clone())
        .set_patch("description", input.description.clone())
        .set_opt("price_cents", input.price_cents)
        .set_opt("currency", input.currency.as_ref().map(|c| c.to_uppercase()))
        .set_patch("sale_price_cents", input.sale_price_cents)
        .set_patch("sale_price_until", input.sale_price_until)
        .set_patch("vat_rate", input.vat_rate)
        .set_opt("price_includes_vat", input.price_includes_vat)
        .set_opt("is_active", input.is_active)
        .set_patch("available_from", input.available_from)
        .set_patch("available_until", input.available_until)
        .set_patch("auto_grant_duration_days", input.auto_grant_duration_days)
        .set_opt("is_refundable", input.is_refundable)
        .set_patch("refund_period_days", input.refund_period_days)
        .set_opt(
            "content_delivery_type",
            input.content.as_ref().map(|c| c.kind().as_ref().to_string()),
        )
        .set_opt("content_config", content_json)
        .execute(conn)
        .map_err(|e| conflict_on_unique(e, "A product with this slug already exists"))?;

    if updated && input.changes_price() {
        if let Some(product) = get_product_by_id(conn, id)? {
            record_price_point(conn, id, product.price_cents, product.sale_price_cents)?;
        }
    }
    Ok(updated)
}

pub fn count_transactions_for_product(conn: &Connection, product_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM payment_transactions WHERE product_id = ?1 OR bump_product_id = ?1",
        params![product_id],
        |row| row.get(0),
    )?)
}

/// Delete a product that was never sold. Abandoned checkout sessions go with it.
pub fn delete_product(conn: &Connection, id: &str) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM checkout_sessions WHERE product_id = ?1",
        params![id],
    )?;
    let affected = tx.execute("DELETE FROM products WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(affected > 0)
}

pub fn count_active_products(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM products WHERE is_active = 1",
        [],
        |row| row.get(0),
    )?)
}

pub fn record_price_point(
    conn: &Connection,
    product_id: &str,
    price_cents: i64,
    sale_price_cents: Option<i64>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO price_history (id, product_id, price_cents, sale_price_cents, effective_from)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![gen_id(), product_id, price_cents, sale_price_cents, now()],
    )?;
    Ok(())
}

/// Price points in effect at any time since `since`: every row written after it,
/// plus the latest row written before it (the price that was current at `since`).
pub fn list_price_history(conn: &Connection, product_id: &str, since: i64) -> Result<Vec<PricePoint>> {
    query_all(
        conn,
        &format!(
            "SELECT {cols} FROM price_history
             WHERE product_id = ?1 AND (effective_from >= ?2 OR effective_from = (
                SELECT MAX(effective_from) FROM price_history WHERE product_id = ?1 AND effective_from < ?2))
             ORDER BY effective_from ASC, rowid ASC",
            cols = PRICE_POINT_COLS
        ),
        params![product_id, since],
    )
}

// ============ Order Bumps ============

pub fn create_order_bump(conn: &Connection, product_id: &str, input: &CreateOrderBump) -> Result<OrderBump> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO order_bumps (id, product_id, bump_product_id, bump_price_cents, title, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![&id, product_id, &input.bump_product_id, input.bump_price_cents, input.title.trim(), now],
    )
    .map_err(|e| conflict_on_unique(e, "This order bump already exists"))?;

    Ok(OrderBump {
        id,
        product_id: product_id.to_string(),
        bump_product_id: input.bump_product_id.clone(),
        bump_price_cents: input.bump_price_cents,
        title: input.title.trim().to_string(),
        is_active: true,
        created_at: now,
    })
}

pub fn list_order_bumps(conn: &Connection, product_id: &str) -> Result<Vec<OrderBump>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_bumps WHERE product_id = ?1 ORDER BY created_at ASC",
            ORDER_BUMP_COLS
        ),
        &[&product_id],
    )
}

pub fn get_active_order_bump(
    conn: &Connection,
    product_id: &str,
    bump_product_id: &str,
) -> Result<Option<OrderBump>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM order_bumps WHERE product_id = ?1 AND bump_product_id = ?2 AND is_active = 1",
            ORDER_BUMP_COLS
        ),
        &[&product_id, &bump_product_id],
    )
}

pub fn delete_order_bump(conn: &Connection, product_id: &str, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM order_bumps WHERE id = ?1 AND product_id = ?2",
        params![id, product_id],
    )?;
    Ok(affected > 0)
}

// ============ Coupons ============

pub fn create_coupon(conn: &Connection, input: &CreateCoupon) -> Result<Coupon> {
    let id = gen_id();
    let now = now();
    let code = normalize_coupon_code(&input.code);
    let currency = input.currency.as_ref().map(|c| c.to_uppercase());
    let emails: Vec<String> = input
        .allowed_emails
        .iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    conn.execute(
        "INSERT INTO coupons (id, code, name, discount_type, discount_value, currency, allowed_emails,
            allowed_product_ids, usage_limit_global, usage_limit_per_user, current_usage_count, expires_at,
            is_active, is_oto_coupon, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, 0, ?13, ?14)",
        params![
            &id,
            &code,
            &input.name,
            input.discount_type.as_ref(),
            input.discount_value,
            &currency,
            serde_json::to_string(&emails)?,
            serde_json::to_string(&input.allowed_product_ids)?,
            input.usage_limit_global,
            input.usage_limit_per_user,
            input.expires_at,
            input.is_active,
            now,
            now
        ],
    )
    .map_err(|e| conflict_on_unique(e, "A coupon with this code already exists"))?;

    Ok(Coupon {
        id,
        code,
        name: input.name.clone(),
        discount_type: input.discount_type,
        discount_value: input.discount_value,
        currency,
        allowed_emails: emails,
        allowed_product_ids: input.allowed_product_ids.clone(),
        usage_limit_global: input.usage_limit_global,
        usage_limit_per_user: input.usage_limit_per_user,
        current_usage_count: 0,
        expires_at: input.expires_at,
        is_active: input.is_active,
        is_oto_coupon: false,
        created_at: now,
        updated_at: now,
    })
}

/// Single-use coupon bound to one buyer and one product, issued by a one-time offer.
pub fn create_oto_coupon(
    conn: &Connection,
    offer: &OtoOffer,
    email: &str,
    currency: &str,
    expires_at: i64,
) -> Result<Coupon> {
    let id = gen_id();
    let now = now();
    let code = generate_token("OTO-", 5).to_uppercase();
    let emails = vec![email.trim().to_lowercase()];
    let products = vec![offer.oto_product_id.clone()];
    let currency = (offer.discount_type == DiscountType::Fixed).then(|| currency.to_uppercase());

    conn.execute(
        "INSERT INTO coupons (id, code, name, discount_type, discount_value, currency, allowed_emails,
            allowed_product_ids, usage_limit_global, usage_limit_per_user, current_usage_count, expires_at,
            is_active, is_oto_coupon, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, 1, 0, ?9, 1, 1, ?10, ?11)",
        params![
            &id,
            &code,
            "One-time offer",
            offer.discount_type.as_ref(),
            offer.discount_value,
            &currency,
            serde_json::to_string(&emails)?,
            serde_json::to_string(&products)?,
            expires_at,
            now,
            now
        ],
    )?;

    Ok(Coupon {
        id,
        code,
        name: Some("One-time offer".to_string()),
        discount_type: offer.discount_type,
        discount_value: offer.discount_value,
        currency,
        allowed_emails: emails,
        allowed_product_ids: products,
        usage_limit_global: Some(1),
        usage_limit_per_user: Some(1),
        current_usage_count: 0,
        expires_at: Some(expires_at),
        is_active: true,
        is_oto_coupon: true,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_coupon_by_id(conn: &Connection, id: &str) -> Result<Option<Coupon>> {
    query_one(
        conn,
        &format!("SELECT {} FROM coupons WHERE id = ?1", COUPON_COLS),
        &[&id],
    )
}

pub fn get_coupon_by_code(conn: &Connection, code: &str) -> Result<Option<Coupon>> {
    query_one(
        conn,
        &format!("SELECT {} FROM coupons WHERE code = ?1", COUPON_COLS),
        &[&normalize_coupon_code(code)],
    )
}

pub fn list_coupons(conn: &Connection, page: &CursorQuery) -> Result<Vec<Coupon>> {
    Filter::new().page(conn, COUPON_COLS, "coupons", "", page)
}

/// Only the whitelisted fields of `UpdateCoupon` can reach the database.
pub fn update_coupon(conn: &Connection, id: &str, input: &UpdateCoupon) -> Result<bool> {
    let emails = input
        .allowed_emails
        .as_ref()
        .map(|list| {
            let normalized: Vec<String> = list
                .iter()
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect();
            serde_json::to_string(&normalized)
        })
        .transpose()?;
    let products = input
        .allowed_product_ids
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    Ok(UpdateBuilder::new("coupons", id)
        .with_updated_at()
        .set_patch("name", input.name.clone())
        .set_opt("discount_type", input.discount_type.map(|t| t.as_ref().to_string()))
        .set_opt("discount_value", input.discount_value)
        .set_patch(
            "currency",
            input.currency.clone().map(|c| c.map(|c| c.to_uppercase())),
        )
        .set_opt("allowed_emails", emails)
        .set_opt("allowed_product_ids", products)
        .set_patch("usage_limit_global", input.usage_limit_global)
        .set_patch("usage_limit_per_user", input.usage_limit_per_user)
        .set_patch("expires_at", input.expires_at)
        .set_opt("is_active", input.is_active)
        .execute(conn)?)
}

pub fn delete_coupon(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM coupons WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

pub fn count_coupon_redemptions_by_email(conn: &Connection, coupon_id: &str, email: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM coupon_redemptions WHERE coupon_id = ?1 AND email = ?2",
        params![coupon_id, email.trim()],
        |row| row.get(0),
    )?)
}

/// Count a redemption. The global limit is re-checked in the UPDATE itself so
/// concurrent redemptions cannot push the counter past it; returns false when
/// the limit was already reached.
pub fn redeem_coupon(
    conn: &Connection,
    coupon_id: &str,
    email: &str,
    transaction_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE coupons SET current_usage_count = current_usage_count + 1, updated_at = ?1
         WHERE id = ?2 AND (usage_limit_global IS NULL OR current_usage_count < usage_limit_global)",
        params![now(), coupon_id],
    )?;
    if affected == 0 {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO coupon_redemptions (id, coupon_id, email, transaction_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![gen_id(), coupon_id, email.trim().to_lowercase(), transaction_id, now()],
    )?;
    Ok(true)
}

// ============ Checkout Sessions ============

/// Insert a pending session. Returns false when the idempotency key is taken.
pub fn insert_checkout_session(conn: &Connection, session: &CheckoutSession) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO checkout_sessions (id, idempotency_key, product_id, email, user_id, bump_product_id,
            coupon_code, subtotal_cents, discount_cents, total_cents, vat_cents, currency,
            provider_session_id, checkout_url, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(idempotency_key) DO NOTHING",
        params![
            &session.id,
            &session.idempotency_key,
            &session.product_id,
            &session.email,
            &session.user_id,
            &session.bump_product_id,
            &session.coupon_code,
            session.subtotal_cents,
            session.discount_cents,
            session.total_cents,
            session.vat_cents,
            &session.currency,
            &session.provider_session_id,
            &session.checkout_url,
            session.status.as_ref(),
            session.created_at
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_checkout_session_by_id(conn: &Connection, id: &str) -> Result<Option<CheckoutSession>> {
    query_one(
        conn,
        &format!("SELECT {} FROM checkout_sessions WHERE id = ?1", CHECKOUT_SESSION_COLS),
        &[&id],
    )
}

pub fn get_checkout_session_by_key(conn: &Connection, key: &str) -> Result<Option<CheckoutSession>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM checkout_sessions WHERE idempotency_key = ?1",
            CHECKOUT_SESSION_COLS
        ),
        &[&key],
    )
}

pub fn set_checkout_session_provider(
    conn: &Connection,
    id: &str,
    provider_session_id: &str,
    checkout_url: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE checkout_sessions SET provider_session_id = ?1, checkout_url = ?2 WHERE id = ?3",
        params![provider_session_id, checkout_url, id],
    )?;
    Ok(())
}

pub fn delete_checkout_session(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM checkout_sessions WHERE id = ?1", params![id])?;
    Ok(())
}

/// Atomically move a session from pending to completed. Only one caller wins.
pub fn try_complete_checkout_session(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE checkout_sessions SET status = 'completed' WHERE id = ?1 AND status = 'pending'",
        params![id],
    )?;
    Ok(affected > 0)
}

// ============ Payment Transactions ============

pub struct NewTransaction<'a> {
    pub session_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub email: &'a str,
    pub product_id: &'a str,
    pub bump_product_id: Option<&'a str>,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub vat_cents: i64,
    pub coupon_id: Option<&'a str>,
    pub stripe_payment_intent_id: Option<&'a str>,
}

pub fn create_transaction(conn: &Connection, input: &NewTransaction<'_>) -> Result<PaymentTransaction> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO payment_transactions (id, session_id, user_id, email, product_id, bump_product_id,
            amount_cents, currency, vat_cents, coupon_id, stripe_payment_intent_id, status,
            refunded_amount_cents, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'completed', 0, ?12, ?13)",
        params![
            &id,
            input.session_id,
            input.user_id,
            input.email,
            input.product_id,
            input.bump_product_id,
            input.amount_cents,
            input.currency,
            input.vat_cents,
            input.coupon_id,
            input.stripe_payment_intent_id,
            now,
            now
        ],
    )
    .map_err(|e| conflict_on_unique(e, "Checkout session already fulfilled"))?;

    Ok(PaymentTransaction {
        id,
        session_id: input.session_id.map(String::from),
        user_id: input.user_id.map(String::from),
        email: input.email.to_string(),
        product_id: input.product_id.to_string(),
        bump_product_id: input.bump_product_id.map(String::from),
        amount_cents: input.amount_cents,
        currency: input.currency.to_string(),
        vat_cents: input.vat_cents,
        coupon_id: input.coupon_id.map(String::from),
        stripe_payment_intent_id: input.stripe_payment_intent_id.map(String::from),
        status: TransactionStatus::Completed,
        refunded_amount_cents: 0,
        refunded_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_transaction_by_id(conn: &Connection, id: &str) -> Result<Option<PaymentTransaction>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payment_transactions WHERE id = ?1", TRANSACTION_COLS),
        &[&id],
    )
}

pub fn get_transaction_by_payment_intent(
    conn: &Connection,
    payment_intent_id: &str,
) -> Result<Option<PaymentTransaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_transactions WHERE stripe_payment_intent_id = ?1",
            TRANSACTION_COLS
        ),
        &[&payment_intent_id],
    )
}

pub fn list_transactions(conn: &Connection, query: &PaymentListQuery) -> Result<Vec<PaymentTransaction>> {
    let mut filter = Filter::new();
    if let Some(status) = query.status {
        filter.eq("status", status.as_ref().to_string());
    }
    if let Some(product_id) = &query.product_id {
        filter.eq("product_id", product_id.clone());
    }
    if let Some(email) = &query.email {
        filter.eq("email", email.trim().to_lowercase());
    }
    filter.page(conn, TRANSACTION_COLS, "payment_transactions", "", &query.page())
}

/// Add `amount` to the refunded total. The bound `refunded + amount <= amount_cents`
/// is part of the UPDATE, so two concurrent refunds cannot over-refund.
/// Remember a refund the processor accepted. False when it was already recorded.
pub fn record_refund(
    conn: &Connection,
    transaction_id: &str,
    provider_refund_id: &str,
    amount_cents: i64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO refunds (id, transaction_id, provider_refund_id, amount_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![gen_id(), transaction_id, provider_refund_id, amount_cents, now()],
    )?;
    Ok(inserted > 0)
}

pub fn sum_recorded_refunds(conn: &Connection, transaction_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM refunds WHERE transaction_id = ?1",
        [transaction_id],
        |row| row.get(0),
    )?)
}

/// Raise the refunded total to `total` (capped at the charged amount).
/// Never lowers it, so replays and out-of-order reports are harmless.
/// Returns false when the ledger already covered `total`.
pub fn raise_refunded_amount(conn: &Connection, id: &str, total: i64) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE payment_transactions SET
            refunded_amount_cents = MIN(amount_cents, ?1),
            status = CASE WHEN ?1 >= amount_cents THEN 'refunded' ELSE 'partially_refunded' END,
            refunded_at = ?2,
            updated_at = ?2
         WHERE id = ?3 AND MIN(amount_cents, ?1) > refunded_amount_cents",
        params![total, now, id],
    )?;
    Ok(affected > 0)
}

// ============ Product Access ============

/// Insert or replace the access row for (user, product).
pub fn upsert_access(
    conn: &Connection,
    user_id: &str,
    product_id: &str,
    expires_at: Option<i64>,
    transaction_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO user_product_access (id, user_id, product_id, access_granted_at, access_expires_at, transaction_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id, product_id) DO UPDATE SET
            access_expires_at = excluded.access_expires_at,
            transaction_id = COALESCE(excluded.transaction_id, user_product_access.transaction_id)",
        params![gen_id(), user_id, product_id, now(), expires_at, transaction_id],
    )?;
    Ok(())
}

pub fn get_access(conn: &Connection, user_id: &str, product_id: &str) -> Result<Option<UserAccess>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM user_product_access a JOIN products p ON p.id = a.product_id
             WHERE a.user_id = ?1 AND a.product_id = ?2",
            USER_ACCESS_COLS
        ),
        &[&user_id, &product_id],
    )
}

pub fn list_user_access(conn: &Connection, user_id: &str) -> Result<Vec<UserAccess>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM user_product_access a JOIN products p ON p.id = a.product_id
             WHERE a.user_id = ?1 ORDER BY a.access_granted_at DESC",
            USER_ACCESS_COLS
        ),
        &[&user_id],
    )
}

pub fn revoke_access(conn: &Connection, user_id: &str, product_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM user_product_access WHERE user_id = ?1 AND product_id = ?2",
        params![user_id, product_id],
    )?;
    Ok(affected > 0)
}

/// Whether the owner of `email` holds unexpired access to the product.
pub fn has_active_access_by_email(
    conn: &Connection,
    email: &str,
    product_id: &str,
    now: i64,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_product_access a JOIN users u ON u.id = a.user_id
         WHERE u.email = ?1 AND a.product_id = ?2
           AND (a.access_expires_at IS NULL OR a.access_expires_at > ?3)",
        params![email.trim(), product_id, now],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ============ Refund Requests ============

pub fn create_refund_request(
    conn: &Connection,
    transaction_id: &str,
    user_id: &str,
    reason: Option<&str>,
) -> Result<RefundRequest> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO refund_requests (id, transaction_id, user_id, reason, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
        params![&id, transaction_id, user_id, reason, now],
    )?;
    Ok(RefundRequest {
        id,
        transaction_id: transaction_id.to_string(),
        user_id: user_id.to_string(),
        reason: reason.map(String::from),
        status: RefundRequestStatus::Pending,
        admin_response: None,
        processed_by: None,
        processed_at: None,
        created_at: now,
    })
}

pub fn get_refund_request_by_id(conn: &Connection, id: &str) -> Result<Option<RefundRequest>> {
    query_one(
        conn,
        &format!("SELECT {} FROM refund_requests WHERE id = ?1", REFUND_REQUEST_COLS),
        &[&id],
    )
}

pub fn has_pending_refund_request(conn: &Connection, transaction_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM refund_requests WHERE transaction_id = ?1 AND status = 'pending'",
        params![transaction_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// List refund requests; `user_id` restricts to one requester.
pub fn list_refund_requests(
    conn: &Connection,
    query: &RefundRequestListQuery,
    user_id: Option<&str>,
) -> Result<Vec<RefundRequest>> {
    let mut filter = Filter::new();
    if let Some(status) = query.status {
        filter.eq("status", status.as_ref().to_string());
    }
    if let Some(user_id) = user_id {
        filter.eq("user_id", user_id.to_string());
    }
    filter.page(conn, REFUND_REQUEST_COLS, "refund_requests", "", &query.page())
}

/// Move a pending request to `status`. Only one admin can process a request.
pub fn try_process_refund_request(
    conn: &Connection,
    id: &str,
    status: RefundRequestStatus,
    admin_id: &str,
    admin_response: Option<&str>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE refund_requests SET status = ?1, processed_by = ?2, admin_response = ?3, processed_at = ?4
         WHERE id = ?5 AND status = 'pending'",
        params![status.as_ref(), admin_id, admin_response, now(), id],
    )?;
    Ok(affected > 0)
}

/// Put an approved request back to pending after the processor refused the refund.
pub fn revert_refund_request(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE refund_requests SET status = 'pending', processed_by = NULL, admin_response = NULL,
            processed_at = NULL
         WHERE id = ?1 AND status = 'approved'",
        params![id],
    )?;
    Ok(())
}

pub fn count_pending_refund_requests(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM refund_requests WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )?)
}

// ============ Webhook Endpoints ============

pub fn create_webhook_endpoint(
    conn: &Connection,
    input: &CreateWebhookEndpoint,
    secret_encrypted: &[u8],
) -> Result<WebhookEndpoint> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO webhook_endpoints (id, url, description, events, secret_encrypted, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            input.url.trim(),
            &input.description,
            serde_json::to_string(&input.events)?,
            secret_encrypted,
            input.is_active,
            now,
            now
        ],
    )?;
    Ok(WebhookEndpoint {
        id,
        url: input.url.trim().to_string(),
        description: input.description.clone(),
        events: input.events.clone(),
        secret_encrypted: secret_encrypted.to_vec(),
        is_active: input.is_active,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_webhook_endpoint_by_id(conn: &Connection, id: &str) -> Result<Option<WebhookEndpoint>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webhook_endpoints WHERE id = ?1", WEBHOOK_ENDPOINT_COLS),
        &[&id],
    )
}

pub fn list_webhook_endpoints(conn: &Connection, page: &CursorQuery) -> Result<Vec<WebhookEndpoint>> {
    Filter::new().page(conn, WEBHOOK_ENDPOINT_COLS, "webhook_endpoints", "", page)
}

/// Active endpoints subscribed to `event`.
pub fn list_endpoints_for_event(conn: &Connection, event: WebhookEvent) -> Result<Vec<WebhookEndpoint>> {
    let endpoints: Vec<WebhookEndpoint> = query_all(
        conn,
        &format!(
            "SELECT {} FROM webhook_endpoints WHERE is_active = 1 ORDER BY created_at ASC",
            WEBHOOK_ENDPOINT_COLS
        ),
        [],
    )?;
    Ok(endpoints
        .into_iter()
        .filter(|e| e.subscribes_to(event))
        .collect())
}

pub fn update_webhook_endpoint(conn: &Connection, id: &str, input: &UpdateWebhookEndpoint) -> Result<bool> {
    let events = input
        .events
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    Ok(UpdateBuilder::new("webhook_endpoints", id)
        .with_updated_at()
        .set_opt("url", input.url.as_ref().map(|u| u.trim().to_string()))
        .set_patch("description", input.description.clone())
        .set_opt("events", events)
        .set_opt("is_active", input.is_active)
        .execute(conn)?)
}

pub fn delete_webhook_endpoint(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM webhook_endpoints WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

// ============ Webhook Logs ============

pub struct NewWebhookLog<'a> {
    pub endpoint_id: &'a str,
    pub event_type: &'a str,
    pub payload: &'a serde_json::Value,
    pub status: WebhookLogStatus,
    pub http_status: Option<i64>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
}

pub fn create_webhook_log(conn: &Connection, input: NewWebhookLog<'_>) -> Result<WebhookLog> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO webhook_logs (id, endpoint_id, event_type, payload, status, http_status, response_body,
            error_message, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            input.endpoint_id,
            input.event_type,
            input.payload.to_string(),
            input.status.as_ref(),
            input.http_status,
            &input.response_body,
            &input.error_message,
            input.duration_ms,
            now
        ],
    )?;
    Ok(WebhookLog {
        id,
        endpoint_id: input.endpoint_id.to_string(),
        event_type: input.event_type.to_string(),
        payload: input.payload.clone(),
        status: input.status,
        http_status: input.http_status,
        response_body: input.response_body,
        error_message: input.error_message,
        duration_ms: input.duration_ms,
        created_at: now,
    })
}

pub fn get_webhook_log_by_id(conn: &Connection, id: &str) -> Result<Option<WebhookLog>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webhook_logs WHERE id = ?1", WEBHOOK_LOG_COLS),
        &[&id],
    )
}

pub fn list_webhook_logs(conn: &Connection, query: &WebhookLogListQuery) -> Result<Vec<WebhookLog>> {
    let mut filter = Filter::new();
    if let Some(endpoint_id) = &query.endpoint_id {
        filter.eq("endpoint_id", endpoint_id.clone());
    }
    if let Some(status) = query.status {
        filter.eq("status", status.as_ref().to_string());
    }
    filter.page(conn, WEBHOOK_LOG_COLS, "webhook_logs", "", &query.page())
}

/// Claim a failed log for retry. Only one caller can move it to `retried`.
pub fn try_mark_webhook_log_retried(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE webhook_logs SET status = 'retried' WHERE id = ?1 AND status = 'failed'",
        params![id],
    )?;
    Ok(affected > 0)
}

/// Undo a retry claim when the new attempt could not be recorded.
pub fn unmark_webhook_log_retried(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE webhook_logs SET status = 'failed' WHERE id = ?1 AND status = 'retried'",
        params![id],
    )?;
    Ok(())
}

pub fn purge_webhook_logs(conn: &Connection, older_than: i64) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM webhook_logs WHERE created_at < ?1",
        params![older_than],
    )?)
}

// ============ One-Time Offers ============

pub fn create_oto_offer(conn: &Connection, input: &CreateOtoOffer) -> Result<OtoOffer> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO oto_offers (id, source_product_id, oto_product_id, discount_type, discount_value,
            duration_minutes, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
        params![
            &id,
            &input.source_product_id,
            &input.oto_product_id,
            input.discount_type.as_ref(),
            input.discount_value,
            input.duration_minutes,
            now
        ],
    )?;
    Ok(OtoOffer {
        id,
        source_product_id: input.source_product_id.clone(),
        oto_product_id: input.oto_product_id.clone(),
        discount_type: input.discount_type,
        discount_value: input.discount_value,
        duration_minutes: input.duration_minutes,
        is_active: true,
        created_at: now,
    })
}

pub fn get_oto_offer_by_id(conn: &Connection, id: &str) -> Result<Option<OtoOffer>> {
    query_one(
        conn,
        &format!("SELECT {} FROM oto_offers WHERE id = ?1", OTO_OFFER_COLS),
        &[&id],
    )
}

pub fn list_oto_offers(conn: &Connection) -> Result<Vec<OtoOffer>> {
    query_all(
        conn,
        &format!("SELECT {} FROM oto_offers ORDER BY created_at DESC", OTO_OFFER_COLS),
        [],
    )
}

/// The newest active offer attached to a product.
pub fn get_active_oto_offer_for_product(conn: &Connection, product_id: &str) -> Result<Option<OtoOffer>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM oto_offers WHERE source_product_id = ?1 AND is_active = 1
             ORDER BY created_at DESC LIMIT 1",
            OTO_OFFER_COLS
        ),
        &[&product_id],
    )
}

pub fn delete_oto_offer(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM oto_offers WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

pub fn create_oto_grant(
    conn: &Connection,
    offer_id: &str,
    session_id: &str,
    email: &str,
    coupon_id: &str,
    expires_at: i64,
) -> Result<OtoGrant> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO oto_grants (id, offer_id, session_id, email, coupon_id, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, offer_id, session_id, email, coupon_id, expires_at, now],
    )?;
    Ok(OtoGrant {
        id,
        offer_id: offer_id.to_string(),
        session_id: session_id.to_string(),
        email: email.to_string(),
        coupon_id: coupon_id.to_string(),
        expires_at,
        created_at: now,
    })
}

pub fn get_oto_grant_by_session(conn: &Connection, session_id: &str) -> Result<Option<OtoGrant>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM oto_grants WHERE session_id = ?1 ORDER BY created_at DESC LIMIT 1",
            OTO_GRANT_COLS
        ),
        &[&session_id],
    )
}

// ============ Stripe Events ============

/// Record an incoming event id. Returns false if it was already processed.
pub fn try_record_stripe_event(conn: &Connection, event_id: &str, event_type: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO processed_stripe_events (id, event_id, event_type, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![gen_id(), event_id, event_type, now()],
    )?;
    Ok(affected > 0)
}

/// Forget an event whose processing failed so Stripe's redelivery is handled.
pub fn forget_stripe_event(conn: &Connection, event_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM processed_stripe_events WHERE event_id = ?1",
        params![event_id],
    )?;
    Ok(())
}

// ============ Analytics ============

pub fn dashboard_totals(conn: &Connection, today_start: i64) -> Result<Vec<CurrencyTotals>> {
    let mut stmt = conn.prepare(
        "SELECT currency,
                COALESCE(SUM(amount_cents - refunded_amount_cents), 0),
                COALESCE(SUM(refunded_amount_cents), 0),
                COUNT(*),
                COALESCE(SUM(CASE WHEN created_at >= ?1 THEN amount_cents - refunded_amount_cents ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN created_at >= ?1 THEN 1 ELSE 0 END), 0)
         FROM payment_transactions
         GROUP BY currency
         ORDER BY currency",
    )?;
    let totals = stmt
        .query_map(params![today_start], |row| {
            Ok(CurrencyTotals {
                currency: row.get(0)?,
                revenue_cents: row.get(1)?,
                refunded_cents: row.get(2)?,
                orders: row.get(3)?,
                today_revenue_cents: row.get(4)?,
                today_orders: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(totals)
}

/// Net revenue per UTC day and currency in `[from, to)`.
pub fn revenue_by_day(
    conn: &Connection,
    from: i64,
    to: i64,
    product_id: Option<&str>,
) -> Result<Vec<RevenuePoint>> {
    let mut stmt = conn.prepare(
        "SELECT date(created_at, 'unixepoch') AS day, currency,
                COALESCE(SUM(amount_cents - refunded_amount_cents), 0), COUNT(*)
         FROM payment_transactions
         WHERE created_at >= ?1 AND created_at < ?2 AND (?3 IS NULL OR product_id = ?3)
         GROUP BY day, currency
         ORDER BY day ASC, currency ASC",
    )?;
    let points = stmt
        .query_map(params![from, to, product_id], |row| {
            Ok(RevenuePoint {
                date: row.get(0)?,
                currency: row.get(1)?,
                revenue_cents: row.get(2)?,
                orders: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(points)
}

// ============ Audit Logs ============

#[allow(clippy::too_many_arguments)]
pub fn create_audit_log(
    conn: &Connection,
    user_id: Option<&str>,
    action: AuditAction,
    resource_type: &str,
    resource_id: &str,
    details: Option<&serde_json::Value>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_logs (id, created_at, user_id, action, resource_type, resource_id, details,
            ip_address, user_agent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            gen_id(),
            now(),
            user_id,
            action.as_ref(),
            resource_type,
            resource_id,
            details.map(|d| d.to_string()),
            ip_address,
            user_agent
        ],
    )?;
    Ok(())
}

pub fn list_audit_logs(conn: &Connection, query: &AuditLogListQuery) -> Result<Vec<AuditLog>> {
    let mut filter = Filter::new();
    if let Some(user_id) = &query.user_id {
        filter.eq("user_id", user_id.clone());
    }
    if let Some(action) = &query.action {
        filter.eq("action", action.clone());
    }
    if let Some(resource_type) = &query.resource_type {
        filter.eq("resource_type", resource_type.clone());
    }
    if let Some(resource_id) = &query.resource_id {
        filter.eq("resource_id", resource_id.clone());
    }
    filter.page(conn, AUDIT_LOG_COLS, "audit_logs", "", &query.page())
}
