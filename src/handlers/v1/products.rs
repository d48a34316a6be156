use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::jwt::issue_download_token;
use crate::middleware::ApiContext;
use crate::models::{
    ApiScope, AuditAction, ContentDelivery, CreateOrderBump, CreateProduct, OrderBump, PricePoint,
    Product, ProductListQuery, UpdateProduct,
};
use crate::openapi::ErrorBody;
use crate::pagination::Paginated;
use crate::pricing::MAX_AMOUNT_CENTS;
use crate::services::access::has_access;
use crate::util::{AuditLogBuilder, is_valid_slug, slugify};

#[derive(Debug, Deserialize)]
pub struct OrderBumpPath {
    pub id: String,
    pub bump_id: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PriceHistoryQuery {
    /// Unix seconds; defaults to the full history
    #[serde(default)]
    pub since: Option<i64>,
}

/// Delivery details for a product the caller has access to.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProductContent {
    pub product_id: String,
    pub content: ContentDelivery,
    /// Set for downloads: the signed link expires shortly after issue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// Pick a free slug, appending `-2`, `-3`, ... to the base when taken.
fn unique_slug(conn: &rusqlite::Connection, base: &str) -> Result<String> {
    if !queries::slug_exists(conn, base)? {
        return Ok(base.to_string());
    }
    for n in 2..1000 {
        let candidate = format!("{}-{}", base, n);
        if !queries::slug_exists(conn, &candidate)? {
            return Ok(candidate);
        }
    }
    Err(AppError::Conflict("Could not find a free slug".into()))
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(
        ("cursor" = Option<String>, Query, description = "Pagination cursor"),
        ("limit" = Option<i64>, Query, description = "Page size (1-100)"),
        ("status" = Option<String>, Query, description = "active | inactive | all"),
        ("search" = Option<String>, Query, description = "Substring of name or slug"),
    ),
    responses(
        (status = 200, description = "Paginated products (`data` + `pagination`)", body = [Product]),
        (status = 401, description = "Missing or invalid API key", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn list_products(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<Paginated<Product>>> {
    ctx.require_admin(ApiScope::ProductsRead)?;
    let conn = state.db.get()?;
    let rows = queries::list_products(&conn, &query)?;
    Ok(Json(Paginated::from_rows(rows, &query.page())))
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProduct,
    responses(
        (status = 201, description = "Product created", body = Product),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 409, description = "Slug already taken", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn create_product(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    headers: HeaderMap,
    Json(input): Json<CreateProduct>,
) -> Result<(StatusCode, Json<Product>)> {
    ctx.require_admin(ApiScope::ProductsWrite)?;
    input.validate()?;

    let conn = state.db.get()?;
    let slug = match &input.slug {
        Some(slug) => slug.clone(),
        None => {
            let base = slugify(&input.name);
            if !is_valid_slug(&base) {
                return Err(AppError::validation(
                    "slug",
                    "Could not derive a slug from the name, please provide one",
                ));
            }
            unique_slug(&conn, &base)?
        }
    };
    let product = queries::create_product(&conn, &input, &slug)?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::CreateProduct)
        .resource("product", &product.id)
        .details(&json!({ "name": product.name, "slug": product.slug, "price_cents": product.price_cents }))
        .save()?;

    tracing::info!("Product created: id={}, slug={}", product.id, product.slug);
    Ok((StatusCode::CREATED, Json(product)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = String, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = Product),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn get_product(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Product>> {
    ctx.require_admin(ApiScope::ProductsRead)?;
    let conn = state.db.get()?;
    let product = queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    Ok(Json(product))
}

#[utoipa::path(
    patch,
    path = "/api/v1/products/{id}",
    params(("id" = String, Path, description = "Product id")),
    request_body = UpdateProduct,
    responses(
        (status = 200, description = "Updated product", body = Product),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn update_product(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<UpdateProduct>,
) -> Result<Json<Product>> {
    ctx.require_admin(ApiScope::ProductsWrite)?;
    let conn = state.db.get()?;

    let existing = queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    input.validate(&existing)?;
    queries::update_product(&conn, &id, &input)?;

    let product = queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::UpdateProduct)
        .resource("product", &id)
        .details(&json!({
            "price_changed": input.changes_price(),
            "price_cents": product.price_cents,
            "sale_price_cents": product.sale_price_cents,
        }))
        .save()?;

    Ok(Json(product))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    params(("id" = String, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product deleted"),
        (status = 404, description = "Not found", body = ErrorBody),
        (status = 409, description = "Product has payments", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn delete_product(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin(ApiScope::ProductsWrite)?;
    let conn = state.db.get()?;

    let existing = queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    if queries::count_transactions_for_product(&conn, &id)? > 0 {
        return Err(AppError::rule(
            StatusCode::CONFLICT,
            "PRODUCT_HAS_TRANSACTIONS",
            "Products with payments cannot be deleted, deactivate it instead",
        ));
    }
    queries::delete_product(&conn, &id)?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::DeleteProduct)
        .resource("product", &id)
        .details(&json!({ "name": existing.name, "slug": existing.slug }))
        .save()?;

    Ok(Json(json!({ "deleted": true })))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/price-history",
    params(("id" = String, Path, description = "Product id"), PriceHistoryQuery),
    responses((status = 200, description = "Price points, oldest first", body = [PricePoint])),
    security(("api_key" = []))
)]
pub async fn get_price_history(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    Query(query): Query<PriceHistoryQuery>,
) -> Result<Json<Vec<PricePoint>>> {
    ctx.require_admin(ApiScope::ProductsRead)?;
    let conn = state.db.get()?;
    queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    Ok(Json(queries::list_price_history(&conn, &id, query.since.unwrap_or(0))?))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/order-bumps",
    params(("id" = String, Path, description = "Product id")),
    responses((status = 200, description = "Order bumps of the product", body = [OrderBump])),
    security(("api_key" = []))
)]
pub async fn list_order_bumps(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OrderBump>>> {
    ctx.require_admin(ApiScope::ProductsRead)?;
    let conn = state.db.get()?;
    Ok(Json(queries::list_order_bumps(&conn, &id)?))
}

#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/order-bumps",
    params(("id" = String, Path, description = "Product id")),
    request_body = CreateOrderBump,
    responses(
        (status = 201, description = "Order bump created", body = OrderBump),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 409, description = "Bump already exists", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn create_order_bump(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<CreateOrderBump>,
) -> Result<(StatusCode, Json<OrderBump>)> {
    ctx.require_admin(ApiScope::ProductsWrite)?;
    if input.title.trim().is_empty() {
        return Err(AppError::validation("title", "Title is required"));
    }
    if input.bump_product_id == id {
        return Err(AppError::validation("bump_product_id", "A product cannot bump itself"));
    }
    if input.bump_price_cents.is_some_and(|p| p < 0) {
        return Err(AppError::validation("bump_price_cents", "Price cannot be negative"));
    }
    if input.bump_price_cents.is_some_and(|p| p > MAX_AMOUNT_CENTS) {
        return Err(AppError::validation(
            "bump_price_cents",
            format!("Price cannot exceed {} cents", MAX_AMOUNT_CENTS),
        ));
    }

    let conn = state.db.get()?;
    let product = queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    let bump_product = queries::get_product_by_id(&conn, &input.bump_product_id)?
        .ok_or_else(|| AppError::validation("bump_product_id", "Bump product not found"))?;
    if bump_product.currency != product.currency {
        return Err(AppError::validation(
            "bump_product_id",
            "Bump product must use the same currency",
        ));
    }

    let bump = queries::create_order_bump(&conn, &id, &input)?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::CreateOrderBump)
        .resource("order_bump", &bump.id)
        .details(&json!({ "product_id": id, "bump_product_id": bump.bump_product_id }))
        .save()?;

    Ok((StatusCode::CREATED, Json(bump)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}/order-bumps/{bump_id}",
    params(
        ("id" = String, Path, description = "Product id"),
        ("bump_id" = String, Path, description = "Order bump id"),
    ),
    responses(
        (status = 200, description = "Order bump deleted"),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn delete_order_bump(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(path): Path<OrderBumpPath>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin(ApiScope::ProductsWrite)?;
    let conn = state.db.get()?;
    if !queries::delete_order_bump(&conn, &path.id, &path.bump_id)? {
        return Err(AppError::NotFound("Order bump not found".into()));
    }

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::DeleteOrderBump)
        .resource("order_bump", &path.bump_id)
        .details(&json!({ "product_id": path.id }))
        .save()?;

    Ok(Json(json!({ "deleted": true })))
}

/// What the caller receives for a product they own. Download URLs are never
/// returned directly, only as a short-lived signed link.
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/content",
    params(("id" = String, Path, description = "Product id")),
    responses(
        (status = 200, description = "Delivery details", body = ProductContent),
        (status = 403, description = "No access to this product", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn get_product_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<ProductContent>> {
    ctx.require(ApiScope::ProductsRead)?;
    let conn = state.db.get()?;
    let now = chrono::Utc::now().timestamp();

    let product = queries::get_product_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    if !ctx.is_admin() && !has_access(&conn, &ctx.user.id, &product.id, now)? {
        return Err(AppError::Forbidden("You do not have access to this product".into()));
    }

    let (content, download_url) = match product.content {
        ContentDelivery::Download { filename, .. } => {
            let token = issue_download_token(&state.master_key, &product.id, &ctx.user.id)?;
            let link = format!(
                "{}/api/public/downloads/{}",
                state.base_url.trim_end_matches('/'),
                token
            );
            (
                ContentDelivery::Download {
                    url: link.clone(),
                    filename,
                },
                Some(link),
            )
        }
        other => (other, None),
    };

    Ok(Json(ProductContent {
        product_id: product.id,
        content,
        download_url,
    }))
}
