use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::json;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::middleware::ApiContext;
use crate::models::{ApiScope, AuditAction, Coupon, CreateCoupon, UpdateCoupon};
use crate::openapi::ErrorBody;
use crate::pagination::{CursorQuery, Paginated};
use crate::util::AuditLogBuilder;

#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    params(
        ("cursor" = Option<String>, Query, description = "Pagination cursor"),
        ("limit" = Option<i64>, Query, description = "Page size (1-100)"),
    ),
    responses((status = 200, description = "Paginated coupons (`data` + `pagination`)", body = [Coupon])),
    security(("api_key" = []))
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(page): Query<CursorQuery>,
) -> Result<Json<Paginated<Coupon>>> {
    ctx.require_admin(ApiScope::CouponsRead)?;
    let conn = state.db.get()?;
    let rows = queries::list_coupons(&conn, &page)?;
    Ok(Json(Paginated::from_rows(rows, &page)))
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = CreateCoupon,
    responses(
        (status = 201, description = "Coupon created", body = Coupon),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 409, description = "Code already exists", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    headers: HeaderMap,
    Json(input): Json<CreateCoupon>,
) -> Result<(StatusCode, Json<Coupon>)> {
    ctx.require_admin(ApiScope::CouponsWrite)?;
    input.validate()?;

    let conn = state.db.get()?;
    let coupon = queries::create_coupon(&conn, &input)?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::CreateCoupon)
        .resource("coupon", &coupon.id)
        .details(&json!({
            "code": coupon.code,
            "discount_type": coupon.discount_type,
            "discount_value": coupon.discount_value,
        }))
        .save()?;

    Ok((StatusCode::CREATED, Json(coupon)))
}

#[utoipa::path(
    get,
    path = "/api/v1/coupons/{id}",
    params(("id" = String, Path, description = "Coupon id")),
    responses(
        (status = 200, description = "Coupon", body = Coupon),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Coupon>> {
    ctx.require_admin(ApiScope::CouponsRead)?;
    let conn = state.db.get()?;
    let coupon = queries::get_coupon_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Coupon not found".into()))?;
    Ok(Json(coupon))
}

/// Partial update. Only the fields of [`UpdateCoupon`] are writable; usage
/// counters in the body are ignored.
#[utoipa::path(
    patch,
    path = "/api/v1/coupons/{id}",
    params(("id" = String, Path, description = "Coupon id")),
    request_body = UpdateCoupon,
    responses(
        (status = 200, description = "Updated coupon", body = Coupon),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<UpdateCoupon>,
) -> Result<Json<Coupon>> {
    ctx.require_admin(ApiScope::CouponsWrite)?;
    let conn = state.db.get()?;

    let existing = queries::get_coupon_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Coupon not found".into()))?;
    input.validate(&existing)?;
    queries::update_coupon(&conn, &id, &input)?;

    let coupon = queries::get_coupon_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Coupon not found".into()))?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::UpdateCoupon)
        .resource("coupon", &id)
        .details(&json!({ "code": coupon.code, "is_active": coupon.is_active }))
        .save()?;

    Ok(Json(coupon))
}

#[utoipa::path(
    delete,
    path = "/api/v1/coupons/{id}",
    params(("id" = String, Path, description = "Coupon id")),
    responses(
        (status = 200, description = "Coupon deleted"),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin(ApiScope::CouponsWrite)?;
    let conn = state.db.get()?;

    let existing = queries::get_coupon_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Coupon not found".into()))?;
    queries::delete_coupon(&conn, &id)?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::DeleteCoupon)
        .resource("coupon", &id)
        .details(&json!({ "code": existing.code }))
        .save()?;

    Ok(Json(json!({ "deleted": true })))
}
