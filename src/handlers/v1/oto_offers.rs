use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::json;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::ApiContext;
use crate::models::{ApiScope, AuditAction, CreateOtoOffer, OtoOffer};
use crate::openapi::ErrorBody;
use crate::util::AuditLogBuilder;

#[utoipa::path(
    get,
    path = "/api/v1/oto-offers",
    responses((status = 200, description = "All one-time offers", body = [OtoOffer])),
    security(("api_key" = []))
)]
pub async fn list_oto_offers(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
) -> Result<Json<Vec<OtoOffer>>> {
    ctx.require_admin(ApiScope::ProductsRead)?;
    let conn = state.db.get()?;
    Ok(Json(queries::list_oto_offers(&conn)?))
}

#[utoipa::path(
    post,
    path = "/api/v1/oto-offers",
    request_body = CreateOtoOffer,
    responses(
        (status = 201, description = "Offer created", body = OtoOffer),
        (status = 400, description = "Validation failed", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn create_oto_offer(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    headers: HeaderMap,
    Json(input): Json<CreateOtoOffer>,
) -> Result<(StatusCode, Json<OtoOffer>)> {
    ctx.require_admin(ApiScope::ProductsWrite)?;
    input.validate()?;

    let conn = state.db.get()?;
    let source = queries::get_product_by_id(&conn, &input.source_product_id)?
        .ok_or_else(|| AppError::validation("source_product_id", "Product not found"))?;
    let target = queries::get_product_by_id(&conn, &input.oto_product_id)?
        .ok_or_else(|| AppError::validation("oto_product_id", "Product not found"))?;
    if target.is_free() {
        return Err(AppError::validation("oto_product_id", "Offer product cannot be free"));
    }

    let offer = queries::create_oto_offer(&conn, &input)?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::CreateOtoOffer)
        .resource("oto_offer", &offer.id)
        .details(&json!({
            "source_product_id": source.id,
            "oto_product_id": target.id,
            "duration_minutes": offer.duration_minutes,
        }))
        .save()?;

    Ok((StatusCode::CREATED, Json(offer)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/oto-offers/{id}",
    params(("id" = String, Path, description = "Offer id")),
    responses(
        (status = 200, description = "Offer deleted"),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn delete_oto_offer(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin(ApiScope::ProductsWrite)?;
    let conn = state.db.get()?;
    if !queries::delete_oto_offer(&conn, &id)? {
        return Err(AppError::NotFound("Offer not found".into()));
    }

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::DeleteOtoOffer)
        .resource("oto_offer", &id)
        .save()?;

    Ok(Json(json!({ "deleted": true })))
}
