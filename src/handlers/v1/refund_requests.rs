use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::json;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::middleware::ApiContext;
use crate::models::{
    ApiScope, AuditAction, CreateRefundRequest, ProcessRefundRequest, RefundRequest,
    RefundRequestListQuery, RefundRequestOutcome,
};
use crate::openapi::ErrorBody;
use crate::pagination::Paginated;
use crate::services::refunds;
use crate::util::AuditLogBuilder;

/// Admins see every request; other callers only their own.
#[utoipa::path(
    get,
    path = "/api/v1/refund-requests",
    params(
        ("cursor" = Option<String>, Query, description = "Pagination cursor"),
        ("limit" = Option<i64>, Query, description = "Page size (1-100)"),
        ("status" = Option<String>, Query, description = "pending | approved | rejected"),
    ),
    responses(
        (status = 200, description = "Paginated refund requests (`data` + `pagination`)", body = [RefundRequest]),
    ),
    security(("api_key" = []))
)]
pub async fn list_refund_requests(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(query): Query<RefundRequestListQuery>,
) -> Result<Json<Paginated<RefundRequest>>> {
    ctx.require(ApiScope::PaymentsRead)?;
    let conn = state.db.get()?;
    let owner = (!ctx.is_admin()).then_some(ctx.user.id.as_str());
    let rows = queries::list_refund_requests(&conn, &query, owner)?;
    Ok(Json(Paginated::from_rows(rows, &query.page())))
}

#[utoipa::path(
    post,
    path = "/api/v1/refund-requests",
    request_body = CreateRefundRequest,
    responses(
        (status = 201, description = "Refund requested", body = RefundRequest),
        (status = 400, description = "Not refundable or refund period over", body = ErrorBody),
        (status = 404, description = "Payment not found", body = ErrorBody),
        (status = 409, description = "Already refunded or a request is pending", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn create_refund_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Json(input): Json<CreateRefundRequest>,
) -> Result<(StatusCode, Json<RefundRequest>)> {
    ctx.require(ApiScope::PaymentsWrite)?;
    let conn = state.db.get()?;
    let request = refunds::create_refund_request(&conn, &ctx.user, &input)?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[utoipa::path(
    post,
    path = "/api/v1/refund-requests/{id}/approve",
    params(("id" = String, Path, description = "Refund request id")),
    request_body = ProcessRefundRequest,
    responses(
        (status = 200, description = "Request approved and refund issued", body = RefundRequestOutcome),
        (status = 409, description = "Request already processed", body = ErrorBody),
        (status = 502, description = "Payment processor error", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn approve_refund_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<ProcessRefundRequest>,
) -> Result<Json<RefundRequestOutcome>> {
    ctx.require_admin(ApiScope::PaymentsWrite)?;
    let outcome =
        refunds::approve_refund_request(&state, &id, &ctx.user, input.admin_response.as_deref())
            .await?;

    // The money has moved; an audit failure is logged, not returned
    let audited = state.db.get().map_err(AppError::from).and_then(|conn| {
        AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
            .actor(&ctx.user.id)
            .action(AuditAction::ApproveRefundRequest)
            .resource("refund_request", &id)
            .details(&json!({
                "transaction_id": outcome.request.transaction_id,
                "warnings": outcome.warnings,
            }))
            .save()
    });
    if let Err(e) = audited {
        tracing::error!("Refund request {} approved but audit log failed: {}", id, e);
    }

    Ok(Json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/v1/refund-requests/{id}/reject",
    params(("id" = String, Path, description = "Refund request id")),
    request_body = ProcessRefundRequest,
    responses(
        (status = 200, description = "Request rejected", body = RefundRequest),
        (status = 409, description = "Request already processed", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn reject_refund_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<ProcessRefundRequest>,
) -> Result<Json<RefundRequest>> {
    ctx.require_admin(ApiScope::PaymentsWrite)?;
    let conn = state.db.get()?;
    let request =
        refunds::reject_refund_request(&conn, &id, &ctx.user, input.admin_response.as_deref())?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::RejectRefundRequest)
        .resource("refund_request", &id)
        .details(&json!({ "transaction_id": request.transaction_id }))
        .save()?;

    Ok(Json(request))
}
