use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};
use serde_json::json;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::middleware::ApiContext;
use crate::models::{ApiScope, AuditAction, PaymentListQuery, PaymentTransaction, RefundPayment, RefundResult};
use crate::openapi::ErrorBody;
use crate::pagination::Paginated;
use crate::services::refunds;
use crate::util::AuditLogBuilder;

#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(
        ("cursor" = Option<String>, Query, description = "Pagination cursor"),
        ("limit" = Option<i64>, Query, description = "Page size (1-100)"),
        ("status" = Option<String>, Query, description = "completed | refunded | partially_refunded"),
        ("product_id" = Option<String>, Query, description = "Filter by product"),
        ("email" = Option<String>, Query, description = "Filter by buyer email"),
    ),
    responses(
        (status = 200, description = "Paginated payments (`data` + `pagination`)", body = [PaymentTransaction]),
    ),
    security(("api_key" = []))
)]
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(query): Query<PaymentListQuery>,
) -> Result<Json<Paginated<PaymentTransaction>>> {
    ctx.require_admin(ApiScope::PaymentsRead)?;
    let conn = state.db.get()?;
    let rows = queries::list_transactions(&conn, &query)?;
    Ok(Json(Paginated::from_rows(rows, &query.page())))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = String, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment", body = PaymentTransaction),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<PaymentTransaction>> {
    ctx.require_admin(ApiScope::PaymentsRead)?;
    let conn = state.db.get()?;
    let transaction = queries::get_transaction_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;
    Ok(Json(transaction))
}

/// Refund a payment, fully or partially. Amounts beyond what is still
/// refundable are rejected before the processor is called.
#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/refund",
    params(("id" = String, Path, description = "Payment id")),
    request_body = RefundPayment,
    responses(
        (status = 200, description = "Refund issued", body = RefundResult),
        (status = 400, description = "Invalid amount", body = ErrorBody),
        (status = 409, description = "Nothing left to refund", body = ErrorBody),
        (status = 502, description = "Payment processor error", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<RefundPayment>,
) -> Result<Json<RefundResult>> {
    ctx.require_admin(ApiScope::PaymentsWrite)?;
    let result = refunds::refund_payment(&state, &id, &input).await?;

    // The money has moved; an audit failure is logged, not returned
    let audited = state.db.get().map_err(AppError::from).and_then(|conn| {
        AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
            .actor(&ctx.user.id)
            .action(AuditAction::RefundPayment)
            .resource("payment", &id)
            .details(&json!({
                "refund_id": result.refund_id,
                "amount_cents": result.refunded_cents,
                "reason": input.reason,
            }))
            .save()
    });
    if let Err(e) = audited {
        tracing::error!("Refund {} issued but audit log failed: {}", result.refund_id, e);
    }

    Ok(Json(result))
}
