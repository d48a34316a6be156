use axum::extract::{Extension, State};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::middleware::ApiContext;
use crate::models::{ApiScope, DashboardStats, RevenuePoint, RevenueQuery};
use crate::openapi::ErrorBody;
use crate::services::SECS_PER_DAY;

const DEFAULT_RANGE_DAYS: i64 = 30;
const MAX_RANGE_DAYS: i64 = 366;

#[utoipa::path(
    get,
    path = "/api/v1/analytics/dashboard",
    responses((status = 200, description = "Totals per currency plus counters", body = DashboardStats)),
    security(("api_key" = []))
)]
pub async fn get_dashboard(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
) -> Result<Json<DashboardStats>> {
    ctx.require_admin(ApiScope::AnalyticsRead)?;
    let conn = state.db.get()?;
    let now = chrono::Utc::now().timestamp();
    let today_start = now - now.rem_euclid(SECS_PER_DAY);

    Ok(Json(DashboardStats {
        totals: queries::dashboard_totals(&conn, today_start)?,
        total_users: queries::count_users(&conn)?,
        active_products: queries::count_active_products(&conn)?,
        pending_refund_requests: queries::count_pending_refund_requests(&conn)?,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/analytics/revenue",
    params(
        ("from" = Option<i64>, Query, description = "Unix seconds, inclusive (default: 30 days before `to`)"),
        ("to" = Option<i64>, Query, description = "Unix seconds, exclusive (default: now)"),
        ("product_id" = Option<String>, Query, description = "Restrict to one product"),
    ),
    responses(
        (status = 200, description = "Net revenue per UTC day and currency", body = [RevenuePoint]),
        (status = 400, description = "Invalid range", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn get_revenue(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<Vec<RevenuePoint>>> {
    ctx.require_admin(ApiScope::AnalyticsRead)?;
    let to = query.to.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let from = query.from.unwrap_or(to - DEFAULT_RANGE_DAYS * SECS_PER_DAY);
    if from >= to {
        return Err(AppError::validation("from", "Range start must be before its end"));
    }
    if to - from > MAX_RANGE_DAYS * SECS_PER_DAY {
        return Err(AppError::validation("from", "Range is limited to one year"));
    }

    let conn = state.db.get()?;
    Ok(Json(queries::revenue_by_day(&conn, from, to, query.product_id.as_deref())?))
}
