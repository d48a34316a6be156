use axum::extract::{Extension, State};

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::middleware::ApiContext;
use crate::models::{ApiScope, AuditLog, AuditLogListQuery};
use crate::pagination::Paginated;

#[utoipa::path(
    get,
    path = "/api/v1/audit-logs",
    params(
        ("cursor" = Option<String>, Query, description = "Pagination cursor"),
        ("limit" = Option<i64>, Query, description = "Page size (1-100)"),
        ("user_id" = Option<String>, Query, description = "Filter by actor"),
        ("action" = Option<String>, Query, description = "Filter by action, e.g. update_coupon"),
        ("resource_type" = Option<String>, Query, description = "Filter by resource type"),
        ("resource_id" = Option<String>, Query, description = "Filter by resource id"),
    ),
    responses((status = 200, description = "Paginated audit entries (`data` + `pagination`)")),
    security(("api_key" = []))
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(query): Query<AuditLogListQuery>,
) -> Result<Json<Paginated<AuditLog>>> {
    ctx.require_admin(ApiScope::Full)?;
    let conn = state.db.get()?;
    let rows = queries::list_audit_logs(&conn, &query)?;
    Ok(Json(Paginated::from_rows(rows, &query.page())))
}
