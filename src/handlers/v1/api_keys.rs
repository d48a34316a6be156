use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::json;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::middleware::ApiContext;
use crate::models::{ApiKey, ApiKeyCreated, ApiScope, AuditAction, CreateApiKey};
use crate::openapi::ErrorBody;
use crate::pagination::{CursorQuery, Paginated};
use crate::services::SECS_PER_DAY;
use crate::util::AuditLogBuilder;

#[utoipa::path(
    get,
    path = "/api/v1/api-keys",
    params(
        ("cursor" = Option<String>, Query, description = "Pagination cursor"),
        ("limit" = Option<i64>, Query, description = "Page size (1-100)"),
    ),
    responses((status = 200, description = "Paginated keys (`data` + `pagination`); hashes are never returned")),
    security(("api_key" = []))
)]
pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(page): Query<CursorQuery>,
) -> Result<Json<Paginated<ApiKey>>> {
    ctx.require_admin(ApiScope::Full)?;
    let conn = state.db.get()?;
    let rows = queries::list_api_keys(&conn, &page)?;
    Ok(Json(Paginated::from_rows(rows, &page)))
}

/// Issue a key. The full key is in this response only; the server keeps
/// just its SHA-256 hash.
#[utoipa::path(
    post,
    path = "/api/v1/api-keys",
    request_body = CreateApiKey,
    responses(
        (status = 201, description = "Key created", body = ApiKeyCreated),
        (status = 400, description = "Validation failed", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    headers: HeaderMap,
    Json(input): Json<CreateApiKey>,
) -> Result<(StatusCode, Json<ApiKeyCreated>)> {
    ctx.require_admin(ApiScope::Full)?;

    let name = input.name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(AppError::validation("name", "Name must be 1-100 characters"));
    }
    let scopes = input.scopes.clone().unwrap_or_else(|| vec![ApiScope::Full]);
    if scopes.is_empty() {
        return Err(AppError::validation("scopes", "At least one scope is required"));
    }
    if input.expires_in_days.is_some_and(|d| d <= 0) {
        return Err(AppError::validation("expires_in_days", "Must be a positive number of days"));
    }

    let conn = state.db.get()?;
    let owner_id = input.user_id.as_deref().unwrap_or(&ctx.user.id);
    queries::get_user_by_id(&conn, owner_id)?
        .ok_or_else(|| AppError::validation("user_id", "User not found"))?;

    let expires_at = input
        .expires_in_days
        .map(|days| chrono::Utc::now().timestamp() + days * SECS_PER_DAY);
    let (key, full_key) = queries::create_api_key(&conn, owner_id, name, &scopes, expires_at)?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::CreateApiKey)
        .resource("api_key", &key.id)
        .details(&json!({ "user_id": owner_id, "name": key.name, "scopes": key.scopes }))
        .save()?;

    tracing::info!("API key created: id={}, user={}", key.id, owner_id);
    Ok((
        StatusCode::CREATED,
        Json(ApiKeyCreated {
            id: key.id,
            name: key.name,
            key: full_key,
            prefix: key.prefix,
            scopes: key.scopes,
            created_at: key.created_at,
            expires_at: key.expires_at,
        }),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/api-keys/{id}",
    params(("id" = String, Path, description = "Key id")),
    responses(
        (status = 200, description = "Key revoked"),
        (status = 404, description = "Not found or already revoked", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin(ApiScope::Full)?;
    let conn = state.db.get()?;
    if !queries::revoke_api_key(&conn, &id)? {
        return Err(AppError::NotFound("API key not found".into()));
    }

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::RevokeApiKey)
        .resource("api_key", &id)
        .save()?;

    Ok(Json(json!({ "revoked": true })))
}
