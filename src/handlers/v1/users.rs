use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serde_json::json;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::middleware::ApiContext;
use crate::models::{
    ApiScope, AuditAction, CreateUser, GrantAccess, User, UserAccess, UserListQuery, WebhookEvent,
};
use crate::openapi::ErrorBody;
use crate::pagination::Paginated;
use crate::services::access;
use crate::util::AuditLogBuilder;

#[derive(Debug, Deserialize)]
pub struct UserAccessPath {
    pub id: String,
    pub product_id: String,
}

/// The caller's own account.
#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses((status = 200, description = "Authenticated user", body = User)),
    security(("api_key" = []))
)]
pub async fn get_me(Extension(ctx): Extension<ApiContext>) -> Result<Json<User>> {
    Ok(Json(ctx.user))
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(
        ("cursor" = Option<String>, Query, description = "Pagination cursor"),
        ("limit" = Option<i64>, Query, description = "Page size (1-100)"),
        ("search" = Option<String>, Query, description = "Substring of email or name"),
    ),
    responses(
        (status = 200, description = "Paginated users (`data` + `pagination`)", body = [User]),
        (status = 403, description = "Admin only", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Paginated<User>>> {
    ctx.require_admin(ApiScope::UsersRead)?;
    let conn = state.db.get()?;
    let rows = queries::list_users(&conn, &query)?;
    Ok(Json(Paginated::from_rows(rows, &query.page())))
}

#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Json(input): Json<CreateUser>,
) -> Result<(StatusCode, Json<User>)> {
    ctx.require_admin(ApiScope::UsersWrite)?;
    input.validate()?;
    let conn = state.db.get()?;
    let user = queries::create_user(&conn, &input)?;
    tracing::info!("User created: id={}, admin={}", user.id, user.is_admin);
    Ok((StatusCode::CREATED, Json(user)))
}

/// Admins may read any user, everyone else only themselves.
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 403, description = "Not your account", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<User>> {
    ctx.require_self_or_admin(&id, ApiScope::UsersRead)?;
    let conn = state.db.get()?;
    let user = queries::get_user_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(Json(user))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/access",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Access grants, expired ones included", body = [UserAccess]),
        (status = 403, description = "Not your account", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn list_user_access(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<UserAccess>>> {
    ctx.require_self_or_admin(&id, ApiScope::UsersRead)?;
    let conn = state.db.get()?;
    queries::get_user_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(Json(queries::list_user_access(&conn, &id)?))
}

/// Grant or extend access by hand. Without `duration_days` the product's
/// default applies; a product without one grants lifetime access.
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/access",
    params(("id" = String, Path, description = "User id")),
    request_body = GrantAccess,
    responses(
        (status = 201, description = "Access granted", body = UserAccess),
        (status = 404, description = "User or product not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn grant_user_access(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<GrantAccess>,
) -> Result<(StatusCode, Json<UserAccess>)> {
    ctx.require_admin(ApiScope::UsersWrite)?;
    let conn = state.db.get()?;
    let now = chrono::Utc::now().timestamp();

    let user = queries::get_user_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    let product = queries::get_product_by_id(&conn, &input.product_id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let duration = input.duration_days.or(product.auto_grant_duration_days);
    let granted = access::grant_access(&conn, &user.id, &product.id, duration, None, now)?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::GrantAccess)
        .resource("user", &user.id)
        .details(&json!({
            "product_id": product.id,
            "access_expires_at": granted.access_expires_at,
        }))
        .save()?;

    state.dispatcher.trigger_in_background(
        WebhookEvent::AccessGranted,
        json!({ "access": granted, "email": user.email, "source": "admin" }),
    );

    Ok((StatusCode::CREATED, Json(granted)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}/access/{product_id}",
    params(
        ("id" = String, Path, description = "User id"),
        ("product_id" = String, Path, description = "Product id"),
    ),
    responses(
        (status = 200, description = "Access revoked"),
        (status = 404, description = "No such grant", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn revoke_user_access(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(path): Path<UserAccessPath>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin(ApiScope::UsersWrite)?;
    let conn = state.db.get()?;

    let user = queries::get_user_by_id(&conn, &path.id)?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    if !access::revoke_access(&conn, &user.id, &path.product_id)? {
        return Err(AppError::NotFound("User has no access to this product".into()));
    }

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::RevokeAccess)
        .resource("user", &user.id)
        .details(&json!({ "product_id": path.product_id }))
        .save()?;

    state.dispatcher.trigger_in_background(
        WebhookEvent::AccessRevoked,
        json!({
            "user_id": user.id,
            "email": user.email,
            "product_id": path.product_id,
            "source": "admin",
        }),
    );

    Ok(Json(json!({ "revoked": true })))
}
