use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::json;

use crate::crypto::{WEBHOOK_SECRET_PURPOSE, generate_token};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::middleware::ApiContext;
use crate::models::{
    ApiScope, AuditAction, CreateWebhookEndpoint, UpdateWebhookEndpoint, WebhookEndpoint,
    WebhookEndpointCreated, WebhookEvent, WebhookLog, WebhookLogListQuery,
};
use crate::openapi::ErrorBody;
use crate::pagination::{CursorQuery, Paginated};
use crate::util::AuditLogBuilder;
use crate::validation::validate_webhook_url;

const SECRET_PREFIX: &str = "whsec_";

fn validate_events(events: &[WebhookEvent]) -> Result<()> {
    if events.is_empty() {
        return Err(AppError::validation("events", "Subscribe to at least one event"));
    }
    if events.contains(&WebhookEvent::Test) {
        return Err(AppError::validation("events", "webhook.test is sent on demand only"));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/v1/webhooks",
    params(
        ("cursor" = Option<String>, Query, description = "Pagination cursor"),
        ("limit" = Option<i64>, Query, description = "Page size (1-100)"),
    ),
    responses((status = 200, description = "Paginated endpoints (`data` + `pagination`)", body = [WebhookEndpoint])),
    security(("api_key" = []))
)]
pub async fn list_webhooks(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(page): Query<CursorQuery>,
) -> Result<Json<Paginated<WebhookEndpoint>>> {
    ctx.require_admin(ApiScope::WebhooksRead)?;
    let conn = state.db.get()?;
    let rows = queries::list_webhook_endpoints(&conn, &page)?;
    Ok(Json(Paginated::from_rows(rows, &page)))
}

/// Register an endpoint. The signing secret is returned once and stored
/// encrypted; it cannot be read back later.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks",
    request_body = CreateWebhookEndpoint,
    responses(
        (status = 201, description = "Endpoint created", body = WebhookEndpointCreated),
        (status = 400, description = "URL rejected or no events", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn create_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    headers: HeaderMap,
    Json(input): Json<CreateWebhookEndpoint>,
) -> Result<(StatusCode, Json<WebhookEndpointCreated>)> {
    ctx.require_admin(ApiScope::WebhooksWrite)?;
    validate_webhook_url(&input.url, state.allow_http_webhooks)?;
    validate_events(&input.events)?;

    let secret = generate_token(SECRET_PREFIX, 24);
    let encrypted = state.master_key.encrypt_string(WEBHOOK_SECRET_PURPOSE, &secret)?;

    let conn = state.db.get()?;
    let endpoint = queries::create_webhook_endpoint(&conn, &input, &encrypted)?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::CreateWebhookEndpoint)
        .resource("webhook_endpoint", &endpoint.id)
        .details(&json!({ "url": endpoint.url, "events": endpoint.events }))
        .save()?;

    tracing::info!("Webhook endpoint created: id={}", endpoint.id);
    Ok((StatusCode::CREATED, Json(WebhookEndpointCreated { endpoint, secret })))
}

#[utoipa::path(
    get,
    path = "/api/v1/webhooks/{id}",
    params(("id" = String, Path, description = "Endpoint id")),
    responses(
        (status = 200, description = "Endpoint", body = WebhookEndpoint),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn get_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<WebhookEndpoint>> {
    ctx.require_admin(ApiScope::WebhooksRead)?;
    let conn = state.db.get()?;
    let endpoint = queries::get_webhook_endpoint_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Webhook endpoint not found".into()))?;
    Ok(Json(endpoint))
}

#[utoipa::path(
    patch,
    path = "/api/v1/webhooks/{id}",
    params(("id" = String, Path, description = "Endpoint id")),
    request_body = UpdateWebhookEndpoint,
    responses(
        (status = 200, description = "Updated endpoint", body = WebhookEndpoint),
        (status = 400, description = "URL rejected or no events", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn update_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<UpdateWebhookEndpoint>,
) -> Result<Json<WebhookEndpoint>> {
    ctx.require_admin(ApiScope::WebhooksWrite)?;
    if let Some(url) = &input.url {
        validate_webhook_url(url, state.allow_http_webhooks)?;
    }
    if let Some(events) = &input.events {
        validate_events(events)?;
    }

    let conn = state.db.get()?;
    queries::get_webhook_endpoint_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Webhook endpoint not found".into()))?;
    queries::update_webhook_endpoint(&conn, &id, &input)?;
    let endpoint = queries::get_webhook_endpoint_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Webhook endpoint not found".into()))?;

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::UpdateWebhookEndpoint)
        .resource("webhook_endpoint", &id)
        .details(&json!({
            "url": endpoint.url,
            "events": endpoint.events,
            "is_active": endpoint.is_active,
        }))
        .save()?;

    Ok(Json(endpoint))
}

#[utoipa::path(
    delete,
    path = "/api/v1/webhooks/{id}",
    params(("id" = String, Path, description = "Endpoint id")),
    responses(
        (status = 200, description = "Endpoint deleted with its logs"),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn delete_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    ctx.require_admin(ApiScope::WebhooksWrite)?;
    let conn = state.db.get()?;
    if !queries::delete_webhook_endpoint(&conn, &id)? {
        return Err(AppError::NotFound("Webhook endpoint not found".into()));
    }

    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::DeleteWebhookEndpoint)
        .resource("webhook_endpoint", &id)
        .save()?;

    Ok(Json(json!({ "deleted": true })))
}

/// Send a `webhook.test` event right away and return the delivery log.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/{id}/test",
    params(("id" = String, Path, description = "Endpoint id")),
    responses(
        (status = 200, description = "Delivery attempt (may be failed)", body = WebhookLog),
        (status = 404, description = "Not found", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn test_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<WebhookLog>> {
    ctx.require_admin(ApiScope::WebhooksWrite)?;
    let endpoint = {
        let conn = state.db.get()?;
        queries::get_webhook_endpoint_by_id(&conn, &id)?
            .ok_or_else(|| AppError::NotFound("Webhook endpoint not found".into()))?
    };
    let log = state.dispatcher.send_test(&endpoint).await?;
    Ok(Json(log))
}

#[utoipa::path(
    get,
    path = "/api/v1/webhook-logs",
    params(
        ("cursor" = Option<String>, Query, description = "Pagination cursor"),
        ("limit" = Option<i64>, Query, description = "Page size (1-100)"),
        ("endpoint_id" = Option<String>, Query, description = "Filter by endpoint"),
        ("status" = Option<String>, Query, description = "success | failed | retried"),
    ),
    responses((status = 200, description = "Paginated delivery logs (`data` + `pagination`)", body = [WebhookLog])),
    security(("api_key" = []))
)]
pub async fn list_webhook_logs(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Query(query): Query<WebhookLogListQuery>,
) -> Result<Json<Paginated<WebhookLog>>> {
    ctx.require_admin(ApiScope::WebhooksRead)?;
    let conn = state.db.get()?;
    let rows = queries::list_webhook_logs(&conn, &query)?;
    Ok(Json(Paginated::from_rows(rows, &query.page())))
}

/// Re-send a failed delivery. The new attempt gets its own log row and the
/// old one is marked `retried`.
#[utoipa::path(
    post,
    path = "/api/v1/webhook-logs/{id}/retry",
    params(("id" = String, Path, description = "Log id")),
    responses(
        (status = 200, description = "New delivery attempt", body = WebhookLog),
        (status = 404, description = "Not found", body = ErrorBody),
        (status = 409, description = "Only failed deliveries can be retried", body = ErrorBody),
    ),
    security(("api_key" = []))
)]
pub async fn retry_webhook_log(
    State(state): State<AppState>,
    Extension(ctx): Extension<ApiContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<WebhookLog>> {
    ctx.require_admin(ApiScope::WebhooksWrite)?;
    let log = state.dispatcher.retry(&id).await?;

    let conn = state.db.get()?;
    AuditLogBuilder::new(&conn, state.audit_log_enabled, &headers)
        .actor(&ctx.user.id)
        .action(AuditAction::RetryWebhook)
        .resource("webhook_log", &id)
        .details(&json!({ "new_log_id": log.id, "status": log.status }))
        .save()?;

    Ok(Json(log))
}
