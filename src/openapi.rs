//! OpenAPI document for `/api/v1`, served at `/api/v1/docs/openapi.json`.

use serde::Serialize;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};

use crate::extractors::Json;
use crate::handlers::v1;
use crate::models::{
    ApiKeyCreated, ApiScope, CheckoutStatus, ContentDelivery, ContentDeliveryType, ContentItem,
    Coupon, CreateApiKey, CreateCoupon, CreateOrderBump, CreateOtoOffer, CreateProduct,
    CreateRefundRequest, CreateUser, CreateWebhookEndpoint, CurrencyTotals, DashboardStats,
    DiscountType, GrantAccess, OrderBump, OtoOffer, PaymentTransaction, PricePoint,
    ProcessRefundRequest, Product, RefundPayment, RefundRequest, RefundRequestOutcome,
    RefundRequestStatus, RefundResult, RevenuePoint, TransactionStatus, UpdateCoupon,
    UpdateProduct, UpdateWebhookEndpoint, User, UserAccess, WebhookEndpoint,
    WebhookEndpointCreated, WebhookEvent, WebhookLog, WebhookLogStatus,
};

/// Error envelope returned by every endpoint.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `VALIDATION_ERROR` or `ALREADY_REFUNDED`
    pub code: String,
    pub message: String,
    /// Field errors for `VALIDATION_ERROR`
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "GateFlow API", description = "Management API for products, payments and access"),
    paths(
        v1::list_products,
        v1::create_product,
        v1::get_product,
        v1::update_product,
        v1::delete_product,
        v1::get_price_history,
        v1::list_order_bumps,
        v1::create_order_bump,
        v1::delete_order_bump,
        v1::get_product_content,
        v1::list_payments,
        v1::get_payment,
        v1::refund_payment,
        v1::list_refund_requests,
        v1::create_refund_request,
        v1::approve_refund_request,
        v1::reject_refund_request,
        v1::list_coupons,
        v1::create_coupon,
        v1::get_coupon,
        v1::update_coupon,
        v1::delete_coupon,
        v1::get_me,
        v1::list_users,
        v1::create_user,
        v1::get_user,
        v1::list_user_access,
        v1::grant_user_access,
        v1::revoke_user_access,
        v1::list_webhooks,
        v1::create_webhook,
        v1::get_webhook,
        v1::update_webhook,
        v1::delete_webhook,
        v1::test_webhook,
        v1::list_webhook_logs,
        v1::retry_webhook_log,
        v1::list_oto_offers,
        v1::create_oto_offer,
        v1::delete_oto_offer,
        v1::get_dashboard,
        v1::get_revenue,
        v1::list_api_keys,
        v1::create_api_key,
        v1::revoke_api_key,
        v1::list_audit_logs,
    ),
    components(schemas(
        ErrorBody,
        ErrorDetail,
        ApiScope,
        ApiKeyCreated,
        CreateApiKey,
        CheckoutStatus,
        ContentDelivery,
        ContentDeliveryType,
        ContentItem,
        Coupon,
        CreateCoupon,
        UpdateCoupon,
        DiscountType,
        Product,
        CreateProduct,
        UpdateProduct,
        PricePoint,
        OrderBump,
        CreateOrderBump,
        v1::ProductContent,
        PaymentTransaction,
        TransactionStatus,
        RefundPayment,
        RefundResult,
        RefundRequest,
        RefundRequestStatus,
        CreateRefundRequest,
        ProcessRefundRequest,
        RefundRequestOutcome,
        User,
        CreateUser,
        UserAccess,
        GrantAccess,
        WebhookEndpoint,
        WebhookEndpointCreated,
        CreateWebhookEndpoint,
        UpdateWebhookEndpoint,
        WebhookEvent,
        WebhookLog,
        WebhookLogStatus,
        OtoOffer,
        CreateOtoOffer,
        DashboardStats,
        CurrencyTotals,
        RevenuePoint,
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_v1_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/products"));
        assert!(doc.paths.paths.contains_key("/api/v1/webhook-logs/{id}/retry"));
        let schemes = doc.components.as_ref().map(|c| c.security_schemes.len());
        assert_eq!(schemes, Some(1));
    }
}
