use axum::{extract::State, http::StatusCode};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::models::{Availability, ClaimFreeProduct, ContentDeliveryType, UserAccess, WebhookEvent};
use crate::pricing::{PriceBreakdown, PriceInput, compute_price, omnibus_lowest_price};
use crate::services::checkout::claim_free_product;

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicOrderBump {
    pub bump_product_id: String,
    pub title: String,
    pub name: String,
    pub price_cents: i64,
}

/// Storefront view of a product. Delivery details stay hidden until purchase.
#[derive(Debug, Serialize, ToSchema)]
pub struct PublicProduct {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub currency: String,
    pub price_cents: i64,
    pub sale_active: bool,
    pub sale_price_cents: Option<i64>,
    pub sale_price_until: Option<i64>,
    /// Lowest price in the 30 days before the running sale started
    pub omnibus_lowest_price_cents: Option<i64>,
    pub price: PriceBreakdown,
    pub vat_rate: Option<f64>,
    pub price_includes_vat: bool,
    pub is_free: bool,
    pub available: bool,
    pub available_from: Option<i64>,
    pub available_until: Option<i64>,
    pub content_type: ContentDeliveryType,
    pub order_bumps: Vec<PublicOrderBump>,
}

pub async fn get_public_product(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PublicProduct>> {
    let conn = state.db.get()?;
    let now = chrono::Utc::now().timestamp();

    let product = queries::get_product_by_slug(&conn, &slug)?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let sale_active = product.sale_active_at(now);
    let omnibus_lowest_price_cents = if sale_active {
        // The reference window sits before the sale started, so load it all
        let history = queries::list_price_history(&conn, &product.id, 0)?;
        omnibus_lowest_price(&history, now)
    } else {
        None
    };

    let mut order_bumps = Vec::new();
    for bump in queries::list_order_bumps(&conn, &product.id)?
        .into_iter()
        .filter(|b| b.is_active)
    {
        let Some(bump_product) = queries::get_product_by_id(&conn, &bump.bump_product_id)? else {
            continue;
        };
        if bump_product.availability_at(now) != Availability::Available {
            continue;
        }
        order_bumps.push(PublicOrderBump {
            price_cents: bump
                .bump_price_cents
                .unwrap_or_else(|| bump_product.effective_price_at(now)),
            bump_product_id: bump.bump_product_id,
            title: bump.title,
            name: bump_product.name,
        });
    }

    let price = compute_price(&PriceInput::for_product(&product, now));

    Ok(Json(PublicProduct {
        sale_active,
        omnibus_lowest_price_cents,
        is_free: price.is_free(),
        available: product.availability_at(now) == Availability::Available,
        content_type: product.content.kind(),
        price,
        id: product.id,
        name: product.name,
        slug: product.slug,
        description: product.description,
        currency: product.currency,
        price_cents: product.price_cents,
        sale_price_cents: product.sale_price_cents,
        sale_price_until: product.sale_price_until,
        vat_rate: product.vat_rate,
        price_includes_vat: product.price_includes_vat,
        available_from: product.available_from,
        available_until: product.available_until,
        order_bumps,
    }))
}

pub async fn claim_free(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(input): Json<ClaimFreeProduct>,
) -> Result<(StatusCode, Json<UserAccess>)> {
    let (product, access) = {
        let conn = state.db.get()?;
        claim_free_product(&conn, &slug, &input.email)?
    };

    tracing::info!("Free product claimed: product={}, user={}", product.id, access.user_id);
    state.dispatcher.trigger_in_background(
        WebhookEvent::AccessGranted,
        json!({
            "access": access,
            "email": input.email.trim().to_lowercase(),
            "source": "free_claim",
        }),
    );

    Ok((StatusCode::CREATED, Json(access)))
}
