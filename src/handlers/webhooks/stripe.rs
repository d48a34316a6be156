use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::payments::{StripeCharge, StripeCheckoutSession, StripeWebhookEvent, verify_stripe_signature};
use crate::services::fulfillment::{self, Outcome};

#[derive(Debug, Serialize)]
pub struct StripeAck {
    pub received: bool,
    pub status: &'static str,
}

fn ack(status: &'static str) -> Json<StripeAck> {
    Json(StripeAck {
        received: true,
        status,
    })
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StripeAck>> {
    let secret = state.stripe_webhook_secret.as_deref().ok_or_else(|| {
        tracing::error!("Stripe event received but STRIPE_WEBHOOK_SECRET is not set");
        AppError::Internal("Stripe ingress is not configured".into())
    })?;

    let signature = headers
        .get("stripe-signature")
        .ok_or_else(|| AppError::BadRequest("Missing stripe-signature header".into()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("Invalid stripe-signature header".into()))?;

    if !verify_stripe_signature(secret, &body, signature, chrono::Utc::now().timestamp())? {
        tracing::warn!("Stripe event with invalid signature rejected");
        return Err(AppError::Unauthorized("Invalid signature".into()));
    }

    let event: StripeWebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!("Failed to parse Stripe event: {}", e);
        AppError::BadRequest("Invalid event payload".into())
    })?;

    {
        let conn = state.db.get()?;
        if !queries::try_record_stripe_event(&conn, &event.id, &event.event_type)? {
            tracing::info!("Stripe event {} already processed", event.id);
            return Ok(ack("duplicate"));
        }
    }

    let result = match event.event_type.as_str() {
        "checkout.session.completed" => {
            match serde_json::from_value::<StripeCheckoutSession>(event.data.object.clone()) {
                Ok(session) => fulfillment::handle_checkout_completed(&state, &session),
                Err(e) => Err(AppError::BadRequest(format!("Invalid checkout session: {}", e))),
            }
        }
        "charge.refunded" => match serde_json::from_value::<StripeCharge>(event.data.object.clone()) {
            Ok(charge) => fulfillment::handle_charge_refunded(&state, &charge),
            Err(e) => Err(AppError::BadRequest(format!("Invalid charge: {}", e))),
        },
        _ => Ok(Outcome::Ignored("Event type not handled")),
    };

    match result {
        Ok(Outcome::Fulfilled(_)) => Ok(ack("processed")),
        Ok(Outcome::AlreadyProcessed) => Ok(ack("duplicate")),
        Ok(Outcome::Ignored(reason)) => {
            tracing::info!("Stripe event {} ({}) ignored: {}", event.id, event.event_type, reason);
            Ok(ack("ignored"))
        }
        Err(e) => {
            // Let Stripe redeliver the event
            tracing::error!("Stripe event {} failed: {}", event.id, e);
            let conn = state.db.get()?;
            queries::forget_stripe_event(&conn, &event.id)?;
            Err(e)
        }
    }
}
