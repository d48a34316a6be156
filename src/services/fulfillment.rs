//! Reconciliation of Stripe events with local state.
//!
//! Both handlers run inside one SQLite transaction so a failure leaves no
//! half-fulfilled order behind; outgoing webhooks are queued only after commit.

use rusqlite::Connection;
use serde_json::{Value, json};

use super::{access, now};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{PaymentTransaction, WebhookEvent};
use crate::payments::{StripeCharge, StripeCheckoutSession};

#[derive(Debug)]
pub enum Outcome {
    Fulfilled(PaymentTransaction),
    AlreadyProcessed,
    Ignored(&'static str),
}

/// Webhook events to emit once the database work is committed.
type Pending = Vec<(WebhookEvent, Value)>;

fn emit(state: &AppState, pending: Pending) {
    for (event, data) in pending {
        state.dispatcher.trigger_in_background(event, data);
    }
}

pub fn handle_checkout_completed(state: &AppState, session: &StripeCheckoutSession) -> Result<Outcome> {
    if session.payment_status != "paid" {
        return Ok(Outcome::Ignored("Payment not completed"));
    }
    let Some(local_id) = session.metadata.gateflow_session_id.as_deref() else {
        return Ok(Outcome::Ignored("No GateFlow session id"));
    };

    let conn = state.db.get()?;
    let tx = conn.unchecked_transaction()?;
    let (outcome, pending) = complete_checkout(&tx, session, local_id)?;
    tx.commit()?;
    drop(conn);

    emit(state, pending);
    Ok(outcome)
}

fn complete_checkout(
    conn: &Connection,
    stripe: &StripeCheckoutSession,
    local_id: &str,
) -> Result<(Outcome, Pending)> {
    let Some(checkout) = queries::get_checkout_session_by_id(conn, local_id)? else {
        tracing::warn!("Stripe checkout {} references unknown session {}", stripe.id, local_id);
        return Ok((Outcome::Ignored("Unknown checkout session"), Vec::new()));
    };
    if !queries::try_complete_checkout_session(conn, &checkout.id)? {
        return Ok((Outcome::AlreadyProcessed, Vec::new()));
    }

    let now = now();
    let email = stripe.email().unwrap_or(&checkout.email).trim().to_lowercase();
    let user = queries::find_or_create_user_by_email(conn, &email)?;
    let product = queries::get_product_by_id(conn, &checkout.product_id)?
        .ok_or_else(|| AppError::Internal(format!("Product {} missing", checkout.product_id)))?;
    let coupon = match checkout.coupon_code.as_deref() {
        Some(code) => queries::get_coupon_by_code(conn, code)?,
        None => None,
    };

    let transaction = queries::create_transaction(
        conn,
        &queries::NewTransaction {
            session_id: Some(&checkout.id),
            user_id: Some(&user.id),
            email: &email,
            product_id: &product.id,
            bump_product_id: checkout.bump_product_id.as_deref(),
            amount_cents: stripe.amount_total.unwrap_or(checkout.total_cents),
            currency: &checkout.currency,
            vat_cents: checkout.vat_cents,
            coupon_id: coupon.as_ref().map(|c| c.id.as_str()),
            stripe_payment_intent_id: stripe.payment_intent.as_deref(),
        },
    )?;

    let mut pending: Pending = Vec::new();
    let mut granted = vec![access::grant_access(
        conn,
        &user.id,
        &product.id,
        product.auto_grant_duration_days,
        Some(&transaction.id),
        now,
    )?];
    if let Some(bump_id) = checkout.bump_product_id.as_deref() {
        match queries::get_product_by_id(conn, bump_id)? {
            Some(bump) => granted.push(access::grant_access(
                conn,
                &user.id,
                &bump.id,
                bump.auto_grant_duration_days,
                Some(&transaction.id),
                now,
            )?),
            None => tracing::warn!("Bump product {} missing, access not granted", bump_id),
        }
    }

    if let Some(coupon) = &coupon {
        // Payment is already captured, so an exhausted coupon is only logged
        if !queries::redeem_coupon(conn, &coupon.id, &email, &transaction.id)? {
            tracing::warn!(
                "Coupon {} exceeded its usage limit on transaction {}",
                coupon.code,
                transaction.id
            );
        }
    }

    if let Some(offer) = queries::get_active_oto_offer_for_product(conn, &product.id)? {
        if queries::has_active_access_by_email(conn, &email, &offer.oto_product_id, now)? {
            tracing::info!("Buyer already owns OTO product {}, no offer issued", offer.oto_product_id);
        } else {
            let expires_at = now + offer.duration_minutes * 60;
            let oto_coupon = queries::create_oto_coupon(conn, &offer, &email, &product.currency, expires_at)?;
            queries::create_oto_grant(conn, &offer.id, &checkout.id, &email, &oto_coupon.id, expires_at)?;
            tracing::info!("OTO offer {} issued for session {}", offer.id, checkout.id);
        }
    }

    pending.push((
        WebhookEvent::PurchaseCompleted,
        json!({
            "transaction": transaction,
            "product": {"id": product.id, "name": product.name, "slug": product.slug},
            "customer": {"email": email, "user_id": user.id},
            "bump_product_id": checkout.bump_product_id,
            "coupon_code": checkout.coupon_code,
        }),
    ));
    for access in &granted {
        pending.push((WebhookEvent::AccessGranted, json!({ "access": access, "email": email })));
    }

    tracing::info!(
        "Checkout fulfilled: session={}, transaction={}, amount={} {}",
        checkout.id,
        transaction.id,
        transaction.amount_cents,
        transaction.currency
    );

    Ok((Outcome::Fulfilled(transaction), pending))
}

/// Refund made outside GateFlow (e.g. in the Stripe dashboard).
pub fn handle_charge_refunded(state: &AppState, charge: &StripeCharge) -> Result<Outcome> {
    let Some(payment_intent) = charge.payment_intent.as_deref() else {
        return Ok(Outcome::Ignored("Charge has no payment intent"));
    };

    let conn = state.db.get()?;
    let tx = conn.unchecked_transaction()?;
    let (outcome, pending) = reconcile_refund(&tx, charge, payment_intent)?;
    tx.commit()?;
    drop(conn);

    emit(state, pending);
    Ok(outcome)
}

fn reconcile_refund(
    conn: &Connection,
    charge: &StripeCharge,
    payment_intent: &str,
) -> Result<(Outcome, Pending)> {
    let Some(transaction) = queries::get_transaction_by_payment_intent(conn, payment_intent)? else {
        tracing::warn!("Refund for unknown payment intent {}", payment_intent);
        return Ok((Outcome::Ignored("Unknown payment"), Vec::new()));
    };

    let refunded_total = charge.amount_refunded.min(transaction.amount_cents);
    let delta = refunded_total - transaction.refunded_amount_cents;
    if delta <= 0 {
        // Refunds issued through GateFlow are already on the ledger
        return Ok((Outcome::AlreadyProcessed, Vec::new()));
    }
    if !queries::raise_refunded_amount(conn, &transaction.id, refunded_total)? {
        return Ok((Outcome::AlreadyProcessed, Vec::new()));
    }

    let full = charge.refunded || refunded_total >= transaction.amount_cents;
    let mut pending: Pending = Vec::new();
    if full {
        if let Some(user_id) = transaction.user_id.as_deref() {
            for product_id in std::iter::once(transaction.product_id.as_str())
                .chain(transaction.bump_product_id.as_deref())
            {
                if access::revoke_access(conn, user_id, product_id)? {
                    pending.push((
                        WebhookEvent::AccessRevoked,
                        json!({"user_id": user_id, "product_id": product_id, "email": transaction.email}),
                    ));
                }
            }
        }
    }

    let updated = queries::get_transaction_by_id(conn, &transaction.id)?
        .ok_or_else(|| AppError::Internal("Transaction vanished".into()))?;
    pending.insert(
        0,
        (
            WebhookEvent::RefundIssued,
            json!({
                "transaction": updated,
                "refund_id": charge.id,
                "amount_cents": delta,
                "full_refund": full,
                "source": "stripe",
            }),
        ),
    );

    tracing::info!(
        "Stripe refund reconciled: transaction={}, amount={}, full={}",
        updated.id,
        delta,
        full
    );
    Ok((Outcome::Fulfilled(updated), pending))
}
