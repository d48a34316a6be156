//! Refund requests and admin refunds.
//!
//! The processor call is the point of no return: failures before it leave
//! everything untouched, failures after it are reported as warnings on an
//! otherwise successful refund.

use axum::http::StatusCode;
use rusqlite::Connection;
use serde_json::json;

use super::{SECS_PER_DAY, access, now};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{
    CreateRefundRequest, PaymentTransaction, RefundPayment, RefundRequest, RefundRequestOutcome,
    RefundRequestStatus, RefundResult, TransactionStatus, User, WebhookEvent,
};

const MAX_REASON_LEN: usize = 2000;

/// A buyer asks for their money back.
pub fn create_refund_request(conn: &Connection, user: &User, input: &CreateRefundRequest) -> Result<RefundRequest> {
    if input.reason.as_deref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
        return Err(AppError::validation("reason", "Reason is too long"));
    }

    let transaction = queries::get_transaction_by_id(conn, &input.transaction_id)?
        .filter(|t| t.user_id.as_deref() == Some(user.id.as_str()) || t.email.eq_ignore_ascii_case(&user.email))
        .ok_or_else(|| AppError::NotFound("Transaction not found".into()))?;

    if transaction.status != TransactionStatus::Completed {
        return Err(AppError::rule(
            StatusCode::CONFLICT,
            "ALREADY_REFUNDED",
            "This payment was already refunded",
        ));
    }

    let product = queries::get_product_by_id(conn, &transaction.product_id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    if !product.is_refundable {
        return Err(AppError::rule(
            StatusCode::BAD_REQUEST,
            "NOT_REFUNDABLE",
            "This product is not refundable",
        ));
    }
    if let Some(days) = product.refund_period_days {
        if now() > transaction.created_at + days as i64 * SECS_PER_DAY {
            return Err(AppError::rule(
                StatusCode::BAD_REQUEST,
                "REFUND_PERIOD_EXPIRED",
                format!("Refunds are only possible within {} days of purchase", days),
            ));
        }
    }

    if queries::has_pending_refund_request(conn, &transaction.id)? {
        return Err(AppError::rule(
            StatusCode::CONFLICT,
            "REFUND_REQUEST_PENDING",
            "A refund request for this payment is already pending",
        ));
    }

    let request = queries::create_refund_request(
        conn,
        &transaction.id,
        &user.id,
        input.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()),
    )?;
    tracing::info!(
        "Refund requested: request={}, transaction={}, user={}",
        request.id,
        transaction.id,
        user.id
    );
    Ok(request)
}

/// Book a refund on the ledger. The refunded total only ever rises to the
/// best known lower bound, so a `charge.refunded` event that already counted
/// this refund leaves it unchanged.
fn record_and_raise(
    conn: &Connection,
    transaction: &PaymentTransaction,
    amount: i64,
    refund_id: &str,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    if !queries::record_refund(&tx, &transaction.id, refund_id, amount)? {
        tracing::info!("Refund {} already on the ledger", refund_id);
        return Ok(());
    }
    let recorded = queries::sum_recorded_refunds(&tx, &transaction.id)?;
    let total = recorded.max(transaction.refunded_amount_cents + amount);
    if !queries::raise_refunded_amount(&tx, &transaction.id, total)? {
        tracing::info!("Refund {} was already reconciled from the processor", refund_id);
    }
    tx.commit()?;
    Ok(())
}

/// Ledger, access and webhook work after the processor accepted a refund.
/// Every failure here becomes a warning.
fn settle_refund(
    state: &AppState,
    transaction: &PaymentTransaction,
    amount: i64,
    refund_id: &str,
    warnings: &mut Vec<String>,
) -> Option<PaymentTransaction> {
    let conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("Refund {} issued but database unavailable: {}", refund_id, e);
            warnings.push("Refund issued but the payment record could not be updated".into());
            return None;
        }
    };

    if let Err(e) = record_and_raise(&conn, transaction, amount, refund_id) {
        tracing::error!("Refund {} issued but ledger update failed: {}", refund_id, e);
        warnings.push("Refund issued but the payment record could not be updated".into());
    }

    let updated = queries::get_transaction_by_id(&conn, &transaction.id).ok().flatten();
    let full = updated
        .as_ref()
        .is_some_and(|t| t.status == TransactionStatus::Refunded);

    if full {
        if let Some(user_id) = transaction.user_id.as_deref() {
            for product_id in std::iter::once(transaction.product_id.as_str())
                .chain(transaction.bump_product_id.as_deref())
            {
                match access::revoke_access(&conn, user_id, product_id) {
                    Ok(true) => state.dispatcher.trigger_in_background(
                        WebhookEvent::AccessRevoked,
                        json!({"user_id": user_id, "product_id": product_id, "email": transaction.email}),
                    ),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("Refund {} issued but access revoke failed: {}", refund_id, e);
                        warnings.push(format!("Access to product {} could not be revoked", product_id));
                    }
                }
            }
        }
    }

    state.dispatcher.trigger_in_background(
        WebhookEvent::RefundIssued,
        json!({
            "transaction": updated.as_ref().unwrap_or(transaction),
            "refund_id": refund_id,
            "amount_cents": amount,
            "full_refund": full,
            "source": "gateflow",
        }),
    );

    updated
}

/// Admin refund of a payment, full or partial.
pub async fn refund_payment(state: &AppState, transaction_id: &str, input: &RefundPayment) -> Result<RefundResult> {
    let transaction = {
        let conn = state.db.get()?;
        queries::get_transaction_by_id(&conn, transaction_id)?
            .ok_or_else(|| AppError::NotFound("Payment not found".into()))?
    };

    let remaining = transaction.refundable_cents();
    if remaining == 0 {
        return Err(AppError::rule(
            StatusCode::CONFLICT,
            "ALREADY_REFUNDED",
            "This payment was already fully refunded",
        ));
    }
    let amount = input.amount_cents.unwrap_or(remaining);
    if amount <= 0 {
        return Err(AppError::validation("amount_cents", "Refund amount must be positive"));
    }
    if amount > remaining {
        return Err(AppError::validation(
            "amount_cents",
            format!("Refund amount exceeds the refundable {} cents", remaining),
        ));
    }
    let payment_intent = transaction
        .stripe_payment_intent_id
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Payment has no processor charge to refund".into()))?;

    let refund = state
        .payments
        .create_refund(payment_intent, amount, input.reason.as_deref())
        .await?;

    tracing::info!(
        "Refund issued: transaction={}, refund={}, amount={}",
        transaction.id,
        refund.id,
        amount
    );

    let mut warnings = Vec::new();
    let updated = settle_refund(state, &transaction, amount, &refund.id, &mut warnings);
    Ok(RefundResult {
        transaction: updated.unwrap_or(transaction),
        refund_id: refund.id,
        refunded_cents: amount,
        warnings,
    })
}

/// Approve a pending request and refund the remaining amount.
pub async fn approve_refund_request(
    state: &AppState,
    request_id: &str,
    admin: &User,
    admin_response: Option<&str>,
) -> Result<RefundRequestOutcome> {
    let (request, transaction) = {
        let conn = state.db.get()?;
        let request = queries::get_refund_request_by_id(&conn, request_id)?
            .ok_or_else(|| AppError::NotFound("Refund request not found".into()))?;
        if request.status != RefundRequestStatus::Pending {
            return Err(AppError::Conflict("Refund request was already processed".into()));
        }
        let transaction = queries::get_transaction_by_id(&conn, &request.transaction_id)?
            .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;
        if transaction.refundable_cents() == 0 {
            return Err(AppError::rule(
                StatusCode::CONFLICT,
                "ALREADY_REFUNDED",
                "This payment was already fully refunded",
            ));
        }
        if transaction.stripe_payment_intent_id.is_none() {
            return Err(AppError::BadRequest("Payment has no processor charge to refund".into()));
        }
        // Claim the request first so two admins cannot refund twice
        if !queries::try_process_refund_request(
            &conn,
            request_id,
            RefundRequestStatus::Approved,
            &admin.id,
            admin_response,
        )? {
            return Err(AppError::Conflict("Refund request was already processed".into()));
        }
        (request, transaction)
    };

    let amount = transaction.refundable_cents();
    let refund = match state
        .payments
        .create_refund(
            transaction.stripe_payment_intent_id.as_deref().unwrap_or_default(),
            amount,
            request.reason.as_deref(),
        )
        .await
    {
        Ok(refund) => refund,
        Err(e) => {
            tracing::error!("Processor refused refund for request {}: {}", request_id, e);
            let conn = state.db.get()?;
            queries::revert_refund_request(&conn, request_id)?;
            return Err(e);
        }
    };

    tracing::info!(
        "Refund request approved: request={}, refund={}, amount={}",
        request_id,
        refund.id,
        amount
    );

    let mut warnings = Vec::new();
    settle_refund(state, &transaction, amount, &refund.id, &mut warnings);

    let stored = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| queries::get_refund_request_by_id(&conn, request_id));
    let request = match stored {
        Ok(Some(stored)) => stored,
        Ok(None) => approved_copy(request, admin, admin_response),
        Err(e) => {
            tracing::error!("Refund {} issued but request {} could not be reloaded: {}", refund.id, request_id, e);
            warnings.push("Refund issued but the request could not be reloaded".into());
            approved_copy(request, admin, admin_response)
        }
    };
    Ok(RefundRequestOutcome { request, warnings })
}

/// What the claimed row holds, for when it cannot be read back.
fn approved_copy(mut request: RefundRequest, admin: &User, admin_response: Option<&str>) -> RefundRequest {
    request.status = RefundRequestStatus::Approved;
    request.processed_by = Some(admin.id.clone());
    request.processed_at = Some(now());
    if let Some(response) = admin_response {
        request.admin_response = Some(response.to_string());
    }
    request
}

pub fn reject_refund_request(
    conn: &Connection,
    request_id: &str,
    admin: &User,
    admin_response: Option<&str>,
) -> Result<RefundRequest> {
    let existing = queries::get_refund_request_by_id(conn, request_id)?
        .ok_or_else(|| AppError::NotFound("Refund request not found".into()))?;
    if !queries::try_process_refund_request(
        conn,
        &existing.id,
        RefundRequestStatus::Rejected,
        &admin.id,
        admin_response,
    )? {
        return Err(AppError::Conflict("Refund request was already processed".into()));
    }
    tracing::info!("Refund request rejected: request={}", request_id);
    queries::get_refund_request_by_id(conn, request_id)?
        .ok_or_else(|| AppError::NotFound("Refund request not found".into()))
}
