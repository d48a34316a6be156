//! Multi-step operations shared by the HTTP handlers and the Stripe ingress.
//!
//! Handlers own request parsing and auth; everything that touches several
//! tables or calls the payment processor lives here.

pub mod access;
pub mod checkout;
pub mod fulfillment;
pub mod refunds;

use chrono::Utc;

pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

pub(crate) const SECS_PER_DAY: i64 = 86_400;
