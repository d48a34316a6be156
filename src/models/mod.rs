mod analytics;
mod api_key;
mod audit_log;
mod checkout;
mod coupon;
mod oto;
mod product;
mod refund_request;
mod transaction;
mod user;
mod webhook;

pub use analytics::*;
pub use api_key::*;
pub use audit_log::*;
pub use checkout::*;
pub use coupon::*;
pub use oto::*;
pub use product::*;
pub use refund_request::*;
pub use transaction::*;
pub use user::*;
pub use webhook::*;
