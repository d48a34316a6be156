//! Input checks shared by handlers: outbound webhook URLs and buyer emails.

mod email;
mod url;

pub use email::{EmailCheck, check_email, is_disposable_domain, is_valid_email_syntax};
pub use url::{is_blocked_ip, validate_webhook_url};
