mod api_auth;
mod rate_limit;

pub use api_auth::*;
pub use rate_limit::*;
