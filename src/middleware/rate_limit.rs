use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::middleware::ApiContext;
use crate::util::extract_request_info;

pub fn build_rate_limiter(per_minute: u32) -> Arc<DefaultKeyedRateLimiter<String>> {
    let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute)))
}

/// Bucket for an unauthenticated caller. Credentials in the request are
/// ignored here since nothing has checked them yet.
pub fn client_ip_key(headers: &HeaderMap) -> String {
    match extract_request_info(headers).0 {
        Some(ip) => format!("ip:{}", ip),
        None => "anonymous".to_string(),
    }
}

fn check(state: &AppState, key: &str) -> Result<()> {
    if state.rate_limiter.check_key(&key.to_string()).is_err() {
        tracing::warn!("Rate limit exceeded for {}", key);
        return Err(AppError::RateLimited);
    }
    Ok(())
}

/// Per client IP. Runs in front of authentication, so guessed keys are
/// throttled like any other request.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    check(&state, &client_ip_key(request.headers()))?;
    Ok(next.run(request).await)
}

/// Per API key. Must be layered inside `api_auth`.
pub async fn rate_limit_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let key = match request.extensions().get::<ApiContext>() {
        Some(ctx) => format!("key:{}", ctx.key.id),
        None => client_ip_key(request.headers()),
    };
    check(&state, &key)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_key_ignores_credentials() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip_key(&headers), "anonymous");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_ip_key(&headers), "ip:203.0.113.9");

        headers.insert("X-API-Key", HeaderValue::from_static("gf_abc"));
        assert_eq!(client_ip_key(&headers), "ip:203.0.113.9");
    }

    #[test]
    fn test_limiter_blocks_after_quota() {
        let limiter = build_rate_limiter(2);
        let key = "ip:198.51.100.1".to_string();
        assert!(limiter.check_key(&key).is_ok());
        assert!(limiter.check_key(&key).is_ok());
        assert!(limiter.check_key(&key).is_err());
        assert!(limiter.check_key(&"ip:198.51.100.2".to_string()).is_ok());
    }
}
