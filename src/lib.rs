pub mod config;
pub mod crypto;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod openapi;
pub mod pagination;
pub mod payments;
pub mod pricing;
pub mod services;
pub mod util;
pub mod validation;

use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::AppState;

/// Build the full application router.
///
/// Public storefront routes, the authenticated v1 API and the Stripe ingress
/// all share one state; CORS and request tracing wrap everything.
pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect::<Vec<_>>();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .merge(handlers::public::router(state.clone()))
        .merge(handlers::v1::router(state.clone()))
        .merge(handlers::webhooks::router())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
