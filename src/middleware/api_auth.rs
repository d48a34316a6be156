use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{ApiKey, ApiScope, User};
use crate::util::extract_api_key;

/// Caller identity for `/api/v1`, inserted into request extensions.
#[derive(Clone)]
pub struct ApiContext {
    pub user: User,
    pub key: ApiKey,
}

impl ApiContext {
    pub fn is_admin(&self) -> bool {
        self.user.is_admin
    }

    /// Fail with 403 unless the key carries `scope`.
    pub fn require(&self, scope: ApiScope) -> Result<()> {
        if self.key.has_scope(scope) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "API key lacks the {} scope",
                scope.as_ref()
            )))
        }
    }

    /// Admin-only endpoint that also needs `scope` on the key.
    pub fn require_admin(&self, scope: ApiScope) -> Result<()> {
        if !self.is_admin() {
            return Err(AppError::Forbidden("Admin access required".into()));
        }
        self.require(scope)
    }

    /// Admins may act on anyone, everyone else only on themselves.
    pub fn require_self_or_admin(&self, user_id: &str, scope: ApiScope) -> Result<()> {
        self.require(scope)?;
        if self.is_admin() || self.user.id == user_id {
            Ok(())
        } else {
            Err(AppError::Forbidden("You can only access your own account".into()))
        }
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<ApiContext> {
    let raw = extract_api_key(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing API key".into()))?;
    let conn = state.db.get()?;
    let (user, key) = queries::get_user_by_api_key(&conn, raw)?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired API key".into()))?;
    Ok(ApiContext { user, key })
}

pub async fn api_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let ctx = authenticate(&state, request.headers())?;
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
