use axum::{extract::State, response::Redirect};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Path;
use crate::jwt::verify_download_token;
use crate::models::ContentDelivery;
use crate::services::access::has_access;

/// Exchange a signed download token for a redirect to the file.
/// Access is re-checked so a refund revokes links that are still unexpired.
pub async fn download(State(state): State<AppState>, Path(token): Path<String>) -> Result<Redirect> {
    let claims = verify_download_token(&state.master_key, &token)?;
    let conn = state.db.get()?;
    let now = chrono::Utc::now().timestamp();

    if !has_access(&conn, &claims.user_id, &claims.product_id, now)? {
        return Err(AppError::Forbidden("You no longer have access to this product".into()));
    }
    let product = queries::get_product_by_id(&conn, &claims.product_id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    match product.content {
        ContentDelivery::Download { url, .. } => {
            tracing::info!("Download served: product={}, user={}", product.id, claims.user_id);
            Ok(Redirect::temporary(&url))
        }
        _ => Err(AppError::NotFound("Product has no download".into())),
    }
}
