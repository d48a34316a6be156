//! Short-lived signed download links.
//!
//! A `Download` product never exposes its file URL directly; buyers get an
//! HS256 token that the public download endpoint exchanges for a redirect.

use jwt_simple::prelude::*;

use crate::crypto::{DOWNLOAD_TOKEN_PURPOSE, MasterKey};
use crate::error::{AppError, Result};

pub const DOWNLOAD_TOKEN_TTL_MINS: u64 = 10;
const ISSUER: &str = "gateflow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadClaims {
    pub product_id: String,
    pub user_id: String,
}

fn signing_key(master_key: &MasterKey) -> Result<HS256Key> {
    Ok(HS256Key::from_bytes(&master_key.derive(DOWNLOAD_TOKEN_PURPOSE)?))
}

pub fn issue_download_token(master_key: &MasterKey, product_id: &str, user_id: &str) -> Result<String> {
    let claims = Claims::with_custom_claims(
        DownloadClaims {
            product_id: product_id.to_string(),
            user_id: user_id.to_string(),
        },
        Duration::from_mins(DOWNLOAD_TOKEN_TTL_MINS),
    )
    .with_issuer(ISSUER);

    signing_key(master_key)?
        .authenticate(claims)
        .map_err(|e| AppError::Internal(format!("Failed to sign download token: {}", e)))
}

pub fn verify_download_token(master_key: &MasterKey, token: &str) -> Result<DownloadClaims> {
    let options = VerificationOptions {
        allowed_issuers: Some(HashSet::from_strings(&[ISSUER])),
        ..Default::default()
    };
    let claims = signing_key(master_key)?
        .verify_token::<DownloadClaims>(token, Some(options))
        .map_err(|e| {
            tracing::debug!("Download token rejected: {}", e);
            AppError::Gone("Download link is invalid or has expired".into())
        })?;
    Ok(claims.custom)
}
