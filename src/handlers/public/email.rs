use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::Result;
use crate::extractors::Json;
use crate::validation::{EmailCheck, check_email};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateEmailRequest {
    pub email: String,
}

pub async fn validate_email(Json(input): Json<ValidateEmailRequest>) -> Result<Json<EmailCheck>> {
    Ok(Json(check_email(&input.email)))
}
