use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Placeholder shown instead of secrets.
const REDACTED: &str = "***";

/// Effective configuration, read-only. Secrets are redacted.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let mut config = state.get_config().clone();
    if !config.engine.api_key.is_empty() {
        config.engine.api_key = REDACTED.to_string();
    }

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}
