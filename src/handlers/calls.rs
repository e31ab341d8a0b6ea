use crate::error::AppError;
use crate::state::AppState;
use crate::telephony::registry::ActiveCalls;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/calls/{call_id}`: the newest call record for a call.
pub async fn get_call_record(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let call_id = path.into_inner();
    let data = state.data.clone();
    let lookup_id = call_id.clone();

    let latest = web::block(move || data.latest_call_record(&lookup_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    match latest {
        Some((_, record)) => Ok(HttpResponse::Ok().json(record)),
        None => Err(AppError::NotFound(format!("No call record for {}", call_id))),
    }
}

/// `GET /api/v1/calls/active`: call ids with a live telephony session.
pub async fn list_active_calls(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let calls = state
        .registry
        .send(ActiveCalls)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "count": calls.len(),
        "calls": calls
    })))
}
