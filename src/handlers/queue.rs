use crate::error::AppError;
use crate::queue::entry::QueueStatus;
use crate::queue::QueueStore;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub status: Option<QueueStatus>,
}

/// `GET /api/v1/queue`: entries in scan order plus per-status counts.
pub async fn list_queue(
    state: web::Data<AppState>,
    query: web::Query<QueueQuery>,
) -> Result<HttpResponse, AppError> {
    let store = QueueStore::new(state.data.clone());
    let filter = query.into_inner().status;

    let (entries, counts) = web::block(move || -> Result<_, AppError> {
        let entries: Vec<_> = store
            .list()?
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| filter.map_or(true, |s| entry.status == s))
            .collect();
        let counts = store.counts()?;
        Ok((entries, counts))
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "counts": counts,
        "entries": entries
    })))
}
