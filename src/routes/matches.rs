use axum::extract::{Path, State};
use axum::Json;

use crate::error::AppError;
use crate::orchestrator::matches::Match;
use crate::state::AppState;

fn match_json(m: &Match) -> serde_json::Value {
    serde_json::json!({
        "id": m.id,
        "players": m.usernames(),
        "workload_name": m.workload_name,
        "endpoint_name": m.endpoint_name,
        "pod_url": m.pod_url,
        "status": m.status,
        "created_at": m.created_at
    })
}

pub async fn list_matches(state: State<AppState>) -> Json<serde_json::Value> {
    let matches = state.orchestrator.list_matches().await;
    let data: Vec<serde_json::Value> = matches.iter().map(match_json).collect();
    Json(serde_json::json!({ "data": data }))
}

pub async fn get_match(
    state: State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let match_id: u64 = match_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid match id: {match_id}")))?;
    let m = state
        .orchestrator
        .get_match(match_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("match {match_id} not found")))?;
    Ok(Json(serde_json::json!({ "data": match_json(&m) })))
}

pub async fn queue_stats(state: State<AppState>) -> Json<serde_json::Value> {
    let stats = state.orchestrator.queue_stats().await;
    Json(serde_json::json!({
        "data": {
            "waiting": stats.waiting,
            "sessions": stats.sessions,
            "connections": state.orchestrator.dispatcher().len()
        }
    }))
}
