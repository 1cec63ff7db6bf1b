use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// Where clients open their matchmaking socket, and which control plane backs it.
pub async fn get_gateway(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data": {
            "path": "/ws",
            "encoding": "json",
            "cluster_backend": state.cluster_backend.as_str(),
        }
    }))
}
