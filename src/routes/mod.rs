mod gateway;
mod health;
mod matches;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .route("/ws", get(crate::gateway::ws_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/gateway", get(gateway::get_gateway))
        // Read-only views of orchestrator state
        .route("/matches", get(matches::list_matches))
        .route("/matches/{match_id}", get(matches::get_match))
        .route("/queue", get(matches::queue_stats))
}
