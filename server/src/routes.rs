use axum::Router;
use tower_http::trace::TraceLayer;

use crate::chat::history;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (session resolved inside the handler so failures
    // can be reported with close codes)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Authenticated REST (SessionUser extractor validates the session token)
    let api_routes = Router::new()
        .route("/api/users", axum::routing::get(history::list_users))
        .route("/api/messages", axum::routing::get(history::message_history))
        .route("/api/hub/stats", axum::routing::get(history::hub_stats));

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
