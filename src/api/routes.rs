//! Route Definitions

use super::{handlers::*, websocket::arena_events_handler};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Lobby lifecycle
        .route("/arenas/:arena", get(arena_handler))
        .route("/arenas/:arena/lobby", post(open_lobby_handler).delete(cancel_lobby_handler))
        .route("/arenas/:arena/join", post(join_handler))
        .route("/arenas/:arena/leave", post(leave_handler))
        .route("/arenas/:arena/start", post(start_handler))
        .route("/arenas/:arena/events", get(arena_events_handler))
        // Statistics
        .route("/leaderboard/monthly", get(leaderboard_handler))
        .route("/users/:participant/stats", get(user_stats_handler))
        // Administration
        .route(
            "/admin/credentials/:participant",
            put(put_credential_handler).get(get_credential_handler),
        )
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
