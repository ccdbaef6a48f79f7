//! Request Handlers

use super::{
    errors::ApiError,
    middleware::{validate_admin_api_key, RequestId},
    models::*,
};
use crate::{
    credentials::{CredentialOverride, CredentialStore},
    events::EventBus,
    lobby::{ArenaRegistry, LobbyOptions, LobbySnapshot, MatchHandle},
    metrics::SurvivalMetrics,
    stats_store::{LeaderboardEntry, StatsRange, StatsStore, UserStats},
    types::{ArenaKey, Participant, ParticipantId, PoolSettings},
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Shared application state
pub struct AppState {
    pub registry: Arc<ArenaRegistry>,
    pub events: EventBus,
    pub stats: Arc<dyn StatsStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub metrics: Arc<SurvivalMetrics>,
    /// Pool used when a lobby request does not override it
    pub pool_defaults: PoolSettings,
    pub default_countdown: Option<Duration>,
    pub admin_api_key: Option<String>,
    pub ledger_configured: bool,
}

impl AppState {
    fn handle(&self, arena: &ArenaKey, request_id: &RequestId) -> Result<MatchHandle, ApiError> {
        self.registry.active_handle(arena).ok_or_else(|| {
            ApiError::not_found(request_id.0.clone(), format!("No active match in arena {}", arena))
        })
    }
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_arenas: state.registry.active_count(),
        ledger_configured: state.ledger_configured,
    })
}

/// POST /arenas/:arena/lobby
pub async fn open_lobby_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(arena): Path<String>,
    Json(request): Json<OpenLobbyRequest>,
) -> Result<(StatusCode, Json<MatchHandle>), ApiError> {
    if request.host.trim().is_empty() {
        return Err(ApiError::bad_request(request_id.0, "host is required".to_string()));
    }
    let pool = PoolSettings {
        increment: request.increment.unwrap_or(state.pool_defaults.increment),
        bonus: request.bonus.or(state.pool_defaults.bonus),
    };
    let countdown = request
        .countdown_secs
        .map(Duration::from_secs)
        .or(state.default_countdown);

    let handle = state
        .registry
        .open(
            ArenaKey::new(arena),
            LobbyOptions {
                host: ParticipantId::new(request.host),
                pool,
                countdown,
            },
        )
        .map_err(|e| ApiError::from_lobby(request_id.0, e))?;

    Ok((StatusCode::CREATED, Json(handle)))
}

/// DELETE /arenas/:arena/lobby
pub async fn cancel_lobby_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(arena): Path<String>,
    Json(request): Json<ActorRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let handle = state.handle(&ArenaKey::new(arena), &request_id)?;
    state
        .registry
        .cancel(&handle, &ParticipantId::new(request.requested_by))
        .await
        .map_err(|e| ApiError::from_lobby(request_id.0, e))?;

    Ok(Json(ActionResponse {
        status: "cancelled".to_string(),
    }))
}

/// POST /arenas/:arena/join
pub async fn join_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(arena): Path<String>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<MembershipResponse>, ApiError> {
    if request.participant.trim().is_empty() {
        return Err(ApiError::bad_request(request_id.0, "participant is required".to_string()));
    }
    let handle = state.handle(&ArenaKey::new(arena), &request_id)?;
    let display_name = request
        .display_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| request.participant.clone());

    let changed = state
        .registry
        .join(&handle, Participant::new(request.participant, display_name))
        .await
        .map_err(|e| ApiError::from_lobby(request_id.0, e))?;

    Ok(Json(MembershipResponse { changed }))
}

/// POST /arenas/:arena/leave
pub async fn leave_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(arena): Path<String>,
    Json(request): Json<LeaveRequest>,
) -> Result<Json<MembershipResponse>, ApiError> {
    let handle = state.handle(&ArenaKey::new(arena), &request_id)?;
    let changed = state
        .registry
        .leave(&handle, &ParticipantId::new(request.participant))
        .await
        .map_err(|e| ApiError::from_lobby(request_id.0, e))?;

    Ok(Json(MembershipResponse { changed }))
}

/// POST /arenas/:arena/start
pub async fn start_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(arena): Path<String>,
    Json(request): Json<ActorRequest>,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
    let handle = state.handle(&ArenaKey::new(arena), &request_id)?;
    state
        .registry
        .force_start(&handle, &ParticipantId::new(request.requested_by))
        .await
        .map_err(|e| ApiError::from_lobby(request_id.0, e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ActionResponse {
            status: "running".to_string(),
        }),
    ))
}

/// GET /arenas/:arena
pub async fn arena_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(arena): Path<String>,
) -> Result<Json<LobbySnapshot>, ApiError> {
    let arena = ArenaKey::new(arena);
    state
        .registry
        .snapshot(&arena)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(request_id.0, format!("No active match in arena {}", arena)))
}

/// GET /leaderboard/monthly?limit={n}
pub async fn leaderboard_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);

    state
        .stats
        .monthly_top_winners(limit)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_survival(request_id.0, e))
}

/// GET /users/:participant/stats?range=all|month
pub async fn user_stats_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(participant): Path<String>,
    Query(query): Query<UserStatsQuery>,
) -> Result<Json<UserStats>, ApiError> {
    let range = query.range.unwrap_or(StatsRange::All);
    state
        .stats
        .user_stats(&ParticipantId::new(participant), range)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_survival(request_id.0, e))
}

/// PUT /admin/credentials/:participant
pub async fn put_credential_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(participant): Path<String>,
    Json(request): Json<CredentialOverrideRequest>,
) -> Result<Json<CredentialOverride>, ApiError> {
    validate_admin_api_key(&headers, state.admin_api_key.as_deref(), &request_id.0)?;

    if request.value.trim().is_empty() && request.account_id.as_deref().unwrap_or("").is_empty() {
        return Err(ApiError::bad_request(
            request_id.0,
            "either value or account_id is required".to_string(),
        ));
    }

    let credential = CredentialOverride {
        participant: ParticipantId::new(participant),
        value: request.value,
        credential_type: request.credential_type,
        account_id: request.account_id.unwrap_or_default(),
        updated_at: Utc::now(),
    };
    state
        .credentials
        .put_override(credential.clone())
        .await
        .map_err(|e| ApiError::from_survival(request_id.0, e))?;

    Ok(Json(credential))
}

/// GET /admin/credentials/:participant
pub async fn get_credential_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(participant): Path<String>,
) -> Result<Json<CredentialOverride>, ApiError> {
    validate_admin_api_key(&headers, state.admin_api_key.as_deref(), &request_id.0)?;

    let participant = ParticipantId::new(participant);
    state
        .credentials
        .get_override(&participant)
        .await
        .map_err(|e| ApiError::from_survival(request_id.0.clone(), e))?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(request_id.0, format!("No credential override for {}", participant)))
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
