//! API Request and Response Models

use crate::stats_store::StatsRange;
use crate::types::BonusRule;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_arenas: usize,
    pub ledger_configured: bool,
}

/// POST /arenas/:arena/lobby
#[derive(Debug, Clone, Deserialize)]
pub struct OpenLobbyRequest {
    pub host: String,
    #[serde(default)]
    pub increment: Option<u64>,
    #[serde(default)]
    pub bonus: Option<BonusRule>,
    #[serde(default)]
    pub countdown_secs: Option<u64>,
}

/// Body for start and cancel
#[derive(Debug, Clone, Deserialize)]
pub struct ActorRequest {
    pub requested_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    pub participant: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaveRequest {
    pub participant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipResponse {
    /// False when the call was a no-op
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserStatsQuery {
    #[serde(default)]
    pub range: Option<StatsRange>,
}

/// PUT /admin/credentials/:participant
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialOverrideRequest {
    pub value: String,
    pub credential_type: String,
    #[serde(default)]
    pub account_id: Option<String>,
}
