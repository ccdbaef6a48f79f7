//! Core domain types shared by the lobby, simulation and settlement layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Native platform identity of a participant (a chat-platform user id)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Platform ids are numeric snowflakes; anything else cannot be used as a
    /// native ledger credential.
    pub fn is_native_credential(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Venue hosting at most one active match (a chat channel id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArenaKey(pub String);

impl ArenaKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for ArenaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPhase {
    Lobby,
    Running,
    Complete,
}

/// Bonus rule: the pool is multiplied once enough players joined
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BonusRule {
    pub required_players: usize,
    pub multiplier: f64,
}

/// Prize pool settings fixed when the lobby opens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Points added to the pool per participant
    pub increment: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus: Option<BonusRule>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            increment: 50,
            bonus: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeCategory {
    Environmental,
    SelfInflicted,
    Sabotage,
}

impl NarrativeCategory {
    pub const ALL: [NarrativeCategory; 3] = [
        NarrativeCategory::Environmental,
        NarrativeCategory::SelfInflicted,
        NarrativeCategory::Sabotage,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EliminationEvent {
    pub victim: Participant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killer: Option<Participant>,
    pub category: NarrativeCategory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResurrectionEvent {
    pub revived: Participant,
}

/// One payout line produced by the prize calculator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub participant: ParticipantId,
    /// 1-based finishing position
    pub rank: u8,
    pub amount: u64,
}

pub fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_credential_detection() {
        assert!(ParticipantId::new("123456789012345678").is_native_credential());
        assert!(!ParticipantId::new("").is_native_credential());
        assert!(!ParticipantId::new("player-one").is_native_credential());
    }

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&NarrativeCategory::SelfInflicted).unwrap();
        assert_eq!(json, "\"self_inflicted\"");
    }
}
