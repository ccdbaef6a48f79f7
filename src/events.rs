//! Display events produced for the presentation layer
//!
//! The engine never renders text itself; it publishes `MatchEvent`s that a
//! chat front-end (or the WebSocket endpoint) turns into messages.

use crate::payout::PrizePool;
use crate::types::{ArenaKey, Participant, ParticipantId, PoolSettings, unix_millis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEvent {
    pub arena: ArenaKey,
    pub match_id: Uuid,
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    LobbyOpened {
        host: ParticipantId,
        pool: PoolSettings,
        #[serde(skip_serializing_if = "Option::is_none")]
        countdown_secs: Option<u64>,
    },
    ParticipantJoined {
        participant: Participant,
        count: usize,
    },
    ParticipantLeft {
        participant: ParticipantId,
        count: usize,
    },
    CountdownProgress {
        remaining_secs: u64,
    },
    MatchCancelled {
        reason: String,
    },
    MatchStarted {
        participants: usize,
        pool: PrizePool,
    },
    RoundStarted {
        round: usize,
        alive: usize,
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image: Option<String>,
    },
    RevealLine {
        round: usize,
        line: String,
    },
    /// Full round text; sent after the progressive reveal or in its place when it fails
    RoundRevealed {
        round: usize,
        text: String,
    },
    FinalStandings {
        placements: Vec<Participant>,
        pool: PrizePool,
    },
    PayoutNotification {
        participant: ParticipantId,
        amount: u64,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    MatchCompleted {
        rounds: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        winner: Option<ParticipantId>,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EventError {
    #[error("event sink closed")]
    Closed,

    #[error("event rejected: {0}")]
    Rejected(String),
}

/// Destination for display events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: MatchEvent) -> Result<(), EventError>;
}

/// Broadcast bus fanning events out to every subscriber
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MatchEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: MatchEvent) -> Result<(), EventError> {
        // Nobody listening is not a failure
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Publisher bound to one arena and match
#[derive(Clone)]
pub struct MatchPublisher {
    sink: Arc<dyn EventSink>,
    arena: ArenaKey,
    match_id: Uuid,
}

impl MatchPublisher {
    pub fn new(sink: Arc<dyn EventSink>, arena: ArenaKey, match_id: Uuid) -> Self {
        Self { sink, arena, match_id }
    }

    pub fn emit(&self, kind: EventKind) -> Result<(), EventError> {
        self.sink.publish(MatchEvent {
            arena: self.arena.clone(),
            match_id: self.match_id,
            timestamp: unix_millis(),
            kind,
        })
    }

    /// Best-effort publish; failures are only logged
    pub fn notify(&self, kind: EventKind) {
        if let Err(e) = self.emit(kind) {
            tracing::warn!(arena = %self.arena, match_id = %self.match_id, "Failed to publish event: {}", e);
        }
    }
}
