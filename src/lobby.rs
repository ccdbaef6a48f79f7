//! Lobby and match lifecycle
//!
//! `ArenaRegistry` owns the one active match per arena. Each slot holds a
//! `tokio::sync::Mutex<Lobby>` so join/leave/start/cancel on the same arena
//! are serialized; whichever of countdown or force-start takes the lock
//! first moves the match to `Running` and disarms the other.
//!
//! Once a match runs, a `SlotGuard` owned by the simulation task clears the
//! slot on drop, so completion, cancellation and panics all free the arena.

use crate::errors::LobbyError;
use crate::events::{EventKind, EventSink, MatchPublisher};
use crate::metrics::SurvivalMetrics;
use crate::payout::validate_pool;
use crate::simulation::{MatchReport, MatchSetup, SimulationEngine};
use crate::types::{ArenaKey, MatchPhase, Participant, ParticipantId, PoolSettings};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

const REPORT_CHANNEL_CAPACITY: usize = 64;

/// Default cap on participants per lobby
pub const MAX_LOBBY_PARTICIPANTS: usize = 10_000;

/// Ownership token for one match in one arena
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MatchHandle {
    pub arena: ArenaKey,
    pub match_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct LobbyOptions {
    pub host: ParticipantId,
    pub pool: PoolSettings,
    /// Auto-start after this long; `None` waits for a force-start
    pub countdown: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LobbySnapshot {
    pub arena: ArenaKey,
    pub match_id: Uuid,
    pub host: ParticipantId,
    pub phase: MatchPhase,
    pub participants: Vec<Participant>,
    pub pool: PoolSettings,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
}

struct Lobby {
    host: ParticipantId,
    phase: MatchPhase,
    participants: Vec<Participant>,
    joined_at: HashMap<ParticipantId, DateTime<Utc>>,
    pool: PoolSettings,
    created_at: DateTime<Utc>,
    starts_at: Option<DateTime<Utc>>,
    countdown: Option<JoinHandle<()>>,
}

struct ArenaSlot {
    match_id: Uuid,
    lobby: Mutex<Lobby>,
}

#[derive(Debug, Clone)]
enum StartTrigger {
    Countdown,
    Forced(ParticipantId),
}

pub struct ArenaRegistry {
    slots: DashMap<ArenaKey, Arc<ArenaSlot>>,
    engine: Arc<SimulationEngine>,
    events: Arc<dyn EventSink>,
    admins: HashSet<ParticipantId>,
    final_checkpoint: Duration,
    max_participants: usize,
    metrics: Option<Arc<SurvivalMetrics>>,
    reports: broadcast::Sender<Arc<MatchReport>>,
}

impl ArenaRegistry {
    pub fn new(engine: Arc<SimulationEngine>, events: Arc<dyn EventSink>) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            slots: DashMap::new(),
            engine,
            events,
            admins: HashSet::new(),
            final_checkpoint: Duration::from_secs(10),
            max_participants: MAX_LOBBY_PARTICIPANTS,
            metrics: None,
            reports,
        }
    }

    pub fn with_admins<I, S>(mut self, admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admins = admins.into_iter().map(ParticipantId::new).collect();
        self
    }

    pub fn with_final_checkpoint(mut self, final_checkpoint: Duration) -> Self {
        self.final_checkpoint = final_checkpoint;
        self
    }

    pub fn with_max_participants(mut self, max_participants: usize) -> Self {
        self.max_participants = max_participants;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SurvivalMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Reports of every match that ran to completion
    pub fn subscribe_reports(&self) -> broadcast::Receiver<Arc<MatchReport>> {
        self.reports.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.slots.len()
    }

    pub fn active_handle(&self, arena: &ArenaKey) -> Option<MatchHandle> {
        self.slots.get(arena).map(|slot| MatchHandle {
            arena: arena.clone(),
            match_id: slot.match_id,
        })
    }

    pub async fn snapshot(&self, arena: &ArenaKey) -> Option<LobbySnapshot> {
        let slot = self.slots.get(arena).map(|s| Arc::clone(s.value()))?;
        let lobby = slot.lobby.lock().await;
        Some(LobbySnapshot {
            arena: arena.clone(),
            match_id: slot.match_id,
            host: lobby.host.clone(),
            phase: lobby.phase,
            participants: lobby.participants.clone(),
            pool: lobby.pool,
            created_at: lobby.created_at,
            starts_at: lobby.starts_at,
        })
    }

    /// Open a lobby; fails if the arena already hosts a match or the pool
    /// settings are out of range
    pub fn open(self: &Arc<Self>, arena: ArenaKey, options: LobbyOptions) -> Result<MatchHandle, LobbyError> {
        validate_pool(&options.pool).map_err(|e| LobbyError::InvalidPool(e.to_string()))?;

        let handle = match self.slots.entry(arena.clone()) {
            Entry::Occupied(_) => return Err(LobbyError::AlreadyActive(arena.to_string())),
            Entry::Vacant(vacant) => {
                let handle = MatchHandle {
                    arena: arena.clone(),
                    match_id: Uuid::new_v4(),
                };
                let created_at = Utc::now();
                let countdown = options
                    .countdown
                    .map(|total| tokio::spawn(Arc::clone(self).run_countdown(handle.clone(), total)));
                let starts_at = options
                    .countdown
                    .and_then(|total| chrono::Duration::from_std(total).ok())
                    .map(|total| created_at + total);

                vacant.insert(Arc::new(ArenaSlot {
                    match_id: handle.match_id,
                    lobby: Mutex::new(Lobby {
                        host: options.host.clone(),
                        phase: MatchPhase::Lobby,
                        participants: Vec::new(),
                        joined_at: HashMap::new(),
                        pool: options.pool,
                        created_at,
                        starts_at,
                        countdown,
                    }),
                }));
                handle
            }
        };

        tracing::info!(arena = %arena, match_id = %handle.match_id, host = %options.host, "Lobby opened");
        self.publisher(&handle).notify(EventKind::LobbyOpened {
            host: options.host,
            pool: options.pool,
            countdown_secs: options.countdown.map(|d| d.as_secs()),
        });
        Ok(handle)
    }

    /// Returns `false` when the participant had already joined
    pub async fn join(&self, handle: &MatchHandle, participant: Participant) -> Result<bool, LobbyError> {
        let slot = self.slot(handle)?;
        let mut lobby = slot.lobby.lock().await;
        if lobby.phase != MatchPhase::Lobby {
            return Err(LobbyError::AlreadyStarted);
        }
        if lobby.participants.iter().any(|p| p.id == participant.id) {
            return Ok(false);
        }
        if lobby.participants.len() >= self.max_participants {
            return Err(LobbyError::Full(self.max_participants));
        }

        lobby.joined_at.insert(participant.id.clone(), Utc::now());
        lobby.participants.push(participant.clone());
        let count = lobby.participants.len();
        drop(lobby);

        tracing::debug!(arena = %handle.arena, participant = %participant.id, count, "Participant joined");
        self.publisher(handle)
            .notify(EventKind::ParticipantJoined { participant, count });
        Ok(true)
    }

    /// Returns `false` when the participant was not in the lobby
    pub async fn leave(&self, handle: &MatchHandle, participant: &ParticipantId) -> Result<bool, LobbyError> {
        let slot = self.slot(handle)?;
        let mut lobby = slot.lobby.lock().await;
        if lobby.phase != MatchPhase::Lobby {
            return Err(LobbyError::AlreadyStarted);
        }
        let before = lobby.participants.len();
        lobby.participants.retain(|p| &p.id != participant);
        if lobby.participants.len() == before {
            return Ok(false);
        }
        lobby.joined_at.remove(participant);
        let count = lobby.participants.len();
        drop(lobby);

        tracing::debug!(arena = %handle.arena, participant = %participant, count, "Participant left");
        self.publisher(handle).notify(EventKind::ParticipantLeft {
            participant: participant.clone(),
            count,
        });
        Ok(true)
    }

    /// Start now; only the host or an admin may do this
    pub async fn force_start(self: &Arc<Self>, handle: &MatchHandle, requested_by: &ParticipantId) -> Result<(), LobbyError> {
        self.begin(handle, StartTrigger::Forced(requested_by.clone())).await
    }

    /// Cancel a lobby before it starts. Running matches cannot be cancelled.
    pub async fn cancel(&self, handle: &MatchHandle, requested_by: &ParticipantId) -> Result<(), LobbyError> {
        let slot = self.slot(handle)?;
        let mut lobby = slot.lobby.lock().await;
        if !self.is_authorized(&lobby, requested_by) {
            return Err(LobbyError::Unauthorized(requested_by.to_string()));
        }
        if lobby.phase != MatchPhase::Lobby {
            return Err(LobbyError::AlreadyStarted);
        }

        if let Some(countdown) = lobby.countdown.take() {
            countdown.abort();
        }
        lobby.phase = MatchPhase::Complete;
        drop(lobby);

        self.release(handle);
        tracing::info!(arena = %handle.arena, match_id = %handle.match_id, by = %requested_by, "Lobby cancelled");
        self.publisher(handle).notify(EventKind::MatchCancelled {
            reason: format!("cancelled by {}", requested_by),
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_match("cancelled");
        }
        Ok(())
    }

    fn slot(&self, handle: &MatchHandle) -> Result<Arc<ArenaSlot>, LobbyError> {
        let slot = self
            .slots
            .get(&handle.arena)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| LobbyError::NoActiveMatch(handle.arena.to_string()))?;
        if slot.match_id != handle.match_id {
            return Err(LobbyError::StaleHandle(handle.match_id.to_string()));
        }
        Ok(slot)
    }

    fn is_authorized(&self, lobby: &Lobby, requested_by: &ParticipantId) -> bool {
        &lobby.host == requested_by || self.admins.contains(requested_by)
    }

    fn publisher(&self, handle: &MatchHandle) -> MatchPublisher {
        MatchPublisher::new(self.events.clone(), handle.arena.clone(), handle.match_id)
    }

    /// Clear the arena slot if it still belongs to `handle`
    fn release(&self, handle: &MatchHandle) {
        self.slots
            .remove_if(&handle.arena, |_, slot| slot.match_id == handle.match_id);
    }

    async fn begin(self: &Arc<Self>, handle: &MatchHandle, trigger: StartTrigger) -> Result<(), LobbyError> {
        let slot = self.slot(handle)?;
        let mut lobby = slot.lobby.lock().await;

        if let StartTrigger::Forced(requested_by) = &trigger {
            if !self.is_authorized(&lobby, requested_by) {
                return Err(LobbyError::Unauthorized(requested_by.to_string()));
            }
        }
        if lobby.phase != MatchPhase::Lobby {
            return Err(LobbyError::AlreadyStarted);
        }

        // The countdown task is the caller on an automatic start; detach instead of aborting it
        if let Some(countdown) = lobby.countdown.take() {
            if let StartTrigger::Forced(_) = trigger {
                countdown.abort();
            }
        }

        if lobby.participants.is_empty() {
            lobby.phase = MatchPhase::Complete;
            drop(lobby);
            self.release(handle);
            tracing::info!(arena = %handle.arena, match_id = %handle.match_id, "No participants, match cancelled");
            self.publisher(handle).notify(EventKind::MatchCancelled {
                reason: "no participants".to_string(),
            });
            if let Some(metrics) = &self.metrics {
                metrics.record_match("cancelled");
            }
            return Err(LobbyError::Empty);
        }

        lobby.phase = MatchPhase::Running;
        lobby.starts_at = Some(Utc::now());
        let setup = MatchSetup {
            arena: handle.arena.clone(),
            match_id: handle.match_id,
            participants: lobby.participants.clone(),
            pool: lobby.pool,
            created_at: lobby.created_at,
            joined_at: lobby.joined_at.clone(),
        };
        drop(lobby);

        tracing::info!(
            arena = %handle.arena,
            match_id = %handle.match_id,
            participants = setup.participants.len(),
            trigger = ?trigger,
            "Match locked"
        );

        let guard = SlotGuard {
            registry: Arc::clone(self),
            handle: handle.clone(),
        };
        let engine = Arc::clone(&self.engine);
        let reports = self.reports.clone();
        tokio::spawn(async move {
            let report = engine.run(setup).await;
            drop(guard);
            let _ = reports.send(Arc::new(report));
        });

        Ok(())
    }

    async fn run_countdown(self: Arc<Self>, handle: MatchHandle, total: Duration) {
        let started = tokio::time::Instant::now();
        let publisher = self.publisher(&handle);

        for remaining in countdown_checkpoints(total, self.final_checkpoint) {
            tokio::time::sleep_until(started + (total - remaining)).await;
            publisher.notify(EventKind::CountdownProgress {
                remaining_secs: remaining.as_secs(),
            });
        }
        tokio::time::sleep_until(started + total).await;

        match self.begin(&handle, StartTrigger::Countdown).await {
            Ok(()) => {}
            Err(LobbyError::Empty) => {}
            Err(e) => tracing::debug!(arena = %handle.arena, "Countdown start skipped: {}", e),
        }
    }
}

/// Frees the arena slot when the simulation task ends, however it ends
struct SlotGuard {
    registry: Arc<ArenaRegistry>,
    handle: MatchHandle,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.registry.release(&self.handle);
        tracing::debug!(arena = %self.handle.arena, match_id = %self.handle.match_id, "Arena slot released");
    }
}

/// Remaining-time checkpoints: 2/3, 1/3, then the final window, longest first
pub fn countdown_checkpoints(total: Duration, final_window: Duration) -> Vec<Duration> {
    let mut points = vec![total * 2 / 3, total / 3, final_window];
    points.retain(|point| !point.is_zero() && *point < total);
    points.sort_by(|a, b| b.cmp(a));
    points.dedup();
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentCatalog;
    use crate::events::EventBus;
    use crate::settlement::{RetryPolicy, SettlementGateway};

    fn registry() -> Arc<ArenaRegistry> {
        let events: Arc<dyn EventSink> = Arc::new(EventBus::new());
        let engine = SimulationEngine::new(
            Arc::new(ContentCatalog::default()),
            Arc::new(SettlementGateway::new(None, RetryPolicy::default())),
            events.clone(),
        );
        Arc::new(ArenaRegistry::new(Arc::new(engine), events).with_admins(["900"]))
    }

    fn options(host: &str) -> LobbyOptions {
        LobbyOptions {
            host: ParticipantId::new(host),
            pool: PoolSettings::default(),
            countdown: None,
        }
    }

    #[test]
    fn test_countdown_checkpoints() {
        let points = countdown_checkpoints(Duration::from_secs(60), Duration::from_secs(10));
        assert_eq!(
            points,
            vec![Duration::from_secs(40), Duration::from_secs(20), Duration::from_secs(10)]
        );

        let short = countdown_checkpoints(Duration::from_secs(15), Duration::from_secs(10));
        assert_eq!(short, vec![Duration::from_secs(10), Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn test_open_twice_rejected() {
        let registry = registry();
        let arena = ArenaKey::new("arena-1");
        registry.open(arena.clone(), options("1")).unwrap();

        let err = registry.open(arena, options("2")).unwrap_err();
        assert_eq!(err, LobbyError::AlreadyActive("arena-1".into()));
    }

    #[tokio::test]
    async fn test_join_and_leave_are_idempotent() {
        let registry = registry();
        let handle = registry.open(ArenaKey::new("a"), options("1")).unwrap();

        assert!(registry.join(&handle, Participant::new("10", "x")).await.unwrap());
        assert!(!registry.join(&handle, Participant::new("10", "x")).await.unwrap());
        assert!(registry.leave(&handle, &ParticipantId::new("10")).await.unwrap());
        assert!(!registry.leave(&handle, &ParticipantId::new("10")).await.unwrap());

        let snapshot = registry.snapshot(&handle.arena).await.unwrap();
        assert!(snapshot.participants.is_empty());
        assert_eq!(snapshot.phase, MatchPhase::Lobby);
    }

    #[tokio::test]
    async fn test_force_start_requires_host_or_admin() {
        let registry = registry();
        let handle = registry.open(ArenaKey::new("a"), options("1")).unwrap();
        registry.join(&handle, Participant::new("10", "x")).await.unwrap();

        let err = registry.force_start(&handle, &ParticipantId::new("10")).await.unwrap_err();
        assert!(matches!(err, LobbyError::Unauthorized(_)));
        assert!(registry.active_handle(&handle.arena).is_some());
    }

    #[tokio::test]
    async fn test_empty_start_cancels_and_frees_slot() {
        let registry = registry();
        let handle = registry.open(ArenaKey::new("a"), options("1")).unwrap();

        let err = registry.force_start(&handle, &ParticipantId::new("900")).await.unwrap_err();
        assert_eq!(err, LobbyError::Empty);
        assert!(registry.active_handle(&handle.arena).is_none());

        registry.open(ArenaKey::new("a"), options("1")).unwrap();
    }

    #[tokio::test]
    async fn test_stale_handle_rejected() {
        let registry = registry();
        let first = registry.open(ArenaKey::new("a"), options("1")).unwrap();
        registry.cancel(&first, &ParticipantId::new("1")).await.unwrap();
        let _second = registry.open(ArenaKey::new("a"), options("1")).unwrap();

        let err = registry.join(&first, Participant::new("10", "x")).await.unwrap_err();
        assert!(matches!(err, LobbyError::StaleHandle(_)));
    }

    #[tokio::test]
    async fn test_open_rejects_out_of_range_pool() {
        let registry = registry();
        let mut huge = options("1");
        huge.pool.increment = u64::MAX;
        let err = registry.open(ArenaKey::new("a"), huge).unwrap_err();
        assert!(matches!(err, LobbyError::InvalidPool(_)));

        let mut boosted = options("1");
        boosted.pool.bonus = Some(crate::types::BonusRule {
            required_players: 2,
            multiplier: 1e12,
        });
        let err = registry.open(ArenaKey::new("a"), boosted).unwrap_err();
        assert!(matches!(err, LobbyError::InvalidPool(_)));

        // Nothing was reserved by the rejected attempts
        assert!(registry.active_handle(&ArenaKey::new("a")).is_none());
        registry.open(ArenaKey::new("a"), options("1")).unwrap();
    }

    #[tokio::test]
    async fn test_join_rejected_when_lobby_full() {
        let events: Arc<dyn EventSink> = Arc::new(EventBus::new());
        let engine = SimulationEngine::new(
            Arc::new(ContentCatalog::default()),
            Arc::new(SettlementGateway::new(None, RetryPolicy::default())),
            events.clone(),
        );
        let registry = Arc::new(ArenaRegistry::new(Arc::new(engine), events).with_max_participants(2));
        let handle = registry.open(ArenaKey::new("a"), options("1")).unwrap();

        registry.join(&handle, Participant::new("10", "x")).await.unwrap();
        registry.join(&handle, Participant::new("11", "y")).await.unwrap();
        // Rejoining is still a no-op rather than an error
        assert!(!registry.join(&handle, Participant::new("11", "y")).await.unwrap());

        let err = registry.join(&handle, Participant::new("12", "z")).await.unwrap_err();
        assert_eq!(err, LobbyError::Full(2));

        registry.leave(&handle, &ParticipantId::new("10")).await.unwrap();
        assert!(registry.join(&handle, Participant::new("12", "z")).await.unwrap());
    }

    #[tokio::test]
    async fn test_join_after_start_rejected() {
        let registry = registry();
        let mut reports = registry.subscribe_reports();
        let handle = registry.open(ArenaKey::new("a"), options("1")).unwrap();
        registry.join(&handle, Participant::new("10", "x")).await.unwrap();
        registry.join(&handle, Participant::new("11", "y")).await.unwrap();

        registry.force_start(&handle, &ParticipantId::new("1")).await.unwrap();

        // Either still running (rejected) or already finished (slot gone)
        let err = registry.join(&handle, Participant::new("12", "z")).await.unwrap_err();
        assert!(matches!(err, LobbyError::AlreadyStarted | LobbyError::NoActiveMatch(_)));

        let report = reports.recv().await.unwrap();
        assert_eq!(report.match_id, handle.match_id);
        assert!(registry.active_handle(&handle.arena).is_none());
    }
}
