use super::round::{play_round, select_image, RoundOutcome, RoundState};
use crate::config::SimulationConfig;
use crate::content::{ContentCatalog, ImageBag};
use crate::errors::SurvivalResult;
use crate::events::{EventKind, EventSink, MatchPublisher};
use crate::metrics::SurvivalMetrics;
use crate::payout::{compute_pool, distribute, PrizePool};
use crate::settlement::{SettlementContext, SettlementGateway, SettlementOutcome};
use crate::stats_store::{GameId, StatsStore};
use crate::types::{ArenaKey, Participant, ParticipantId, PayoutRecord, PoolSettings};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineTiming {
    pub reveal_line_delay: Duration,
    pub round_pause: Duration,
}

impl EngineTiming {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            reveal_line_delay: config.reveal_line_delay(),
            round_pause: config.round_pause(),
        }
    }
}

/// Everything the engine needs from a locked lobby
#[derive(Debug, Clone)]
pub struct MatchSetup {
    pub arena: ArenaKey,
    pub match_id: Uuid,
    pub participants: Vec<Participant>,
    pub pool: PoolSettings,
    pub created_at: DateTime<Utc>,
    /// When each participant entered the lobby; absent entries use `created_at`
    pub joined_at: HashMap<ParticipantId, DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub match_id: Uuid,
    pub game_id: Option<GameId>,
    pub rounds: usize,
    /// Winner first
    pub placements: Vec<Participant>,
    pub pool: PrizePool,
    pub payouts: Vec<PayoutRecord>,
    pub settlements: Vec<SettlementOutcome>,
}

impl MatchReport {
    pub fn winner(&self) -> Option<&Participant> {
        self.placements.first()
    }
}

pub struct SimulationEngine {
    catalog: Arc<ContentCatalog>,
    gateway: Arc<SettlementGateway>,
    events: Arc<dyn EventSink>,
    stats: Option<Arc<dyn StatsStore>>,
    metrics: Option<Arc<SurvivalMetrics>>,
    timing: EngineTiming,
    rng_seed: Option<u64>,
}

impl SimulationEngine {
    pub fn new(catalog: Arc<ContentCatalog>, gateway: Arc<SettlementGateway>, events: Arc<dyn EventSink>) -> Self {
        Self {
            catalog,
            gateway,
            events,
            stats: None,
            metrics: None,
            timing: EngineTiming::default(),
            rng_seed: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsStore>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SurvivalMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_timing(mut self, timing: EngineTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_rng_seed(mut self, seed: Option<u64>) -> Self {
        self.rng_seed = seed;
        self
    }

    fn rng(&self) -> StdRng {
        match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Run a started match to completion. Store and ledger failures are
    /// logged and reported, never propagated.
    pub async fn run(&self, setup: MatchSetup) -> MatchReport {
        let publisher = MatchPublisher::new(self.events.clone(), setup.arena.clone(), setup.match_id);
        let participant_count = setup.participants.len();
        let pool = compute_pool(participant_count, &setup.pool);

        tracing::info!(
            arena = %setup.arena,
            match_id = %setup.match_id,
            participants = participant_count,
            pool = pool.final_pool,
            bonus = pool.bonus_triggered,
            "Match started"
        );

        let game_id = self.open_game(&setup).await;
        publisher.notify(EventKind::MatchStarted {
            participants: participant_count,
            pool,
        });

        let (rounds, placements) = if participant_count == 1 {
            tracing::info!(arena = %setup.arena, "Single participant, awarding walkover");
            (0, setup.participants.clone())
        } else {
            self.play_rounds(&publisher, game_id, setup.participants.clone()).await
        };

        if let Some(game_id) = game_id {
            for (index, participant) in placements.iter().enumerate() {
                self.stats_write("set_placement", |stats| {
                    let rank = (index + 1) as u8;
                    async move { stats.set_placement(game_id, &participant.id, rank).await }
                })
                .await;
            }
        }

        publisher.notify(EventKind::FinalStandings {
            placements: placements.clone(),
            pool,
        });

        let ids: Vec<_> = placements.iter().map(|p| p.id.clone()).collect();
        let payouts = distribute(&pool, participant_count, &ids);
        let settlements = self.settle(&setup, &placements, &payouts).await;

        for outcome in &settlements {
            publisher.notify(EventKind::PayoutNotification {
                participant: outcome.participant.clone(),
                amount: outcome.amount,
                ok: outcome.ok,
                reason: outcome.reason.as_ref().map(ToString::to_string),
            });
        }

        publisher.notify(EventKind::MatchCompleted {
            rounds,
            winner: placements.first().map(|p| p.id.clone()),
        });

        if let Some(metrics) = &self.metrics {
            metrics.record_match(if participant_count == 1 { "walkover" } else { "completed" });
        }

        tracing::info!(
            arena = %setup.arena,
            match_id = %setup.match_id,
            rounds,
            winner = ?placements.first().map(|p| &p.id),
            "Match completed"
        );

        MatchReport {
            match_id: setup.match_id,
            game_id,
            rounds,
            placements,
            pool,
            payouts,
            settlements,
        }
    }

    async fn open_game(&self, setup: &MatchSetup) -> Option<GameId> {
        let stats = self.stats.as_ref()?;
        let game_id = match stats.create_match(&setup.arena, setup.created_at).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(arena = %setup.arena, "Failed to create stats record: {}", e);
                return None;
            }
        };

        for participant in &setup.participants {
            let joined_at = setup
                .joined_at
                .get(&participant.id)
                .copied()
                .unwrap_or(setup.created_at);
            if let Err(e) = stats.record_join(game_id, &participant.id, joined_at).await {
                tracing::warn!(game_id, participant = %participant.id, "Failed to record join: {}", e);
            }
        }
        Some(game_id)
    }

    async fn stats_write<'a, F, Fut>(&'a self, operation: &str, write: F)
    where
        F: FnOnce(&'a dyn StatsStore) -> Fut,
        Fut: std::future::Future<Output = SurvivalResult<()>>,
    {
        let Some(stats) = &self.stats else {
            return;
        };
        if let Err(e) = write(stats.as_ref()).await {
            tracing::warn!(operation, "Stats write failed: {}", e);
        }
    }

    async fn play_rounds(
        &self,
        publisher: &MatchPublisher,
        game_id: Option<GameId>,
        participants: Vec<Participant>,
    ) -> (usize, Vec<Participant>) {
        let mut rng = self.rng();
        let mut bag = ImageBag::new(self.catalog.images.clone());
        let mut state = RoundState::new(participants);
        let mut round = 0;

        while !state.is_finished() {
            let image = select_image(round, &self.catalog, &mut bag, &mut rng);
            let outcome = play_round(&mut state, round, &self.catalog, &mut rng);

            if let Some(game_id) = game_id {
                self.record_round(game_id, &outcome, image.as_deref()).await;
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_eliminations(outcome.eliminations.len() as u64);
                if outcome.resurrection.is_some() {
                    metrics.record_resurrection();
                }
            }

            publisher.notify(EventKind::RoundStarted {
                round: round + 1,
                alive: outcome.alive_at_start,
                stage: outcome.stage.clone(),
                image,
            });
            self.reveal(publisher, round + 1, &outcome.lines).await;

            tracing::debug!(
                round = round + 1,
                eliminated = outcome.eliminations.len(),
                revived = outcome.resurrection.is_some(),
                alive = state.alive().len(),
                "Round finished"
            );

            if !self.timing.round_pause.is_zero() {
                tokio::time::sleep(self.timing.round_pause).await;
            }
            round += 1;
        }

        (round, state.final_ranking())
    }

    async fn record_round(&self, game_id: GameId, outcome: &RoundOutcome, image: Option<&str>) {
        for event in &outcome.eliminations {
            self.stats_write("add_death", |stats| async move {
                stats.add_death(game_id, &event.victim.id, 1).await
            })
            .await;
            if let Some(killer) = &event.killer {
                self.stats_write("add_elimination", |stats| async move {
                    stats.add_elimination(game_id, &killer.id, 1).await
                })
                .await;
            }
        }

        let Some(image) = image else {
            return;
        };
        if let Some(participant) = self.catalog.image_reward(image) {
            self.stats_write("add_image_use", |stats| async move {
                stats.add_image_use(game_id, participant, image).await
            })
            .await;
        }
    }

    /// Progressive reveal, one line per delay. A publish failure stops the
    /// animation; the full text is always sent at the end.
    async fn reveal(&self, publisher: &MatchPublisher, round: usize, lines: &[String]) {
        for line in lines {
            if !self.timing.reveal_line_delay.is_zero() {
                tokio::time::sleep(self.timing.reveal_line_delay).await;
            }
            if let Err(e) = publisher.emit(EventKind::RevealLine {
                round,
                line: line.clone(),
            }) {
                tracing::warn!(round, "Progressive reveal aborted: {}", e);
                break;
            }
        }

        publisher.notify(EventKind::RoundRevealed {
            round,
            text: lines.join("\n"),
        });
    }

    async fn settle(
        &self,
        setup: &MatchSetup,
        placements: &[Participant],
        payouts: &[PayoutRecord],
    ) -> Vec<SettlementOutcome> {
        let owed: Vec<(Participant, u64)> = payouts
            .iter()
            .filter_map(|payout| {
                placements
                    .iter()
                    .find(|p| p.id == payout.participant)
                    .map(|p| (p.clone(), payout.amount))
            })
            .collect();

        let context = SettlementContext {
            arena: setup.arena.clone(),
            match_id: setup.match_id,
        };
        self.gateway.settle_all(&owed, &context).await
    }
}
