//! End-to-end lobby lifecycle: open, join, start, simulate, record and pay out.
//! Runs with zero reveal timing and no ledger, so settlements report
//! `ledger_not_configured` while everything else behaves as in production.

use std::sync::Arc;
use std::time::Duration;
use survival::{
    content::ContentCatalog,
    errors::LobbyError,
    events::{EventBus, EventKind},
    lobby::{ArenaRegistry, LobbyOptions},
    settlement::{FailureReason, RetryPolicy, SettlementGateway},
    simulation::{EngineTiming, MatchReport, SimulationEngine},
    stats_store::{RocksStatsStore, StatsRange, StatsStore},
    storage::OptimizedStorage,
    types::{ArenaKey, Participant, ParticipantId, PoolSettings},
};
use tokio::sync::broadcast;

struct Harness {
    _dir: tempfile::TempDir,
    registry: Arc<ArenaRegistry>,
    events: EventBus,
    stats: Arc<RocksStatsStore>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = OptimizedStorage::new(dir.path().to_str().expect("utf8 path")).expect("open db");
    let stats = Arc::new(RocksStatsStore::new(storage));
    let events = EventBus::new();

    let gateway = Arc::new(SettlementGateway::new(None, RetryPolicy::default()));
    let engine = SimulationEngine::new(Arc::new(ContentCatalog::default()), gateway, Arc::new(events.clone()))
        .with_stats(stats.clone())
        .with_timing(EngineTiming::default())
        .with_rng_seed(Some(7));

    let registry = Arc::new(
        ArenaRegistry::new(Arc::new(engine), Arc::new(events.clone())).with_admins(vec!["admin".to_string()]),
    );

    Harness {
        _dir: dir,
        registry,
        events,
        stats,
    }
}

fn options(host: &str, countdown: Option<Duration>) -> LobbyOptions {
    LobbyOptions {
        host: ParticipantId::new(host),
        pool: PoolSettings {
            increment: 50,
            bonus: None,
        },
        countdown,
    }
}

async fn next_report(reports: &mut broadcast::Receiver<Arc<MatchReport>>) -> Arc<MatchReport> {
    tokio::time::timeout(Duration::from_secs(10), reports.recv())
        .await
        .expect("match did not finish in time")
        .expect("report channel closed")
}

#[tokio::test]
async fn test_eight_player_match_pays_top_three() {
    let h = harness();
    let mut reports = h.registry.subscribe_reports();
    let arena = ArenaKey::new("arena-8");

    let handle = h.registry.open(arena.clone(), options("1001", None)).unwrap();
    for i in 1..=8 {
        let joined = h
            .registry
            .join(&handle, Participant::new(format!("{}", 1000 + i), format!("Player {}", i)))
            .await
            .unwrap();
        assert!(joined);
    }

    h.registry.force_start(&handle, &ParticipantId::new("1001")).await.unwrap();
    let report = next_report(&mut reports).await;

    assert_eq!(report.match_id, handle.match_id);
    assert!(report.rounds > 0);
    // Only the podium is ranked: three distinct participants, winner first
    assert_eq!(report.placements.len(), 3);
    let mut podium: Vec<_> = report.placements.iter().map(|p| p.id.clone()).collect();
    podium.sort();
    podium.dedup();
    assert_eq!(podium.len(), 3);
    assert_eq!(report.pool.final_pool, 400);

    let amounts: Vec<u64> = report.payouts.iter().map(|p| p.amount).collect();
    assert_eq!(amounts, vec![200, 120, 80]);
    assert_eq!(amounts.iter().sum::<u64>(), report.pool.final_pool);
    for (payout, placed) in report.payouts.iter().zip(&report.placements) {
        assert_eq!(payout.participant, placed.id);
    }

    assert_eq!(report.settlements.len(), 3);
    assert!(report
        .settlements
        .iter()
        .all(|s| !s.ok && s.reason == Some(FailureReason::LedgerNotConfigured)));

    // Slot is free again once the report is out
    assert!(h.registry.active_handle(&arena).is_none());
    assert!(h.registry.open(arena.clone(), options("1001", None)).is_ok());

    let game_id = report.game_id.expect("game recorded");
    let winner = report.winner().unwrap().id.clone();
    for (rank, placed) in report.placements.iter().enumerate() {
        let row = h.stats.load_stat_row(game_id, &placed.id).unwrap().expect("podium row");
        assert_eq!(row.placement, Some(rank as u8 + 1));
    }

    let leaderboard = h.stats.monthly_top_winners(10).await.unwrap();
    assert_eq!(leaderboard[0].participant, winner);
    assert_eq!(leaderboard[0].firsts, 1);

    let winner_stats = h.stats.user_stats(&winner, StatsRange::All).await.unwrap();
    assert_eq!(winner_stats.games, 1);
    assert_eq!(winner_stats.firsts, 1);
}

#[tokio::test]
async fn test_single_participant_walkover() {
    let h = harness();
    let mut reports = h.registry.subscribe_reports();

    let handle = h.registry.open(ArenaKey::new("solo"), options("42", None)).unwrap();
    h.registry.join(&handle, Participant::new("42", "Lonely")).await.unwrap();
    h.registry.force_start(&handle, &ParticipantId::new("42")).await.unwrap();

    let report = next_report(&mut reports).await;
    assert_eq!(report.rounds, 0);
    assert_eq!(report.winner().unwrap().id, ParticipantId::new("42"));
    assert_eq!(report.payouts.len(), 1);
    assert_eq!(report.payouts[0].amount, 50);
}

#[tokio::test]
async fn test_small_match_is_winner_takes_all() {
    let h = harness();
    let mut reports = h.registry.subscribe_reports();

    let handle = h.registry.open(ArenaKey::new("small"), options("1", None)).unwrap();
    for i in 1..=4 {
        h.registry
            .join(&handle, Participant::new(format!("{}", i), format!("P{}", i)))
            .await
            .unwrap();
    }
    h.registry.force_start(&handle, &ParticipantId::new("admin")).await.unwrap();

    let report = next_report(&mut reports).await;
    let amounts: Vec<u64> = report.payouts.iter().map(|p| p.amount).collect();
    assert_eq!(amounts, vec![200, 0, 0]);
    // Zero shares are not sent to the ledger
    assert_eq!(report.settlements.len(), 1);
}

#[tokio::test]
async fn test_countdown_starts_match_automatically() {
    let h = harness();
    let mut reports = h.registry.subscribe_reports();
    let mut events = h.events.subscribe();
    let arena = ArenaKey::new("timed");

    let handle = h
        .registry
        .open(arena.clone(), options("5", Some(Duration::from_millis(200))))
        .unwrap();
    for i in 1..=3 {
        h.registry
            .join(&handle, Participant::new(format!("{}", i), format!("P{}", i)))
            .await
            .unwrap();
    }

    let report = next_report(&mut reports).await;
    assert_eq!(report.match_id, handle.match_id);
    assert_eq!(report.placements.len(), 3);
    assert!(h.registry.active_handle(&arena).is_none());

    let mut saw_start = false;
    let mut saw_completion = false;
    while let Ok(event) = events.try_recv() {
        match event.kind {
            EventKind::MatchStarted { participants, .. } => {
                assert_eq!(participants, 3);
                saw_start = true;
            }
            EventKind::MatchCompleted { .. } => saw_completion = true,
            _ => {}
        }
    }
    assert!(saw_start);
    assert!(saw_completion);
}

#[tokio::test]
async fn test_countdown_with_empty_lobby_cancels() {
    let h = harness();
    let mut events = h.events.subscribe();
    let arena = ArenaKey::new("empty");

    h.registry
        .open(arena.clone(), options("5", Some(Duration::from_millis(50))))
        .unwrap();

    let cancelled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let EventKind::MatchCancelled { reason } = event.kind {
                        return reason;
                    }
                }
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .expect("no cancellation");

    assert_eq!(cancelled, "no participants");
    assert!(h.registry.active_handle(&arena).is_none());
}

#[tokio::test]
async fn test_cancel_frees_arena_and_invalidates_handle() {
    let h = harness();
    let arena = ArenaKey::new("cancel-me");

    let handle = h.registry.open(arena.clone(), options("9", None)).unwrap();
    h.registry.join(&handle, Participant::new("10", "Ten")).await.unwrap();

    assert!(matches!(
        h.registry.cancel(&handle, &ParticipantId::new("10")).await,
        Err(LobbyError::Unauthorized(_))
    ));
    h.registry.cancel(&handle, &ParticipantId::new("9")).await.unwrap();
    assert!(h.registry.active_handle(&arena).is_none());

    let reopened = h.registry.open(arena.clone(), options("9", None)).unwrap();
    assert_ne!(reopened.match_id, handle.match_id);
    assert!(matches!(
        h.registry.join(&handle, Participant::new("11", "Eleven")).await,
        Err(LobbyError::StaleHandle(_))
    ));
}

#[tokio::test]
async fn test_join_times_are_recorded_per_participant() {
    let h = harness();
    let mut reports = h.registry.subscribe_reports();

    let handle = h.registry.open(ArenaKey::new("staggered"), options("1", None)).unwrap();
    for id in ["1", "2", "3"] {
        h.registry.join(&handle, Participant::new(id, id)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    h.registry.force_start(&handle, &ParticipantId::new("1")).await.unwrap();

    let report = next_report(&mut reports).await;
    let game_id = report.game_id.expect("game recorded");
    let game = h.stats.load_game(game_id).unwrap().expect("game row");

    let joined: Vec<_> = ["1", "2", "3"]
        .iter()
        .map(|id| {
            h.stats
                .load_join_time(game_id, &ParticipantId::new(*id))
                .unwrap()
                .expect("join time")
        })
        .collect();
    assert!(joined[0] >= game.started_at);
    assert!(joined[1] - joined[0] >= chrono::Duration::milliseconds(20));
    assert!(joined[2] - joined[1] >= chrono::Duration::milliseconds(20));
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let h = harness();
    let mut reports = h.registry.subscribe_reports();

    let handle = h.registry.open(ArenaKey::new("twice"), options("1", None)).unwrap();
    h.registry.join(&handle, Participant::new("1", "One")).await.unwrap();
    h.registry.join(&handle, Participant::new("2", "Two")).await.unwrap();
    h.registry.force_start(&handle, &ParticipantId::new("1")).await.unwrap();

    let second = h.registry.force_start(&handle, &ParticipantId::new("1")).await;
    // Either still running, or already done and released
    assert!(matches!(
        second,
        Err(LobbyError::AlreadyStarted) | Err(LobbyError::NoActiveMatch(_))
    ));

    next_report(&mut reports).await;
}
