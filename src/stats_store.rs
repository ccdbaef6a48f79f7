//! Durable match statistics stored in RocksDB.
//!
//! Every write is additive (read-modify-write under a store-wide lock), so the
//! engine can interleave counter updates with rounds without conflicts between
//! matches. Rows are never deleted.

use crate::{
    errors::{StorageError, SurvivalError, SurvivalResult},
    storage::OptimizedStorage,
    types::{ArenaKey, ParticipantId},
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

const GAME_PREFIX: &str = "game:";
const STAT_PREFIX: &str = "stat:";
const USER_INDEX_PREFIX: &str = "user:";
const JOIN_PREFIX: &str = "join:";
const NEXT_GAME_ID_KEY: &[u8] = b"meta:next_game_id";

pub type GameId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: GameId,
    pub arena: ArenaKey,
    pub started_at: DateTime<Utc>,
}

/// Per (game, participant) counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStatRow {
    pub game_id: GameId,
    pub participant: ParticipantId,
    pub eliminations: u64,
    pub deaths: u64,
    pub images_used: u64,
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub placement: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub participant: ParticipantId,
    pub firsts: u64,
    pub seconds: u64,
    pub thirds: u64,
    pub games: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub games: u64,
    pub eliminations: u64,
    pub deaths: u64,
    pub images_used: u64,
    pub firsts: u64,
    pub seconds: u64,
    pub thirds: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsRange {
    All,
    Month,
}

impl StatsRange {
    fn start(&self) -> Option<DateTime<Utc>> {
        match self {
            StatsRange::All => None,
            StatsRange::Month => Some(start_of_month(Utc::now())),
        }
    }
}

pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn create_match(&self, arena: &ArenaKey, started_at: DateTime<Utc>) -> SurvivalResult<GameId>;

    async fn record_join(&self, game_id: GameId, participant: &ParticipantId, at: DateTime<Utc>) -> SurvivalResult<()>;

    async fn add_elimination(&self, game_id: GameId, killer: &ParticipantId, n: u64) -> SurvivalResult<()>;

    async fn add_death(&self, game_id: GameId, victim: &ParticipantId, n: u64) -> SurvivalResult<()>;

    async fn add_image_use(&self, game_id: GameId, participant: &ParticipantId, asset_ref: &str) -> SurvivalResult<()>;

    async fn set_placement(&self, game_id: GameId, participant: &ParticipantId, rank: u8) -> SurvivalResult<()>;

    async fn monthly_top_winners(&self, limit: usize) -> SurvivalResult<Vec<LeaderboardEntry>>;

    async fn user_stats(&self, participant: &ParticipantId, range: StatsRange) -> SurvivalResult<UserStats>;
}

fn game_key(game_id: GameId) -> Vec<u8> {
    format!("{}{:020}", GAME_PREFIX, game_id).into_bytes()
}

fn stat_key(game_id: GameId, participant: &ParticipantId) -> Vec<u8> {
    format!("{}{:020}:{}", STAT_PREFIX, game_id, participant).into_bytes()
}

fn stat_prefix(game_id: GameId) -> Vec<u8> {
    format!("{}{:020}:", STAT_PREFIX, game_id).into_bytes()
}

fn user_index_key(participant: &ParticipantId, game_id: GameId) -> Vec<u8> {
    format!("{}{}:{:020}", USER_INDEX_PREFIX, participant, game_id).into_bytes()
}

fn user_index_prefix(participant: &ParticipantId) -> Vec<u8> {
    format!("{}{}:", USER_INDEX_PREFIX, participant).into_bytes()
}

fn join_key(game_id: GameId, participant: &ParticipantId) -> Vec<u8> {
    format!("{}{:020}:{}", JOIN_PREFIX, game_id, participant).into_bytes()
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> SurvivalResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        SurvivalError::Storage(StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)))
    })
}

fn encode<T: Serialize>(value: &T, what: &str) -> SurvivalResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        SurvivalError::Storage(StorageError::WriteFailed(format!("Failed to encode {}: {}", what, e)))
    })
}

/// RocksDB-backed statistics store
pub struct RocksStatsStore {
    storage: OptimizedStorage,
    write_lock: Mutex<()>,
}

impl RocksStatsStore {
    pub fn new(storage: OptimizedStorage) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub fn storage(&self) -> &OptimizedStorage {
        &self.storage
    }

    fn read(&self, key: &[u8]) -> SurvivalResult<Option<Vec<u8>>> {
        self.storage
            .get(key)
            .map_err(|e| SurvivalError::Storage(StorageError::ReadFailed(e.to_string())))
    }

    fn scan(&self, prefix: &[u8]) -> SurvivalResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.storage
            .scan_prefix(prefix)
            .map_err(|e| SurvivalError::Storage(StorageError::ReadFailed(e.to_string())))
    }

    pub fn load_game(&self, game_id: GameId) -> SurvivalResult<Option<GameRecord>> {
        match self.read(&game_key(game_id))? {
            Some(bytes) => Ok(Some(decode(&bytes, "game record")?)),
            None => Ok(None),
        }
    }

    pub fn load_stat_row(&self, game_id: GameId, participant: &ParticipantId) -> SurvivalResult<Option<GameStatRow>> {
        match self.read(&stat_key(game_id, participant))? {
            Some(bytes) => Ok(Some(decode(&bytes, "stat row")?)),
            None => Ok(None),
        }
    }

    /// When the participant entered the lobby of `game_id`
    pub fn load_join_time(
        &self,
        game_id: GameId,
        participant: &ParticipantId,
    ) -> SurvivalResult<Option<DateTime<Utc>>> {
        let Some(bytes) = self.read(&join_key(game_id, participant))? else {
            return Ok(None);
        };
        let raw = std::str::from_utf8(&bytes)
            .map_err(|e| StorageError::CorruptedData(format!("Failed to decode join time: {}", e)))?;
        let at = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| StorageError::CorruptedData(format!("Failed to decode join time: {}", e)))?;
        Ok(Some(at.with_timezone(&Utc)))
    }

    /// Upsert the stat row, creating it (and its user index entry) on first touch
    fn update_row<F>(&self, game_id: GameId, participant: &ParticipantId, apply: F) -> SurvivalResult<()>
    where
        F: FnOnce(&mut GameStatRow),
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::WriteFailed("stats write lock poisoned".to_string()))?;

        let mut row = self.load_stat_row(game_id, participant)?.unwrap_or_else(|| GameStatRow {
            game_id,
            participant: participant.clone(),
            ..GameStatRow::default()
        });
        apply(&mut row);

        let items = vec![
            (stat_key(game_id, participant), encode(&row, "stat row")?),
            (user_index_key(participant, game_id), Vec::new()),
        ];
        self.storage
            .batch_write(&items)
            .map_err(|e| SurvivalError::Storage(StorageError::WriteFailed(e.to_string())))
    }

    fn games_since(&self, since: Option<DateTime<Utc>>) -> SurvivalResult<Vec<GameRecord>> {
        let mut games = Vec::new();
        for (_key, value) in self.scan(GAME_PREFIX.as_bytes())? {
            let game: GameRecord = decode(&value, "game record")?;
            if since.map_or(true, |start| game.started_at >= start) {
                games.push(game);
            }
        }
        Ok(games)
    }

    fn rows_for_game(&self, game_id: GameId) -> SurvivalResult<Vec<GameStatRow>> {
        self.scan(&stat_prefix(game_id))?
            .into_iter()
            .map(|(_key, value)| decode(&value, "stat row"))
            .collect()
    }

    fn leaderboard_since(&self, since: Option<DateTime<Utc>>, limit: usize) -> SurvivalResult<Vec<LeaderboardEntry>> {
        let mut totals: HashMap<ParticipantId, LeaderboardEntry> = HashMap::new();

        for game in self.games_since(since)? {
            for row in self.rows_for_game(game.game_id)? {
                let entry = totals.entry(row.participant.clone()).or_insert_with(|| LeaderboardEntry {
                    participant: row.participant.clone(),
                    firsts: 0,
                    seconds: 0,
                    thirds: 0,
                    games: 0,
                });
                entry.games += 1;
                match row.placement {
                    Some(1) => entry.firsts += 1,
                    Some(2) => entry.seconds += 1,
                    Some(3) => entry.thirds += 1,
                    _ => {}
                }
            }
        }

        let mut entries: Vec<LeaderboardEntry> = totals
            .into_values()
            .filter(|e| e.firsts + e.seconds + e.thirds > 0)
            .collect();
        entries.sort_by(|a, b| {
            b.firsts
                .cmp(&a.firsts)
                .then(b.seconds.cmp(&a.seconds))
                .then(b.thirds.cmp(&a.thirds))
                .then(a.participant.cmp(&b.participant))
        });
        entries.truncate(limit);
        Ok(entries)
    }
}

#[async_trait]
impl StatsStore for RocksStatsStore {
    async fn create_match(&self, arena: &ArenaKey, started_at: DateTime<Utc>) -> SurvivalResult<GameId> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::WriteFailed("stats write lock poisoned".to_string()))?;

        let game_id = match self.read(NEXT_GAME_ID_KEY)? {
            Some(bytes) => <[u8; 8]>::try_from(bytes.as_slice())
                .map(u64::from_be_bytes)
                .map_err(|_| StorageError::CorruptedData("next game id is not 8 bytes".to_string()))?,
            None => 1,
        };

        let record = GameRecord {
            game_id,
            arena: arena.clone(),
            started_at,
        };
        let items = vec![
            (game_key(game_id), encode(&record, "game record")?),
            (NEXT_GAME_ID_KEY.to_vec(), (game_id + 1).to_be_bytes().to_vec()),
        ];
        self.storage
            .batch_write(&items)
            .map_err(|e| SurvivalError::Storage(StorageError::WriteFailed(e.to_string())))?;

        tracing::debug!(game_id, arena = %arena, "Created game record");
        Ok(game_id)
    }

    async fn record_join(&self, game_id: GameId, participant: &ParticipantId, at: DateTime<Utc>) -> SurvivalResult<()> {
        self.update_row(game_id, participant, |_| {})?;
        self.storage
            .put(&join_key(game_id, participant), at.to_rfc3339().as_bytes())
            .map_err(|e| SurvivalError::Storage(StorageError::WriteFailed(e.to_string())))
    }

    async fn add_elimination(&self, game_id: GameId, killer: &ParticipantId, n: u64) -> SurvivalResult<()> {
        self.update_row(game_id, killer, |row| row.eliminations += n)
    }

    async fn add_death(&self, game_id: GameId, victim: &ParticipantId, n: u64) -> SurvivalResult<()> {
        self.update_row(game_id, victim, |row| row.deaths += n)
    }

    async fn add_image_use(&self, game_id: GameId, participant: &ParticipantId, asset_ref: &str) -> SurvivalResult<()> {
        self.update_row(game_id, participant, |row| {
            row.images_used += 1;
            row.assets.push(asset_ref.to_string());
        })
    }

    async fn set_placement(&self, game_id: GameId, participant: &ParticipantId, rank: u8) -> SurvivalResult<()> {
        self.update_row(game_id, participant, |row| row.placement = Some(rank))
    }

    async fn monthly_top_winners(&self, limit: usize) -> SurvivalResult<Vec<LeaderboardEntry>> {
        self.leaderboard_since(StatsRange::Month.start(), limit)
    }

    async fn user_stats(&self, participant: &ParticipantId, range: StatsRange) -> SurvivalResult<UserStats> {
        let since = range.start();
        let mut stats = UserStats::default();

        for (key, _value) in self.scan(&user_index_prefix(participant))? {
            let Some(game_id) = key
                .rsplit(|b| *b == b':')
                .next()
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .and_then(|raw| raw.parse::<GameId>().ok())
            else {
                tracing::warn!(participant = %participant, "Skipping malformed user index key");
                continue;
            };

            let Some(game) = self.load_game(game_id)? else {
                continue;
            };
            if since.map_or(false, |start| game.started_at < start) {
                continue;
            }
            let Some(row) = self.load_stat_row(game_id, participant)? else {
                continue;
            };

            stats.games += 1;
            stats.eliminations += row.eliminations;
            stats.deaths += row.deaths;
            stats.images_used += row.images_used;
            match row.placement {
                Some(1) => stats.firsts += 1,
                Some(2) => stats.seconds += 1,
                Some(3) => stats.thirds += 1,
                _ => {}
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_store() -> (tempfile::TempDir, RocksStatsStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = OptimizedStorage::new(dir.path()).unwrap();
        (dir, RocksStatsStore::new(storage))
    }

    #[tokio::test]
    async fn test_counters_are_additive() {
        let (_dir, store) = open_store();
        let arena = ArenaKey::new("arena");
        let alice = ParticipantId::new("1");

        let game = store.create_match(&arena, Utc::now()).await.unwrap();
        store.record_join(game, &alice, Utc::now()).await.unwrap();
        store.add_elimination(game, &alice, 1).await.unwrap();
        store.add_elimination(game, &alice, 2).await.unwrap();
        store.add_death(game, &alice, 1).await.unwrap();
        store.add_image_use(game, &alice, "stage-cave.png").await.unwrap();
        store.set_placement(game, &alice, 2).await.unwrap();

        let row = store.load_stat_row(game, &alice).unwrap().unwrap();
        assert_eq!(row.eliminations, 3);
        assert_eq!(row.deaths, 1);
        assert_eq!(row.images_used, 1);
        assert_eq!(row.assets, vec!["stage-cave.png".to_string()]);
        assert_eq!(row.placement, Some(2));
    }

    #[tokio::test]
    async fn test_game_ids_are_sequential() {
        let (_dir, store) = open_store();
        let arena = ArenaKey::new("arena");

        let first = store.create_match(&arena, Utc::now()).await.unwrap();
        let second = store.create_match(&arena, Utc::now()).await.unwrap();
        assert_eq!(second, first + 1);
        assert_eq!(store.load_game(first).unwrap().unwrap().arena, arena);
    }

    #[tokio::test]
    async fn test_user_stats_range_filter() {
        let (_dir, store) = open_store();
        let arena = ArenaKey::new("arena");
        let bob = ParticipantId::new("2");

        let old = store
            .create_match(&arena, start_of_month(Utc::now()) - Duration::days(3))
            .await
            .unwrap();
        store.set_placement(old, &bob, 1).await.unwrap();

        let current = store.create_match(&arena, Utc::now()).await.unwrap();
        store.add_elimination(current, &bob, 4).await.unwrap();
        store.set_placement(current, &bob, 3).await.unwrap();

        let all = store.user_stats(&bob, StatsRange::All).await.unwrap();
        assert_eq!(all.games, 2);
        assert_eq!(all.firsts, 1);
        assert_eq!(all.thirds, 1);

        let month = store.user_stats(&bob, StatsRange::Month).await.unwrap();
        assert_eq!(month.games, 1);
        assert_eq!(month.eliminations, 4);
        assert_eq!(month.firsts, 0);
    }

    #[tokio::test]
    async fn test_monthly_leaderboard_ordering() {
        let (_dir, store) = open_store();
        let arena = ArenaKey::new("arena");
        let (a, b, c) = (ParticipantId::new("a"), ParticipantId::new("b"), ParticipantId::new("c"));

        for winner in [&a, &b, &a] {
            let game = store.create_match(&arena, Utc::now()).await.unwrap();
            store.record_join(game, &c, Utc::now()).await.unwrap();
            store.set_placement(game, winner, 1).await.unwrap();
        }

        let board = store.monthly_top_winners(10).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].participant, a);
        assert_eq!(board[0].firsts, 2);
        assert_eq!(board[0].games, 2);
        assert_eq!(board[1].participant, b);

        assert_eq!(store.monthly_top_winners(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_join_time_round_trips() {
        let (_dir, store) = open_store();
        let alice = ParticipantId::new("1");
        let started = Utc::now();
        let joined = started - Duration::seconds(42);

        let game = store.create_match(&ArenaKey::new("arena"), started).await.unwrap();
        store.record_join(game, &alice, joined).await.unwrap();

        assert_eq!(store.load_join_time(game, &alice).unwrap(), Some(joined));
        assert_eq!(store.load_join_time(game, &ParticipantId::new("2")).unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreadable_row_is_not_overwritten() {
        let (_dir, store) = open_store();
        let alice = ParticipantId::new("1");
        let game = store.create_match(&ArenaKey::new("arena"), Utc::now()).await.unwrap();
        store.storage().put(&stat_key(game, &alice), b"not json").unwrap();

        let err = store.add_elimination(game, &alice, 1).await.unwrap_err();
        assert!(matches!(err, SurvivalError::Storage(StorageError::CorruptedData(_))));
        assert_eq!(store.storage().get(&stat_key(game, &alice)).unwrap(), Some(b"not json".to_vec()));
    }

    #[tokio::test]
    async fn test_corrupt_game_counter_does_not_reuse_ids() {
        let (_dir, store) = open_store();
        let arena = ArenaKey::new("arena");
        let first = store.create_match(&arena, Utc::now()).await.unwrap();
        store.storage().put(NEXT_GAME_ID_KEY, b"xx").unwrap();

        assert!(store.create_match(&ArenaKey::new("other"), Utc::now()).await.is_err());
        assert_eq!(store.load_game(first).unwrap().unwrap().arena, arena);
    }
}
