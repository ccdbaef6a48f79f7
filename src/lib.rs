//! Survival - multiplayer elimination tournaments with ledger-settled prizes
//!
//! Participants join an arena lobby, the simulation eliminates them in waves
//! (occasionally reviving one), and the prize pool is split across the top
//! finishers and credited through an external ledger.

pub mod api;
pub mod config;
pub mod content;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod lobby;
pub mod metrics;
pub mod payout;
pub mod settlement;
pub mod simulation;
pub mod stats_store;
pub mod storage;
pub mod types;

pub use config::{ConfigLoader, SurvivalConfig};
pub use errors::{LobbyError, SurvivalError, SurvivalResult};
pub use events::{EventBus, EventKind, EventSink, MatchEvent};
pub use lobby::{ArenaRegistry, LobbyOptions, MatchHandle};
pub use payout::{compute_pool, distribute, PrizePool};
pub use settlement::{FailureReason, SettlementGateway, SettlementOutcome};
pub use simulation::{MatchReport, SimulationEngine};
pub use types::{ArenaKey, Participant, ParticipantId, PoolSettings};
