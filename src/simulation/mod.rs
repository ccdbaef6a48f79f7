//! Elimination simulation
//!
//! `round` holds the pure per-round math; `engine` drives a whole match with
//! reveal timing, statistics, payouts and settlement.

pub mod engine;
pub mod round;

pub use engine::{EngineTiming, MatchReport, MatchSetup, SimulationEngine};
pub use round::{kills_for, play_round, RoundOutcome, RoundState, RESURRECTION_PROBABILITY};
