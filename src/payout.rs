//! Prize pool and payout calculation
//!
//! Pure functions, no I/O. The pool is always distributed exactly: the sum of
//! the returned payouts equals `PrizePool::final_pool`.
//!
//! Settings are bounded by `validate_pool` when a lobby opens. Within those
//! bounds, and the lobby participant cap, every pool fits in a `u64`.

use crate::types::{ParticipantId, PayoutRecord, PoolSettings};
use serde::{Deserialize, Serialize};

/// Percentage shares for 1st, 2nd and 3rd place in large matches
pub const PLACEMENT_SHARES: [u64; 3] = [50, 30, 20];

/// Matches with at most this many participants are winner-takes-all
pub const WINNER_TAKES_ALL_MAX_PLAYERS: usize = 5;

/// Largest accepted per-participant increment
pub const MAX_POOL_INCREMENT: u64 = 1_000_000_000;

/// Largest accepted bonus multiplier
pub const MAX_BONUS_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    #[error("pool increment {0} exceeds the maximum of {max}", max = MAX_POOL_INCREMENT)]
    IncrementTooLarge(u64),

    #[error("bonus multiplier {0} must be between 1 and {max}", max = MAX_BONUS_MULTIPLIER)]
    MultiplierOutOfRange(f64),
}

pub fn check_increment(increment: u64) -> Result<(), PoolError> {
    if increment > MAX_POOL_INCREMENT {
        return Err(PoolError::IncrementTooLarge(increment));
    }
    Ok(())
}

/// NaN and infinities are rejected along with values below 1
pub fn check_multiplier(multiplier: f64) -> Result<(), PoolError> {
    if !multiplier.is_finite() || !(1.0..=MAX_BONUS_MULTIPLIER).contains(&multiplier) {
        return Err(PoolError::MultiplierOutOfRange(multiplier));
    }
    Ok(())
}

pub fn validate_pool(settings: &PoolSettings) -> Result<(), PoolError> {
    check_increment(settings.increment)?;
    if let Some(rule) = &settings.bonus {
        check_multiplier(rule.multiplier)?;
    }
    Ok(())
}

fn clamp_to_u64(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizePool {
    pub increment: u64,
    pub base: u64,
    pub bonus_triggered: bool,
    pub final_pool: u64,
}

/// Derive the pool for `participants` distinct players
pub fn compute_pool(participants: usize, settings: &PoolSettings) -> PrizePool {
    let base = clamp_to_u64(u128::from(settings.increment) * participants as u128);

    let bonus = settings
        .bonus
        .filter(|rule| participants >= rule.required_players);

    let final_pool = match bonus {
        // `as` saturates on float to int casts; NaN becomes 0
        Some(rule) => (base as f64 * rule.multiplier).floor().max(0.0) as u64,
        None => base,
    };

    PrizePool {
        increment: settings.increment,
        base,
        bonus_triggered: bonus.is_some(),
        final_pool,
    }
}

/// Split the pool across the known placements (winner first, at most three)
pub fn distribute(pool: &PrizePool, participants: usize, placements: &[ParticipantId]) -> Vec<PayoutRecord> {
    let placements = &placements[..placements.len().min(PLACEMENT_SHARES.len())];
    if placements.is_empty() {
        return Vec::new();
    }

    let mut amounts = vec![0u64; placements.len()];

    if participants > WINNER_TAKES_ALL_MAX_PLAYERS {
        let total = u128::from(pool.final_pool);
        for (amount, share) in amounts.iter_mut().zip(PLACEMENT_SHARES) {
            // share <= 100, so the quotient never exceeds final_pool
            *amount = clamp_to_u64(total * u128::from(share) / 100);
        }
        let distributed: u128 = amounts.iter().map(|a| u128::from(*a)).sum();
        amounts[0] += clamp_to_u64(total - distributed);
    } else {
        amounts[0] = pool.final_pool;
    }

    placements
        .iter()
        .zip(amounts)
        .enumerate()
        .map(|(index, (participant, amount))| PayoutRecord {
            participant: participant.clone(),
            rank: (index + 1) as u8,
            amount,
        })
        .collect()
}
