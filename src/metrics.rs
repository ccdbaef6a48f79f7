//! Prometheus counters for matches and settlement

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct SurvivalMetrics {
    registry: Registry,
    matches: IntCounterVec,
    eliminations: IntCounter,
    resurrections: IntCounter,
    settlements: IntCounterVec,
    settled_points: IntCounter,
}

impl SurvivalMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let matches = IntCounterVec::new(
            Opts::new("survival_matches_total", "Matches finished, by outcome"),
            &["outcome"],
        )?;
        let eliminations = IntCounter::new("survival_eliminations_total", "Participants eliminated")?;
        let resurrections = IntCounter::new("survival_resurrections_total", "Participants revived")?;
        let settlements = IntCounterVec::new(
            Opts::new("survival_settlements_total", "Ledger settlement attempts, by result"),
            &["result"],
        )?;
        let settled_points = IntCounter::new("survival_settled_points_total", "Points credited to the ledger")?;

        registry.register(Box::new(matches.clone()))?;
        registry.register(Box::new(eliminations.clone()))?;
        registry.register(Box::new(resurrections.clone()))?;
        registry.register(Box::new(settlements.clone()))?;
        registry.register(Box::new(settled_points.clone()))?;

        Ok(Self {
            registry,
            matches,
            eliminations,
            resurrections,
            settlements,
            settled_points,
        })
    }

    /// `outcome` is one of `completed`, `walkover`, `cancelled`
    pub fn record_match(&self, outcome: &str) {
        self.matches.with_label_values(&[outcome]).inc();
    }

    pub fn record_eliminations(&self, count: u64) {
        self.eliminations.inc_by(count);
    }

    pub fn record_resurrection(&self) {
        self.resurrections.inc();
    }

    /// `result` is `ok` or the failure reason code
    pub fn record_settlement(&self, result: &str, amount: u64) {
        self.settlements.with_label_values(&[result]).inc();
        if result == "ok" {
            self.settled_points.inc_by(amount);
        }
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
