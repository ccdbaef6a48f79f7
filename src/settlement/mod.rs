//! Settlement gateway: credits prize payouts to the external ledger
//!
//! `settle` never returns an error. Every expected failure class becomes a
//! `SettlementOutcome` with a `FailureReason`, and every outcome is mirrored
//! to the configured audit sinks.
//!
//! Delivery is at-least-once: no idempotency key is sent, so a request that
//! timed out after the ledger applied it will be applied again on retry.

pub mod audit;
pub mod ledger;
pub mod retry;
pub mod strategy;

pub use audit::{AuditSink, SettlementReport, TracingAuditSink, WebhookAuditSink};
pub use ledger::{HttpLedgerClient, LedgerApi, LedgerError, LedgerMember, SearchType};
pub use retry::RetryPolicy;
pub use strategy::{Attempt, ResolutionStrategy, StrategyEnv};

use crate::config::LedgerConfig;
use crate::credentials::CredentialStore;
use crate::metrics::SurvivalMetrics;
use crate::types::{ArenaKey, Participant, ParticipantId};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const AUDIT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    MissingDiscordId,
    ManualOverrideFailed,
    MemberNotFound,
    NoUsableCredential,
    LedgerNotConfigured,
    /// Raw transport or status error after retries were exhausted
    Transport(String),
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::MissingDiscordId => "missing_discord_id",
            FailureReason::ManualOverrideFailed => "manual_override_failed",
            FailureReason::MemberNotFound => "member_not_found",
            FailureReason::NoUsableCredential => "no_usable_credential",
            FailureReason::LedgerNotConfigured => "ledger_not_configured",
            FailureReason::Transport(_) => "transport_error",
        }
    }

    /// A broken override needs admin attention, so it outranks lookup misses
    fn precedence(&self) -> u8 {
        match self {
            FailureReason::ManualOverrideFailed => 3,
            FailureReason::MissingDiscordId => 2,
            FailureReason::MemberNotFound | FailureReason::NoUsableCredential => 1,
            FailureReason::LedgerNotConfigured | FailureReason::Transport(_) => 0,
        }
    }

    /// Highest precedence wins; ties go to the later strategy
    fn most_relevant(reasons: Vec<FailureReason>) -> Option<FailureReason> {
        reasons.into_iter().max_by_key(FailureReason::precedence)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(error) => f.write_str(error),
            other => f.write_str(other.code()),
        }
    }
}

impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementOutcome {
    pub participant: ParticipantId,
    pub ok: bool,
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl SettlementOutcome {
    pub fn settled(participant: ParticipantId, amount: u64, strategy: &str, credential: String) -> Self {
        Self {
            participant,
            ok: true,
            amount,
            reason: None,
            strategy: Some(strategy.to_string()),
            credential: Some(credential),
        }
    }

    pub fn failed(participant: ParticipantId, amount: u64, reason: FailureReason) -> Self {
        Self {
            participant,
            ok: false,
            amount,
            reason: Some(reason),
            strategy: None,
            credential: None,
        }
    }

    fn result_label(&self) -> &'static str {
        match &self.reason {
            None => "ok",
            Some(reason) => reason.code(),
        }
    }
}

/// Match the payout belongs to, for audit and logging
#[derive(Debug, Clone)]
pub struct SettlementContext {
    pub arena: ArenaKey,
    pub match_id: Uuid,
}

pub struct SettlementGateway {
    ledger: Option<Arc<dyn LedgerApi>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
    retry: RetryPolicy,
    audit: Vec<Arc<dyn AuditSink>>,
    metrics: Option<Arc<SurvivalMetrics>>,
}

impl SettlementGateway {
    /// `ledger: None` means credentials are missing; every settle reports
    /// `ledger_not_configured` without touching the network.
    pub fn new(ledger: Option<Arc<dyn LedgerApi>>, retry: RetryPolicy) -> Self {
        Self {
            ledger,
            credentials: None,
            strategies: strategy::default_strategies(),
            retry,
            audit: vec![Arc::new(TracingAuditSink)],
            metrics: None,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let retry = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        );

        let ledger: Option<Arc<dyn LedgerApi>> = match config.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Some(Arc::new(HttpLedgerClient::new(
                &config.base_url,
                token,
                config.realm_point_id.clone(),
                Duration::from_millis(config.request_timeout_ms),
            )?)),
            None => {
                tracing::warn!("No ledger token configured; payouts will not be settled");
                None
            }
        };

        let mut gateway = Self::new(ledger, retry);
        if let Some(url) = config.audit_webhook_url.as_deref().filter(|u| !u.is_empty()) {
            match WebhookAuditSink::new(url, AUDIT_WEBHOOK_TIMEOUT) {
                Ok(sink) => gateway = gateway.with_audit_sink(Arc::new(sink)),
                Err(e) => tracing::warn!("Audit webhook disabled: {}", e),
            }
        }
        Ok(gateway)
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit.push(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SurvivalMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.ledger.is_some()
    }

    pub async fn settle(&self, participant: &Participant, amount: u64, context: &SettlementContext) -> SettlementOutcome {
        let outcome = self.resolve(participant, amount).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_settlement(outcome.result_label(), outcome.amount);
        }

        let report = SettlementReport {
            participant,
            arena: &context.arena,
            match_id: context.match_id,
            outcome: &outcome,
        };
        for sink in &self.audit {
            sink.record(&report).await;
        }

        outcome
    }

    /// Settle independent payouts concurrently; zero amounts are skipped
    pub async fn settle_all(&self, payouts: &[(Participant, u64)], context: &SettlementContext) -> Vec<SettlementOutcome> {
        let pending = payouts
            .iter()
            .filter(|(_, amount)| *amount > 0)
            .map(|(participant, amount)| self.settle(participant, *amount, context));
        futures::future::join_all(pending).await
    }

    async fn resolve(&self, participant: &Participant, amount: u64) -> SettlementOutcome {
        let Some(ledger) = &self.ledger else {
            return SettlementOutcome::failed(participant.id.clone(), amount, FailureReason::LedgerNotConfigured);
        };

        let env = StrategyEnv {
            ledger: ledger.as_ref(),
            credentials: self.credentials.as_deref(),
            retry: &self.retry,
        };

        let mut reasons = Vec::new();
        for strategy in &self.strategies {
            match strategy.attempt(participant, amount, &env).await {
                Attempt::Settled { credential } => {
                    return SettlementOutcome::settled(participant.id.clone(), amount, strategy.name(), credential);
                }
                Attempt::NotApplicable(reason) => {
                    tracing::debug!(
                        participant = %participant.id,
                        strategy = strategy.name(),
                        reason = ?reason,
                        "Settlement strategy did not apply"
                    );
                    reasons.extend(reason);
                }
                Attempt::Failed(e) => {
                    tracing::error!(
                        participant = %participant.id,
                        strategy = strategy.name(),
                        "Ledger request failed: {}",
                        e
                    );
                    return SettlementOutcome::failed(
                        participant.id.clone(),
                        amount,
                        FailureReason::Transport(e.to_string()),
                    );
                }
            }
        }

        let reason = FailureReason::most_relevant(reasons).unwrap_or(FailureReason::NoUsableCredential);
        SettlementOutcome::failed(participant.id.clone(), amount, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory ledger that accepts a fixed set of credentials
    struct FakeLedger {
        accepted: Vec<(String, String)>,
        members: Vec<LedgerMember>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LedgerApi for FakeLedger {
        async fn adjust_by_credential(&self, credential_type: &str, value: &str, _amount: u64) -> Result<(), LedgerError> {
            self.calls.lock().unwrap().push(format!("{}={}", credential_type, value));
            if self.accepted.iter().any(|(t, v)| t == credential_type && v == value) {
                Ok(())
            } else {
                Err(LedgerError::Status { status: 404, body: String::new() })
            }
        }

        async fn adjust_member_balance(&self, account_id: &str, _amount: u64) -> Result<(), LedgerError> {
            self.calls.lock().unwrap().push(format!("member={}", account_id));
            Err(LedgerError::Status { status: 404, body: String::new() })
        }

        async fn search_members(&self, _search: SearchType, _value: &str) -> Result<Vec<LedgerMember>, LedgerError> {
            Ok(self.members.clone())
        }
    }

    fn context() -> SettlementContext {
        SettlementContext {
            arena: ArenaKey::new("arena"),
            match_id: Uuid::nil(),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_ledger_reports_configuration_error() {
        let gateway = SettlementGateway::new(None, RetryPolicy::default());
        let outcome = gateway.settle(&Participant::new("1", "a"), 10, &context()).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.reason, Some(FailureReason::LedgerNotConfigured));
    }

    #[tokio::test]
    async fn test_native_credential_short_circuits() {
        let ledger = Arc::new(FakeLedger {
            accepted: vec![("discord-id".into(), "1001".into())],
            members: Vec::new(),
            calls: Mutex::new(Vec::new()),
        });
        let gateway = SettlementGateway::new(Some(ledger.clone()), RetryPolicy::default());

        let outcome = gateway.settle(&Participant::new("1001", "Neo"), 200, &context()).await;
        assert!(outcome.ok);
        assert_eq!(outcome.strategy.as_deref(), Some("native_credential"));
        assert_eq!(ledger.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_native_id_outranks_member_not_found() {
        let ledger = Arc::new(FakeLedger {
            accepted: Vec::new(),
            members: Vec::new(),
            calls: Mutex::new(Vec::new()),
        });
        let gateway = SettlementGateway::new(Some(ledger), RetryPolicy::default());

        let outcome = gateway.settle(&Participant::new("guest", "Neo"), 50, &context()).await;
        assert_eq!(outcome.reason, Some(FailureReason::MissingDiscordId));
    }

    #[tokio::test]
    async fn test_unknown_member_reports_member_not_found() {
        let ledger = Arc::new(FakeLedger {
            accepted: Vec::new(),
            members: Vec::new(),
            calls: Mutex::new(Vec::new()),
        });
        let gateway = SettlementGateway::new(Some(ledger), RetryPolicy::default());

        let outcome = gateway.settle(&Participant::new("1001", "Neo"), 50, &context()).await;
        assert_eq!(outcome.reason, Some(FailureReason::MemberNotFound));
    }

    #[tokio::test]
    async fn test_settle_all_skips_zero_amounts() {
        let ledger = Arc::new(FakeLedger {
            accepted: vec![("discord-id".into(), "1".into()), ("discord-id".into(), "2".into())],
            members: Vec::new(),
            calls: Mutex::new(Vec::new()),
        });
        let gateway = SettlementGateway::new(Some(ledger.clone()), RetryPolicy::default());

        let payouts = vec![
            (Participant::new("1", "a"), 150),
            (Participant::new("2", "b"), 0),
            (Participant::new("3", "c"), 0),
        ];
        let outcomes = gateway.settle_all(&payouts, &context()).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].ok);
        assert_eq!(ledger.calls.lock().unwrap().as_slice(), ["discord-id=1"]);
    }

    #[test]
    fn test_failure_reason_serializes_as_code() {
        let outcome = SettlementOutcome::failed(ParticipantId::new("1"), 5, FailureReason::NoUsableCredential);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["reason"], "no_usable_credential");

        let raw = FailureReason::Transport("ledger returned 500: boom".into());
        assert_eq!(raw.to_string(), "ledger returned 500: boom");
    }
}
