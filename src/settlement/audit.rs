//! Settlement audit trail
//!
//! Every settlement outcome is mirrored to one or more sinks. Sinks are
//! best-effort: they swallow their own errors and never change the outcome.

use super::SettlementOutcome;
use crate::types::{ArenaKey, Participant};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SettlementReport<'a> {
    pub participant: &'a Participant,
    pub arena: &'a ArenaKey,
    pub match_id: Uuid,
    pub outcome: &'a SettlementOutcome,
}

impl SettlementReport<'_> {
    /// Human-readable line suitable for a logging channel
    pub fn summary(&self) -> String {
        let who = format!("{} ({})", self.participant.display_name, self.participant.id);
        if self.outcome.ok {
            let via = self
                .outcome
                .credential
                .as_deref()
                .unwrap_or("unknown credential");
            format!("Paid {} points to {} via {}", self.outcome.amount, who, via)
        } else {
            let reason = self
                .outcome
                .reason
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_string());
            format!("Failed to pay {} points to {}: {}", self.outcome.amount, who, reason)
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, report: &SettlementReport<'_>);
}

/// Writes settlement outcomes to the tracing pipeline
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, report: &SettlementReport<'_>) {
        if report.outcome.ok {
            tracing::info!(
                arena = %report.arena,
                match_id = %report.match_id,
                participant = %report.participant.id,
                amount = report.outcome.amount,
                "{}",
                report.summary()
            );
        } else {
            tracing::warn!(
                arena = %report.arena,
                match_id = %report.match_id,
                participant = %report.participant.id,
                amount = report.outcome.amount,
                "{}",
                report.summary()
            );
        }
    }
}

/// Posts a one-line message to a chat webhook
pub struct WebhookAuditSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAuditSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AuditSink for WebhookAuditSink {
    async fn record(&self, report: &SettlementReport<'_>) {
        let prefix = if report.outcome.ok { "✅" } else { "⚠️" };
        let body = json!({ "content": format!("{} {}", prefix, report.summary()) });

        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::debug!(status = %response.status(), "Audit webhook rejected message");
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Audit webhook unreachable: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::FailureReason;

    #[test]
    fn test_summary_lines() {
        let participant = Participant::new("1001", "Neo");
        let arena = ArenaKey::new("arena");
        let paid = SettlementOutcome::settled(participant.id.clone(), 120, "member_search", "username:neo".into());
        let report = SettlementReport {
            participant: &participant,
            arena: &arena,
            match_id: Uuid::nil(),
            outcome: &paid,
        };
        assert_eq!(report.summary(), "Paid 120 points to Neo (1001) via username:neo");

        let failed = SettlementOutcome::failed(participant.id.clone(), 80, FailureReason::MemberNotFound);
        let report = SettlementReport { outcome: &failed, ..report };
        assert_eq!(report.summary(), "Failed to pay 80 points to Neo (1001): member_not_found");
    }
}
