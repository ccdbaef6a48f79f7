//! Ordered credential resolution strategies
//!
//! Each strategy maps a participant to at most one successful balance
//! adjustment. The gateway walks the list and stops at the first `Settled`.

use super::ledger::{LedgerApi, LedgerError, LedgerMember, SearchType};
use super::retry::{with_retry, RetryPolicy};
use super::FailureReason;
use crate::credentials::{CredentialOverride, CredentialStore};
use crate::types::Participant;
use async_trait::async_trait;

/// Native platform credential type understood by the ledger
pub const NATIVE_CREDENTIAL_TYPE: &str = "discord-id";

/// Tried with an override's raw value when its account id is unknown
pub const OVERRIDE_ALTERNATE_TYPES: [&str; 4] = ["username", "discord-id", "id", "user-id"];

pub struct StrategyEnv<'a> {
    pub ledger: &'a dyn LedgerApi,
    pub credentials: Option<&'a dyn CredentialStore>,
    pub retry: &'a RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Settled { credential: String },
    /// Strategy did not apply; the reason is kept for the final report
    NotApplicable(Option<FailureReason>),
    /// Transport failure after retries, or a status that no strategy can recover from
    Failed(LedgerError),
}

#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, participant: &Participant, amount: u64, env: &StrategyEnv<'_>) -> Attempt;
}

pub fn default_strategies() -> Vec<Box<dyn ResolutionStrategy>> {
    vec![
        Box::new(NativeCredentialStrategy),
        Box::new(CredentialOverrideStrategy),
        Box::new(MemberSearchStrategy),
    ]
}

/// Outcome of a single credential-keyed adjustment
enum Adjustment {
    Applied,
    Missing,
}

async fn adjust_credential(
    env: &StrategyEnv<'_>,
    credential_type: &str,
    value: &str,
    amount: u64,
) -> Result<Adjustment, LedgerError> {
    let result = with_retry(env.retry, "adjust_by_credential", || {
        env.ledger.adjust_by_credential(credential_type, value, amount)
    })
    .await;

    match result {
        Ok(()) => Ok(Adjustment::Applied),
        Err(e) if e.is_not_applicable() => {
            tracing::debug!(credential_type, value, "Credential not recognised by ledger: {}", e);
            Ok(Adjustment::Missing)
        }
        Err(e) => Err(e),
    }
}

/// Try each `(type, value)` pair in order until one is accepted
async fn adjust_first_accepted(
    env: &StrategyEnv<'_>,
    candidates: &[(String, String)],
    amount: u64,
) -> Result<Option<String>, LedgerError> {
    for (credential_type, value) in candidates {
        if let Adjustment::Applied = adjust_credential(env, credential_type, value, amount).await? {
            return Ok(Some(format!("{}:{}", credential_type, value)));
        }
    }
    Ok(None)
}

/// Credential keyed by the participant's own platform id
pub struct NativeCredentialStrategy;

#[async_trait]
impl ResolutionStrategy for NativeCredentialStrategy {
    fn name(&self) -> &'static str {
        "native_credential"
    }

    async fn attempt(&self, participant: &Participant, amount: u64, env: &StrategyEnv<'_>) -> Attempt {
        if !participant.id.is_native_credential() {
            return Attempt::NotApplicable(Some(FailureReason::MissingDiscordId));
        }

        match adjust_credential(env, NATIVE_CREDENTIAL_TYPE, participant.id.as_str(), amount).await {
            Ok(Adjustment::Applied) => Attempt::Settled {
                credential: format!("{}:{}", NATIVE_CREDENTIAL_TYPE, participant.id),
            },
            Ok(Adjustment::Missing) => Attempt::NotApplicable(Some(FailureReason::NoUsableCredential)),
            Err(e) => Attempt::Failed(e),
        }
    }
}

/// Administrator-registered mapping to an external account
pub struct CredentialOverrideStrategy;

impl CredentialOverrideStrategy {
    fn alternate_candidates(credential: &CredentialOverride) -> Vec<(String, String)> {
        let mut types: Vec<&str> = Vec::with_capacity(OVERRIDE_ALTERNATE_TYPES.len() + 1);
        if !credential.credential_type.is_empty() {
            types.push(&credential.credential_type);
        }
        for alternate in OVERRIDE_ALTERNATE_TYPES {
            if !types.contains(&alternate) {
                types.push(alternate);
            }
        }
        types
            .into_iter()
            .map(|t| (t.to_string(), credential.value.clone()))
            .collect()
    }
}

#[async_trait]
impl ResolutionStrategy for CredentialOverrideStrategy {
    fn name(&self) -> &'static str {
        "credential_override"
    }

    async fn attempt(&self, participant: &Participant, amount: u64, env: &StrategyEnv<'_>) -> Attempt {
        let Some(store) = env.credentials else {
            return Attempt::NotApplicable(None);
        };
        let credential = match store.get_override(&participant.id).await {
            Ok(Some(credential)) => credential,
            Ok(None) => return Attempt::NotApplicable(None),
            Err(e) => {
                tracing::warn!(participant = %participant.id, "Failed to load credential override: {}", e);
                return Attempt::NotApplicable(None);
            }
        };

        if !credential.account_id.is_empty() {
            let account_id = credential.account_id.as_str();
            let result = with_retry(env.retry, "adjust_member_balance", || {
                env.ledger.adjust_member_balance(account_id, amount)
            })
            .await;
            match result {
                Ok(()) => {
                    return Attempt::Settled {
                        credential: format!("account:{}", account_id),
                    }
                }
                Err(e) if e.is_not_applicable() => {
                    tracing::debug!(participant = %participant.id, account_id, "Override account not found: {}", e);
                }
                Err(e) => return Attempt::Failed(e),
            }
        }

        if credential.value.is_empty() {
            return Attempt::NotApplicable(Some(FailureReason::ManualOverrideFailed));
        }
        match adjust_first_accepted(env, &Self::alternate_candidates(&credential), amount).await {
            Ok(Some(credential)) => Attempt::Settled { credential },
            Ok(None) => Attempt::NotApplicable(Some(FailureReason::ManualOverrideFailed)),
            Err(e) => Attempt::Failed(e),
        }
    }
}

/// Look the participant up by native id, then by display name
pub struct MemberSearchStrategy;

impl MemberSearchStrategy {
    async fn search(env: &StrategyEnv<'_>, search: SearchType, value: &str) -> Result<Vec<LedgerMember>, LedgerError> {
        let result = with_retry(env.retry, "search_members", || env.ledger.search_members(search, value)).await;
        match result {
            Err(e) if e.is_not_applicable() => Ok(Vec::new()),
            other => other,
        }
    }

    async fn find_member(participant: &Participant, env: &StrategyEnv<'_>) -> Result<Option<LedgerMember>, LedgerError> {
        if participant.id.is_native_credential() {
            let found = Self::search(env, SearchType::DiscordId, participant.id.as_str()).await?;
            if let Some(member) = found.into_iter().next() {
                return Ok(Some(member));
            }
        }

        let name = participant.display_name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let found = Self::search(env, SearchType::Username, name).await?;
        Ok(found.into_iter().next())
    }

    /// Priority order: native id, display name, raw account id, generic id aliases
    pub fn candidates(participant: &Participant, member: &LedgerMember) -> Vec<(String, String)> {
        let native = if participant.id.is_native_credential() {
            Some(participant.id.to_string())
        } else {
            member.discord_id.clone()
        };
        let username = member
            .username
            .clone()
            .unwrap_or_else(|| participant.display_name.clone());

        let mut candidates = Vec::with_capacity(5);
        if let Some(native) = native {
            candidates.push((NATIVE_CREDENTIAL_TYPE.to_string(), native));
        }
        candidates.push(("username".to_string(), username));
        candidates.push(("account-id".to_string(), member.account_id.clone()));
        candidates.push(("id".to_string(), member.account_id.clone()));
        candidates.push(("user-id".to_string(), member.account_id.clone()));
        candidates.retain(|(_, value)| !value.is_empty());
        candidates
    }
}

#[async_trait]
impl ResolutionStrategy for MemberSearchStrategy {
    fn name(&self) -> &'static str {
        "member_search"
    }

    async fn attempt(&self, participant: &Participant, amount: u64, env: &StrategyEnv<'_>) -> Attempt {
        let member = match Self::find_member(participant, env).await {
            Ok(Some(member)) => member,
            Ok(None) => return Attempt::NotApplicable(Some(FailureReason::MemberNotFound)),
            Err(e) => return Attempt::Failed(e),
        };

        tracing::debug!(participant = %participant.id, account_id = %member.account_id, "Resolved ledger member");

        match adjust_first_accepted(env, &Self::candidates(participant, &member), amount).await {
            Ok(Some(credential)) => Attempt::Settled { credential },
            Ok(None) => Attempt::NotApplicable(Some(FailureReason::NoUsableCredential)),
            Err(e) => Attempt::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::types::ParticipantId;

    #[test]
    fn test_override_candidates_start_with_registered_type() {
        let credential = CredentialOverride {
            participant: ParticipantId::new("1"),
            value: "neo".into(),
            credential_type: "email".into(),
            account_id: String::new(),
            updated_at: Utc::now(),
        };
        let types: Vec<String> = CredentialOverrideStrategy::alternate_candidates(&credential)
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(types, vec!["email", "username", "discord-id", "id", "user-id"]);
    }

    #[test]
    fn test_override_candidates_deduplicate() {
        let credential = CredentialOverride {
            participant: ParticipantId::new("1"),
            value: "neo".into(),
            credential_type: "username".into(),
            account_id: String::new(),
            updated_at: Utc::now(),
        };
        assert_eq!(CredentialOverrideStrategy::alternate_candidates(&credential).len(), 4);
    }

    #[test]
    fn test_search_candidate_priority() {
        let participant = Participant::new("1001", "Neo");
        let member = LedgerMember {
            account_id: "acc-7".into(),
            username: Some("the_one".into()),
            discord_id: None,
        };
        let candidates = MemberSearchStrategy::candidates(&participant, &member);
        let expected: Vec<(String, String)> = [
            ("discord-id", "1001"),
            ("username", "the_one"),
            ("account-id", "acc-7"),
            ("id", "acc-7"),
            ("user-id", "acc-7"),
        ]
        .iter()
        .map(|(t, v)| (t.to_string(), v.to_string()))
        .collect();
        assert_eq!(candidates, expected);
    }

    #[test]
    fn test_search_candidates_without_native_id() {
        let participant = Participant::new("guest", "Trinity");
        let member = LedgerMember {
            account_id: "acc-8".into(),
            username: None,
            discord_id: None,
        };
        let candidates = MemberSearchStrategy::candidates(&participant, &member);
        assert_eq!(candidates[0], ("username".to_string(), "Trinity".to_string()));
        assert_eq!(candidates.len(), 4);
    }
}
