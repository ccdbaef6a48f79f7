//! Manually registered ledger credentials
//!
//! Administrators map a local participant to an external ledger account when
//! automatic resolution cannot find it. Overrides are read-only during
//! settlement and never deleted automatically.

use crate::{
    errors::{StorageError, SurvivalError, SurvivalResult},
    storage::OptimizedStorage,
    types::ParticipantId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const OVERRIDE_PREFIX: &str = "credential:override:";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialOverride {
    pub participant: ParticipantId,
    /// Raw credential value as registered by the administrator
    pub value: String,
    pub credential_type: String,
    /// External account id used for direct member balance adjustment
    pub account_id: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_override(&self, participant: &ParticipantId) -> SurvivalResult<Option<CredentialOverride>>;

    async fn put_override(&self, credential: CredentialOverride) -> SurvivalResult<()>;
}

fn override_key(participant: &ParticipantId) -> Vec<u8> {
    format!("{}{}", OVERRIDE_PREFIX, participant).into_bytes()
}

pub struct RocksCredentialStore {
    storage: OptimizedStorage,
}

impl RocksCredentialStore {
    pub fn new(storage: OptimizedStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CredentialStore for RocksCredentialStore {
    async fn get_override(&self, participant: &ParticipantId) -> SurvivalResult<Option<CredentialOverride>> {
        let Some(bytes) = self
            .storage
            .get(&override_key(participant))
            .map_err(|e| SurvivalError::Storage(StorageError::ReadFailed(e.to_string())))?
        else {
            return Ok(None);
        };

        let credential = serde_json::from_slice(&bytes).map_err(|e| {
            SurvivalError::Storage(StorageError::CorruptedData(format!(
                "Failed to decode credential override for {}: {}",
                participant, e
            )))
        })?;
        Ok(Some(credential))
    }

    async fn put_override(&self, credential: CredentialOverride) -> SurvivalResult<()> {
        let bytes = serde_json::to_vec(&credential).map_err(|e| {
            SurvivalError::Storage(StorageError::WriteFailed(format!(
                "Failed to encode credential override for {}: {}",
                credential.participant, e
            )))
        })?;

        self.storage
            .put(&override_key(&credential.participant), &bytes)
            .map_err(|e| SurvivalError::Storage(StorageError::WriteFailed(e.to_string())))?;

        tracing::info!(
            participant = %credential.participant,
            credential_type = %credential.credential_type,
            "Registered credential override"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_override_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksCredentialStore::new(OptimizedStorage::new(dir.path()).unwrap());
        let participant = ParticipantId::new("42");

        assert!(store.get_override(&participant).await.unwrap().is_none());

        let mut credential = CredentialOverride {
            participant: participant.clone(),
            value: "someone#1".into(),
            credential_type: "username".into(),
            account_id: "acc-1".into(),
            updated_at: Utc::now(),
        };
        store.put_override(credential.clone()).await.unwrap();

        credential.account_id = "acc-2".into();
        store.put_override(credential.clone()).await.unwrap();

        let loaded = store.get_override(&participant).await.unwrap().unwrap();
        assert_eq!(loaded.account_id, "acc-2");
    }
}
