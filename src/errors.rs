//! Error types for the Survival engine
//!
//! Root error with per-area variants. Settlement failures are not part of
//! this hierarchy: the gateway reports them as structured outcomes instead.

/// Root error type for all Survival operations
#[derive(Debug, thiserror::Error)]
pub enum SurvivalError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Lobby and match lifecycle violations
    #[error("Lobby error: {0}")]
    Lobby(#[from] LobbyError),

    /// Statistics / credential storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("missing required setting {0}")]
    MissingRequired(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue { field: String, value: String, reason: String },

    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Match lifecycle invariant violations, rejected synchronously at the call site
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("arena {0} already has an active match")]
    AlreadyActive(String),

    #[error("arena {0} has no active match")]
    NoActiveMatch(String),

    #[error("match handle is stale: arena {0} hosts a different match")]
    StaleHandle(String),

    #[error("match already started")]
    AlreadyStarted,

    #[error("{0} is not allowed to control this match")]
    Unauthorized(String),

    #[error("match has no participants")]
    Empty,

    #[error("lobby is full ({0} participants)")]
    Full(usize),

    #[error("invalid pool settings: {0}")]
    InvalidPool(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("corrupted record: {0}")]
    CorruptedData(String),
}

impl From<rocksdb::Error> for SurvivalError {
    fn from(e: rocksdb::Error) -> Self {
        SurvivalError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<std::io::Error> for SurvivalError {
    fn from(e: std::io::Error) -> Self {
        SurvivalError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for SurvivalError {
    fn from(e: serde_json::Error) -> Self {
        SurvivalError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

pub type SurvivalResult<T> = Result<T, SurvivalError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = SurvivalError::Configuration(ConfigurationError::MissingRequired("ledger.token".into()));

        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("ledger.token"));
    }

    #[test]
    fn test_lobby_error_conversion() {
        let err: SurvivalError = LobbyError::AlreadyActive("arena-1".into()).into();

        match err {
            SurvivalError::Lobby(LobbyError::AlreadyActive(arena)) => assert_eq!(arena, "arena-1"),
            _ => panic!("Expected lobby error"),
        }
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let err: SurvivalError = StorageError::ReadFailed("stat row".into()).into();
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Storage error: read failed: stat row");
    }

    #[test]
    fn test_invalid_value_message() {
        let err = ConfigurationError::InvalidValue {
            field: "api.port".into(),
            value: "0".into(),
            reason: "Port must be non-zero".into(),
        };
        assert_eq!(err.to_string(), "invalid value for api.port: '0' (Port must be non-zero)");
    }
}
