//! Configuration management for the Survival service
//!
//! TOML file, then `SURVIVAL_*` environment overrides, then validation.

use crate::errors::{ConfigurationError, SurvivalResult};
use crate::lobby::MAX_LOBBY_PARTICIPANTS;
use crate::payout::{check_increment, check_multiplier};
use crate::types::{BonusRule, PoolSettings};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivalConfig {
    pub ledger: LedgerConfig,
    pub pool: PoolConfig,
    pub lobby: LobbyConfig,
    pub simulation: SimulationConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub base_url: String,
    /// Bearer token; settlement is skipped when absent
    pub token: Option<String>,
    pub realm_point_id: Option<String>,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Chat webhook receiving one line per settlement outcome
    pub audit_webhook_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.ledger.local".to_string(),
            token: None,
            realm_point_id: None,
            request_timeout_ms: 10_000,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            audit_webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub increment: u64,
    pub bonus_required_players: Option<usize>,
    pub bonus_multiplier: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            increment: 50,
            bonus_required_players: None,
            bonus_multiplier: 1.0,
        }
    }
}

impl PoolConfig {
    /// Default settings for lobbies that do not specify their own
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            increment: self.increment,
            bonus: self.bonus_required_players.map(|required_players| BonusRule {
                required_players,
                multiplier: self.bonus_multiplier,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub countdown_secs: Option<u64>,
    /// Last countdown notice fires this many seconds before start
    pub final_checkpoint_secs: u64,
    /// Participants allowed to start or cancel any lobby
    pub admins: Vec<String>,
    pub max_participants: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            countdown_secs: None,
            final_checkpoint_secs: 10,
            admins: vec![],
            max_participants: MAX_LOBBY_PARTICIPANTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub reveal_line_delay_ms: u64,
    pub round_pause_ms: u64,
    pub rng_seed: Option<u64>,
    pub content_path: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            reveal_line_delay_ms: 1_200,
            round_pause_ms: 6_000,
            rng_seed: None,
            content_path: None,
        }
    }
}

impl SimulationConfig {
    pub fn reveal_line_delay(&self) -> Duration {
        Duration::from_millis(self.reveal_line_delay_ms)
    }

    pub fn round_pause(&self) -> Duration {
        Duration::from_millis(self.round_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/survival_data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Guards the credential override endpoints; disabled when unset
    pub admin_api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            admin_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "survival=info,tower_http=info".to_string(),
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> SurvivalResult<SurvivalConfig> {
        let mut config = match &self.config_path {
            Some(path) => self.load_from_file(path)?,
            None => SurvivalConfig::default(),
        };

        self.apply_overrides(&mut config, |key| env::var(key).ok())?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &Path) -> SurvivalResult<SurvivalConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_overrides<F>(&self, config: &mut SurvivalConfig, lookup: F) -> SurvivalResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SURVIVAL_LEDGER_URL") {
            config.ledger.base_url = url;
        }
        if let Some(token) = lookup("SURVIVAL_LEDGER_TOKEN") {
            config.ledger.token = Some(token);
        }
        if let Some(realm) = lookup("SURVIVAL_REALM_POINT_ID") {
            config.ledger.realm_point_id = Some(realm);
        }
        if let Some(port) = lookup("SURVIVAL_API_PORT") {
            config.api.port = port.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "SURVIVAL_API_PORT".to_string(),
                value: port,
                reason: "Invalid port number".to_string(),
            })?;
        }
        if let Some(data_dir) = lookup("SURVIVAL_DATA_DIR") {
            config.storage.data_directory = data_dir;
        }
        if let Some(increment) = lookup("SURVIVAL_POOL_INCREMENT") {
            config.pool.increment = increment.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "SURVIVAL_POOL_INCREMENT".to_string(),
                value: increment,
                reason: "Invalid pool increment".to_string(),
            })?;
        }
        if let Some(key) = lookup("SURVIVAL_ADMIN_API_KEY") {
            config.api.admin_api_key = Some(key);
        }

        Ok(())
    }

    fn validate(&self, config: &SurvivalConfig) -> SurvivalResult<()> {
        if config.api.port == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "api.port".to_string(),
                value: "0".to_string(),
                reason: "Port cannot be zero".to_string(),
            }
            .into());
        }

        if config.storage.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_directory".to_string()).into());
        }

        if let Err(e) = check_increment(config.pool.increment) {
            return Err(ConfigurationError::InvalidValue {
                field: "pool.increment".to_string(),
                value: config.pool.increment.to_string(),
                reason: e.to_string(),
            }
            .into());
        }

        if let Err(e) = check_multiplier(config.pool.bonus_multiplier) {
            return Err(ConfigurationError::InvalidValue {
                field: "pool.bonus_multiplier".to_string(),
                value: config.pool.bonus_multiplier.to_string(),
                reason: e.to_string(),
            }
            .into());
        }

        if config.lobby.max_participants == 0 || config.lobby.max_participants > MAX_LOBBY_PARTICIPANTS {
            return Err(ConfigurationError::InvalidValue {
                field: "lobby.max_participants".to_string(),
                value: config.lobby.max_participants.to_string(),
                reason: format!("Must be between 1 and {}", MAX_LOBBY_PARTICIPANTS),
            }
            .into());
        }

        if config.ledger.request_timeout_ms < 100 {
            return Err(ConfigurationError::InvalidValue {
                field: "ledger.request_timeout_ms".to_string(),
                value: config.ledger.request_timeout_ms.to_string(),
                reason: "Timeout must be at least 100ms".to_string(),
            }
            .into());
        }

        if config.ledger.backoff_base_ms > config.ledger.backoff_max_ms {
            return Err(ConfigurationError::InvalidValue {
                field: "ledger.backoff_base_ms".to_string(),
                value: config.ledger.backoff_base_ms.to_string(),
                reason: "Backoff base cannot exceed backoff max".to_string(),
            }
            .into());
        }

        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, config: &SurvivalConfig, path: P) -> SurvivalResult<()> {
        let path = path.as_ref();
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path.display(), e)).into())
    }
}

/// Write a configuration file containing every default
pub fn generate_sample_config<P: AsRef<Path>>(path: P) -> SurvivalResult<()> {
    ConfigLoader::new().save(&SurvivalConfig::default(), path)
}
