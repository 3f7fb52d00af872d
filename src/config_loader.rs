//! Loading configuration from TOML with `DUELPVP_*` environment overrides

use crate::config::{
    BalanceConfig, CrashConfig, DuelConfig, FarmConfig, LoggingConfig, MinesConfig, StorageConfig,
};
use crate::errors::{ConfigurationError, DuelResult};
use crate::games::types::WagerLimits;
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load from file (or defaults), apply process environment, validate
    pub fn load(&self) -> DuelResult<DuelConfig> {
        self.load_with_env(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup
    pub fn load_with_env<F>(&self, lookup: F) -> DuelResult<DuelConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => DuelConfig::default(),
        };

        apply_env_overrides(&mut config, lookup)?;
        config.validate()?;

        tracing::debug!(path = ?self.config_path, "configuration loaded");
        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> DuelResult<DuelConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    pub fn save(&self, config: &DuelConfig, path: &str) -> DuelResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var<T: FromStr>(key: &str, raw: String, reason: &str) -> Result<T, ConfigurationError> {
    raw.trim().parse().map_err(|_| ConfigurationError::InvalidValue {
        field: key.to_string(),
        value: raw,
        reason: reason.to_string(),
    })
}

fn apply_env_overrides<F>(config: &mut DuelConfig, lookup: F) -> Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("DUELPVP_MIN_BET") {
        config.limits.min_bet = parse_var("DUELPVP_MIN_BET", v, "Invalid bet amount")?;
    }
    if let Some(v) = lookup("DUELPVP_MAX_BET") {
        config.limits.max_bet = parse_var("DUELPVP_MAX_BET", v, "Invalid bet amount")?;
    }
    if let Some(v) = lookup("DUELPVP_CRASH_RTP_BPS") {
        config.crash.rtp_bps = parse_var("DUELPVP_CRASH_RTP_BPS", v, "Invalid basis points")?;
    }
    if let Some(v) = lookup("DUELPVP_CRASH_COUNTDOWN_MS") {
        config.crash.countdown_ms = parse_var("DUELPVP_CRASH_COUNTDOWN_MS", v, "Invalid duration")?;
    }
    if let Some(v) = lookup("DUELPVP_BALANCE_TTL_MS") {
        config.balance.cache_ttl_ms = parse_var("DUELPVP_BALANCE_TTL_MS", v, "Invalid duration")?;
    }
    if let Some(v) = lookup("DUELPVP_FARM_COOLDOWN_MS") {
        config.farm.cooldown_ms = parse_var("DUELPVP_FARM_COOLDOWN_MS", v, "Invalid duration")?;
    }
    if let Some(dir) = lookup("DUELPVP_DATA_DIR") {
        config.storage.data_directory = dir;
        config.storage.in_memory = false;
    }
    if let Some(level) = lookup("DUELPVP_LOG") {
        config.logging.level = level;
    }
    Ok(())
}

/// Builder for assembling a configuration in code
pub struct ConfigBuilder {
    config: DuelConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DuelConfig::default(),
        }
    }

    pub fn limits(mut self, limits: WagerLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn crash(mut self, crash: CrashConfig) -> Self {
        self.config.crash = crash;
        self
    }

    pub fn mines(mut self, mines: MinesConfig) -> Self {
        self.config.mines = mines;
        self
    }

    pub fn balance(mut self, balance: BalanceConfig) -> Self {
        self.config.balance = balance;
        self
    }

    pub fn farm(mut self, farm: FarmConfig) -> Self {
        self.config.farm = farm;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Validated final configuration
    pub fn build(self) -> DuelResult<DuelConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write the default configuration to `path`
pub fn generate_sample_config(path: &str) -> DuelResult<()> {
    ConfigLoader::new().save(&DuelConfig::default(), path)
}
