//! Configuration with validation and defaults
//!
//! Every tunable of the games and side systems lives here so the in-process
//! backend, the client orchestrator and the CLI agree on the same numbers.

use crate::errors::ConfigurationError;
use crate::games::types::WagerLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DuelConfig {
    #[serde(default)]
    pub limits: WagerLimits,
    #[serde(default)]
    pub crash: CrashConfig,
    #[serde(default)]
    pub mines: MinesConfig,
    #[serde(default)]
    pub blackjack: BlackjackConfig,
    #[serde(default)]
    pub reaction: ReactionConfig,
    #[serde(default)]
    pub balance: BalanceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub staking: StakingConfig,
    #[serde(default)]
    pub farm: FarmConfig,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Crash curve and round timing; multipliers in basis points
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrashConfig {
    pub rtp_bps: u64,
    pub max_multiplier_bps: u64,
    pub growth_bps_per_sec: u64,
    pub countdown_ms: u64,
    pub cooldown_ms: u64,
    pub history_len: usize,
    /// Client poll cadence while a crash wager is flying
    pub poll_interval_ms: u64,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            rtp_bps: 11_000,
            max_multiplier_bps: 1_000_000,
            growth_bps_per_sec: 3_000,
            countdown_ms: 3_000,
            cooldown_ms: 2_000,
            history_len: 20,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinesConfig {
    pub min_mines: u8,
    pub max_mines: u8,
    /// Delay before a finished board is cleared for the next game
    pub reset_delay_ms: u64,
}

impl Default for MinesConfig {
    fn default() -> Self {
        Self {
            min_mines: 1,
            max_mines: 24,
            reset_delay_ms: 3_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlackjackConfig {
    pub dealer_stands_on: u8,
    pub natural_payout_bps: u64,
    pub win_payout_bps: u64,
}

impl Default for BlackjackConfig {
    fn default() -> Self {
        Self {
            dealer_stands_on: 17,
            natural_payout_bps: 25_000,
            win_payout_bps: 20_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionConfig {
    pub reward_threshold_ms: u64,
    pub reward_amount: u64,
    /// Score needed for the daily fast-reaction quest
    pub daily_fast_ms: u64,
    /// Score needed for the weekly fast-reaction quest
    pub weekly_fast_ms: u64,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            reward_threshold_ms: 1_000,
            reward_amount: 300,
            daily_fast_ms: 300,
            weekly_fast_ms: 200,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceConfig {
    pub cache_ttl_ms: u64,
    /// Starting GC for players created by the in-process backend
    pub starting_balance: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5_000,
            starting_balance: 1_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub lifetime_days: i64,
    /// GC per player level
    pub level_step: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime_days: 30,
            level_step: 50_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakingConfig {
    /// Compounded once per hour, pro rata in between
    pub hourly_rate_bps: u64,
    pub min_deposit: u64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            hourly_rate_bps: 10,
            min_deposit: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardTier {
    /// Relative weight; tiers need not sum to 100
    pub weight: u32,
    pub amount: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FarmConfig {
    pub cooldown_ms: u64,
    pub tiers: Vec<RewardTier>,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 5_000,
            tiers: vec![
                RewardTier { weight: 80, amount: 0 },
                RewardTier { weight: 15, amount: 20 },
                RewardTier { weight: 4, amount: 150 },
                RewardTier { weight: 1, amount: 1_500 },
            ],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SwarmConfig {
    pub spawn_interval_ms: u64,
    pub max_bots: usize,
    pub feed_max: usize,
    pub batch_chance: f64,
    pub batch_delay_ms: u64,
    pub burst_size: usize,
    pub burst_interval_ms: u64,
    pub status_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub max_generation: u32,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            spawn_interval_ms: 3_000,
            max_bots: 200,
            feed_max: 30,
            batch_chance: 0.3,
            batch_delay_ms: 800,
            burst_size: 5,
            burst_interval_ms: 600,
            status_interval_ms: 5_000,
            heartbeat_interval_ms: 8_000,
            max_generation: 4,
        }
    }
}

/// Sign-up, referral and leaderboard rules
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    /// How long a reserved access code is held for one wallet
    pub reservation_ms: u64,
    pub display_name_min: usize,
    pub display_name_max: usize,
    pub leaderboard_limit: usize,
    /// GC a freshly registered player starts with
    pub starting_balance: u64,
    /// Base of shared referral links
    pub link_origin: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reservation_ms: 5 * 60 * 1000,
            display_name_min: 3,
            display_name_max: 16,
            leaderboard_limit: 100,
            starting_balance: 0,
            link_origin: "https://duelpvp.com".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub data_directory: String,
    /// Keep mirrors in memory only
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./duelpvp_data".to_string(),
            in_memory: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "duelpvp=info".to_string(),
        }
    }
}

impl DuelConfig {
    /// Short timers for batch simulation and tests
    pub fn fast_rounds() -> Self {
        Self {
            crash: CrashConfig {
                countdown_ms: 100,
                cooldown_ms: 50,
                poll_interval_ms: 10,
                ..Default::default()
            },
            mines: MinesConfig {
                reset_delay_ms: 50,
                ..Default::default()
            },
            farm: FarmConfig {
                cooldown_ms: 100,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// On-disk mirrors under `data_directory`
    pub fn persistent(data_directory: impl Into<String>) -> Self {
        Self {
            storage: StorageConfig {
                data_directory: data_directory.into(),
                in_memory: false,
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.limits.min_bet == 0 {
            return Err(invalid("limits.min_bet", 0, "Minimum bet must be > 0"));
        }
        if self.limits.max_bet < self.limits.min_bet {
            return Err(invalid(
                "limits.max_bet",
                self.limits.max_bet,
                "Maximum bet must not be below minimum bet",
            ));
        }

        if self.crash.max_multiplier_bps < 10_000 {
            return Err(invalid(
                "crash.max_multiplier_bps",
                self.crash.max_multiplier_bps,
                "Cap must be at least 1.00x",
            ));
        }
        if self.crash.growth_bps_per_sec == 0 {
            return Err(invalid("crash.growth_bps_per_sec", 0, "Curve must grow"));
        }
        if self.crash.rtp_bps == 0 {
            return Err(invalid("crash.rtp_bps", 0, "RTP must be > 0"));
        }
        if self.crash.history_len == 0 {
            return Err(invalid("crash.history_len", 0, "History must keep at least one entry"));
        }

        if self.mines.min_mines == 0 || self.mines.min_mines > self.mines.max_mines {
            return Err(invalid(
                "mines.min_mines",
                self.mines.min_mines,
                "Must be in [1, max_mines]",
            ));
        }
        if self.mines.max_mines > 24 {
            return Err(invalid("mines.max_mines", self.mines.max_mines, "At least one safe cell is required"));
        }

        if self.blackjack.dealer_stands_on > 21 {
            return Err(invalid(
                "blackjack.dealer_stands_on",
                self.blackjack.dealer_stands_on,
                "Dealer would never stand",
            ));
        }

        if self.farm.tiers.is_empty() || self.farm.tiers.iter().all(|t| t.weight == 0) {
            return Err(ConfigurationError::MissingRequired("farm.tiers".to_string()));
        }

        if self.swarm.feed_max == 0 {
            return Err(invalid("swarm.feed_max", 0, "Feed must hold at least one entry"));
        }
        if !(0.0..=1.0).contains(&self.swarm.batch_chance) {
            return Err(invalid("swarm.batch_chance", self.swarm.batch_chance, "Must be a probability"));
        }

        if self.registry.display_name_min == 0 || self.registry.display_name_min > self.registry.display_name_max {
            return Err(invalid(
                "registry.display_name_min",
                self.registry.display_name_min,
                "Must be in [1, display_name_max]",
            ));
        }
        if self.registry.leaderboard_limit == 0 {
            return Err(invalid("registry.leaderboard_limit", 0, "Must be > 0"));
        }

        if !self.storage.in_memory && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_directory".to_string()));
        }

        if self.session.lifetime_days <= 0 {
            return Err(invalid("session.lifetime_days", self.session.lifetime_days, "Must be > 0"));
        }
        if self.session.level_step == 0 {
            return Err(invalid("session.level_step", 0, "Must be > 0"));
        }

        Ok(())
    }

    pub fn balance_ttl(&self) -> Duration {
        Duration::from_millis(self.balance.cache_ttl_ms)
    }

    pub fn crash_poll_interval(&self) -> Duration {
        Duration::from_millis(self.crash.poll_interval_ms)
    }

    pub fn mines_reset_delay(&self) -> Duration {
        Duration::from_millis(self.mines.reset_delay_ms)
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
