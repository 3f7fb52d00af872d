//! duelpvp - wager engines and client core for a GC arcade
//!
//! Crash, Mines and Blackjack wagers plus a reaction timer, driven by
//! explicit ticks and settled through an async game-service boundary.
//! `LocalBackend` hosts the same engines in process for tests and batch
//! simulation, along with sign-up, referrals and the leaderboard.

pub mod backend;
pub mod balance;
pub mod clock;
pub mod config;
pub mod config_loader;
pub mod errors;
pub mod farm;
pub mod games;
pub mod kv;
pub mod logging;
pub mod metrics;
pub mod quests;
pub mod registry;
pub mod remote;
pub mod rewards;
pub mod scheduler;
pub mod session;
pub mod simulation;
pub mod staking;
pub mod swarm;
pub mod table;

pub use backend::{LocalBackend, OutcomeSource, RandomOutcomes};
pub use balance::BalanceFacade;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DuelConfig;
pub use config_loader::{ConfigBuilder, ConfigLoader};
pub use errors::{DuelError, DuelResult};
pub use games::{GameKind, Multiplier, WagerLimits, WagerStatus};
pub use kv::{KvStore, MemoryStore, RocksStore};
pub use metrics::WagerMetrics;
pub use registry::RegistryDesk;
pub use remote::{GameAction, GameBackend, QuestBackend, RegistryBackend, RoundConfig, RoundView, StakingBackend};
pub use rewards::RewardDesk;
pub use scheduler::Scheduler;
pub use session::{PlayerSession, SessionStore};
pub use staking::StakingDesk;
pub use table::{ActiveWager, WagerTable};
