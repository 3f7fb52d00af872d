//! Remote game service boundary
//!
//! The game service owns outcomes, balances and persistent state. Everything
//! the client shows is provisional until one of these calls confirms it.

use crate::errors::RemoteError;
use crate::games::{BlackjackSnapshot, CrashSnapshot, GameKind, MinesSnapshot, Multiplier};
use crate::quests::QuestProgress;
use crate::staking::StakeValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type RemoteResult<T> = Result<T, RemoteError>;

pub type SessionId = String;

/// Per-game parameters chosen when a round starts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum RoundConfig {
    Crash { auto_cashout: Option<Multiplier> },
    Mines { mine_count: u8 },
    Blackjack,
}

impl RoundConfig {
    pub fn kind(&self) -> GameKind {
        match self {
            RoundConfig::Crash { .. } => GameKind::Crash,
            RoundConfig::Mines { .. } => GameKind::Mines,
            RoundConfig::Blackjack => GameKind::Blackjack,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum GameAction {
    /// Fetch the latest state without changing it
    Poll,
    Reveal { cell: usize },
    Hit,
    Stand,
    /// Abandon the session; the bet is lost
    Forfeit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "game", content = "state", rename_all = "lowercase")]
pub enum RoundView {
    Crash(CrashSnapshot),
    Mines(MinesSnapshot),
    Blackjack(BlackjackSnapshot),
}

impl RoundView {
    pub fn kind(&self) -> GameKind {
        match self {
            RoundView::Crash(_) => GameKind::Crash,
            RoundView::Mines(_) => GameKind::Mines,
            RoundView::Blackjack(_) => GameKind::Blackjack,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStarted {
    pub session_id: SessionId,
    pub state: RoundView,
    pub new_balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActOutcome {
    pub state: RoundView,
    pub resolved: bool,
    pub payout: Option<u64>,
    pub new_balance: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashoutReceipt {
    pub payout: u64,
    pub multiplier: Multiplier,
    pub new_balance: u64,
}

/// Why GC is being credited outside a wager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardSource {
    Reaction { score_ms: u64 },
    Farm,
    Quest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub amount_withdrawn: u64,
    pub new_balance: u64,
}

/// Sign-up request; codes are sent exactly as the player typed them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub wallet: String,
    pub display_name: String,
    /// Single-use access code reserved for this wallet beforehand
    pub access_code: Option<String>,
    /// Display name of the referring player
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub user_id: String,
    pub wallet: String,
    pub display_name: String,
    pub referred_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based, by GC balance
    pub rank: u32,
    pub user_id: String,
    pub display_name: String,
    pub wallet: String,
    pub gc_balance: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankInfo {
    pub rank: u32,
    pub gc_balance: u64,
}

/// A player's saved reaction scores after a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub plays: u32,
    pub best_ms: u64,
}

#[async_trait]
pub trait GameBackend: Send + Sync {
    /// Debit the bet and open a session
    async fn start_round(&self, user: &str, bet: u64, config: RoundConfig) -> RemoteResult<RoundStarted>;

    async fn act(&self, session: &str, action: GameAction) -> RemoteResult<ActOutcome>;

    async fn cashout(&self, session: &str) -> RemoteResult<CashoutReceipt>;

    async fn get_balance(&self, user: &str) -> RemoteResult<u64>;

    /// Credit a non-wager reward; returns the new balance
    async fn grant_reward(&self, user: &str, amount: u64, source: RewardSource) -> RemoteResult<u64>;
}

#[async_trait]
pub trait StakingBackend: Send + Sync {
    async fn stake_deposit(&self, user: &str, amount: u64) -> RemoteResult<StakeValue>;

    async fn stake_withdraw(&self, user: &str) -> RemoteResult<WithdrawReceipt>;

    async fn get_stake_value(&self, user: &str) -> RemoteResult<StakeValue>;
}

#[async_trait]
pub trait QuestBackend: Send + Sync {
    async fn update_quest_progress(&self, user: &str, quest_id: &str) -> RemoteResult<QuestProgress>;

    /// Returns the new balance
    async fn claim_quest_reward(&self, user: &str, quest_id: &str) -> RemoteResult<u64>;

    async fn get_user_quests(&self, user: &str) -> RemoteResult<Vec<QuestProgress>>;
}

#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Ok when the access code exists and is neither used nor held for another wallet
    async fn validate_invite_code(&self, code: &str) -> RemoteResult<()>;

    async fn reserve_invite_code(&self, code: &str, wallet: &str) -> RemoteResult<()>;

    async fn register_user(&self, registration: Registration) -> RemoteResult<RegisteredUser>;

    async fn login_with_wallet(&self, wallet: &str) -> RemoteResult<RegisteredUser>;

    /// Display names of players this user referred, oldest first
    async fn get_referrals(&self, user: &str) -> RemoteResult<Vec<String>>;

    async fn submit_score(&self, user: &str, time_ms: u64) -> RemoteResult<ScoreSummary>;

    async fn get_leaderboard(&self, limit: usize) -> RemoteResult<Vec<LeaderboardEntry>>;

    async fn get_user_rank(&self, user: &str) -> RemoteResult<RankInfo>;
}
