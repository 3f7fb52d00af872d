//! Non-wager GC sources: reaction rewards, the airdrop farm and quests
//!
//! Every credit goes through the game service; the desk only applies the
//! balance the service confirms.

use crate::balance::BalanceFacade;
use crate::clock::Clock;
use crate::config::DuelConfig;
use crate::errors::{DuelError, DuelResult};
use crate::farm::{FarmState, FARM_STATE_KEY};
use crate::games::reaction::{AttemptReport, ReactionSession};
use crate::games::Attempt;
use crate::kv::{get_json, put_json, KvStore};
use crate::metrics::WagerMetrics;
use crate::quests::{self, QuestProgress};
use crate::remote::{GameBackend, QuestBackend, RegistryBackend, RewardSource, ScoreSummary};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionReceipt {
    pub report: AttemptReport,
    /// GC credited for a fast enough score
    pub reward: Option<u64>,
    /// Saved scoreboard totals; `None` for early attempts or when saving failed
    pub score: Option<ScoreSummary>,
    pub quests: Vec<QuestProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmClick {
    pub reward: u64,
    pub state: FarmState,
    pub new_balance: Option<u64>,
}

pub struct RewardDesk {
    game: Arc<dyn GameBackend>,
    quests: Arc<dyn QuestBackend>,
    balance: Arc<BalanceFacade>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: DuelConfig,
    rng: Mutex<StdRng>,
    reaction: Mutex<ReactionSession>,
    scoreboard: Option<Arc<dyn RegistryBackend>>,
    metrics: Option<WagerMetrics>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RewardDesk {
    pub fn new(
        game: Arc<dyn GameBackend>,
        quests: Arc<dyn QuestBackend>,
        balance: Arc<BalanceFacade>,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: DuelConfig,
    ) -> Self {
        Self {
            game,
            quests,
            balance,
            store,
            clock,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            reaction: Mutex::new(ReactionSession::new()),
            scoreboard: None,
            metrics: None,
        }
    }

    pub fn with_rng_seed(self, seed: u64) -> Self {
        *guard(&self.rng) = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_metrics(mut self, metrics: WagerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Save timed reaction scores to the leaderboard service
    pub fn with_scoreboard(mut self, scoreboard: Arc<dyn RegistryBackend>) -> Self {
        self.scoreboard = Some(scoreboard);
        self
    }

    pub fn reaction_stats(&self) -> ReactionSession {
        guard(&self.reaction).clone()
    }

    fn credited(&self, amount: u64, new_balance: u64) {
        self.balance.apply_confirmed(new_balance);
        if let Some(metrics) = &self.metrics {
            metrics.reward_granted(amount);
        }
    }

    fn remote_failed(&self, e: crate::errors::RemoteError, op: &str) -> DuelError {
        tracing::warn!(op, error = %e, "reward call failed");
        if let Some(metrics) = &self.metrics {
            metrics.remote_failure();
        }
        e.into()
    }

    /// Record a reaction attempt, pay the fast-score reward and bump quests
    pub async fn record_reaction(&self, attempt: Attempt) -> DuelResult<ReactionReceipt> {
        let threshold = self.config.reaction.reward_threshold_ms;
        let report = guard(&self.reaction).record(attempt, threshold);
        let user = self.balance.user_id().to_string();

        let mut reward = None;
        if report.reward_eligible {
            let amount = self.config.reaction.reward_amount;
            let score_ms = attempt.score().unwrap_or_default();
            let new_balance = self
                .game
                .grant_reward(&user, amount, RewardSource::Reaction { score_ms })
                .await
                .map_err(|e| self.remote_failed(e, "grant_reward"))?;
            self.credited(amount, new_balance);
            tracing::info!(user = %user, score_ms, amount, "reaction reward granted");
            reward = Some(amount);
        }

        let mut score = None;
        if let (Some(scoreboard), Some(time_ms)) = (&self.scoreboard, attempt.score()) {
            match scoreboard.submit_score(&user, time_ms).await {
                Ok(summary) => score = Some(summary),
                Err(e) => tracing::warn!(time_ms, error = %e, "failed to save score"),
            }
        }

        let mut progress = Vec::new();
        for quest_id in quests::reaction_triggers(&attempt, &self.config.reaction) {
            match self.quests.update_quest_progress(&user, quest_id).await {
                Ok(p) => progress.push(p),
                // Quest counters are best-effort; the attempt itself already counted.
                Err(e) => tracing::warn!(quest = quest_id, error = %e, "quest progress update failed"),
            }
        }

        Ok(ReactionReceipt {
            report,
            reward,
            score,
            quests: progress,
        })
    }

    pub fn farm_state(&self) -> DuelResult<FarmState> {
        let mut state: FarmState = get_json(self.store.as_ref(), FARM_STATE_KEY)?.unwrap_or_default();
        state.rollover(self.clock.now().date_naive());
        Ok(state)
    }

    /// Click the farm. The new state is persisted only after the service
    /// has credited the reward.
    pub async fn farm_click(&self) -> DuelResult<FarmClick> {
        let mut state = self.farm_state()?;
        let now = self.clock.now();
        let reward = {
            let mut rng = guard(&self.rng);
            state.click(self.clock.now_ms(), now.date_naive(), &mut *rng, &self.config.farm)?
        };

        let mut new_balance = None;
        if reward > 0 {
            let balance = self
                .game
                .grant_reward(self.balance.user_id(), reward, RewardSource::Farm)
                .await
                .map_err(|e| self.remote_failed(e, "grant_reward"))?;
            self.credited(reward, balance);
            new_balance = Some(balance);
        }
        put_json(self.store.as_ref(), FARM_STATE_KEY, &state)?;
        tracing::debug!(reward, clicks = state.total_clicks, "farm click");

        Ok(FarmClick {
            reward,
            state,
            new_balance,
        })
    }

    pub async fn quests(&self) -> DuelResult<Vec<QuestProgress>> {
        self.quests
            .get_user_quests(self.balance.user_id())
            .await
            .map_err(|e| self.remote_failed(e, "get_user_quests"))
    }

    /// Advance the login quests; called once per login
    pub async fn login_bonus(&self) -> DuelResult<Vec<QuestProgress>> {
        let user = self.balance.user_id();
        let mut progress = Vec::with_capacity(2);
        for quest_id in [quests::FIRST_LOGIN, quests::DAILY_LOGIN] {
            let p = self
                .quests
                .update_quest_progress(user, quest_id)
                .await
                .map_err(|e| self.remote_failed(e, "update_quest_progress"))?;
            progress.push(p);
        }
        Ok(progress)
    }

    /// Claim a completed quest; returns the credited reward
    pub async fn claim_quest(&self, quest_id: &str) -> DuelResult<u64> {
        let reward = quests::find(quest_id)
            .map(|q| q.reward)
            .ok_or_else(|| crate::errors::SessionStateError::QuestNotClaimable(quest_id.to_string()))?;
        let new_balance = self
            .quests
            .claim_quest_reward(self.balance.user_id(), quest_id)
            .await
            .map_err(|e| self.remote_failed(e, "claim_quest_reward"))?;
        self.credited(reward, new_balance);
        tracing::info!(quest = quest_id, reward, "quest claimed");
        Ok(reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::clock::ManualClock;
    use crate::errors::SessionStateError;
    use crate::kv::MemoryStore;
    use std::time::Duration;

    // 2024-03-01T12:00:00Z
    const START_MS: u64 = 1_709_294_400_000;

    fn desk() -> (Arc<LocalBackend>, ManualClock, MemoryStore, RewardDesk) {
        let clock = ManualClock::new(START_MS);
        let backend = Arc::new(LocalBackend::new(DuelConfig::default(), Arc::new(clock.clone())));
        backend.create_user("alice", 1_000);
        let balance = Arc::new(BalanceFacade::new(backend.clone(), Arc::new(clock.clone()), "alice", Duration::from_secs(5)));
        let kv = MemoryStore::new();
        let desk = RewardDesk::new(
            backend.clone(),
            backend.clone(),
            balance,
            Arc::new(kv.clone()),
            Arc::new(clock.clone()),
            DuelConfig::default(),
        )
        .with_rng_seed(7);
        (backend, clock, kv, desk)
    }

    #[tokio::test]
    async fn test_fast_reaction_is_rewarded() {
        let (backend, _, _, desk) = desk();
        let receipt = desk.record_reaction(Attempt::Timed { score_ms: 150, auto: false }).await.unwrap();
        assert_eq!(receipt.reward, Some(300));
        assert!(receipt.report.new_best);
        assert_eq!(backend.get_balance("alice").await.unwrap(), 1_300);

        let ids: Vec<&str> = receipt.quests.iter().map(|q| q.quest_id.as_str()).collect();
        assert!(ids.contains(&quests::DAILY_FAST));
        assert!(ids.contains(&quests::WEEKLY_FAST));
    }

    #[tokio::test]
    async fn test_timed_scores_reach_scoreboard() {
        let (backend, _, _, desk) = desk();
        let desk = desk.with_scoreboard(backend.clone());
        let first = desk.record_reaction(Attempt::Timed { score_ms: 420, auto: false }).await.unwrap();
        assert_eq!(first.score, Some(ScoreSummary { plays: 1, best_ms: 420 }));

        let early = desk.record_reaction(Attempt::TooEarly { at_ms: 100 }).await.unwrap();
        assert_eq!(early.score, None);

        let second = desk.record_reaction(Attempt::Timed { score_ms: 1_400, auto: true }).await.unwrap();
        assert_eq!(second.score, Some(ScoreSummary { plays: 2, best_ms: 420 }));
    }

    #[tokio::test]
    async fn test_slow_and_early_attempts_earn_nothing() {
        let (backend, _, _, desk) = desk();
        let slow = desk.record_reaction(Attempt::Timed { score_ms: 1_000, auto: true }).await.unwrap();
        assert_eq!(slow.reward, None);

        let early = desk.record_reaction(Attempt::TooEarly { at_ms: 400 }).await.unwrap();
        assert_eq!(early.reward, None);
        assert!(early.quests.is_empty());
        assert_eq!(desk.reaction_stats().best_ms(), Some(1_000));
        assert_eq!(backend.get_balance("alice").await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_farm_cooldown_and_persistence() {
        let (_, clock, kv, desk) = desk();
        let first = desk.farm_click().await.unwrap();
        assert_eq!(first.state.total_clicks, 1);
        assert!(kv.get(FARM_STATE_KEY).unwrap().is_some());

        clock.advance(Duration::from_millis(4_000));
        match desk.farm_click().await {
            Err(DuelError::SessionState(SessionStateError::CoolingDown { remaining_ms })) => {
                assert_eq!(remaining_ms, 1_000)
            }
            other => panic!("expected cooldown, got {:?}", other),
        }

        clock.advance(Duration::from_millis(1_000));
        let second = desk.farm_click().await.unwrap();
        assert_eq!(second.state.total_clicks, 2);
        assert_eq!(second.state.total_earned, first.reward + second.reward);
    }

    #[tokio::test]
    async fn test_login_quests_claim() {
        let (backend, _, _, desk) = desk();
        desk.login_bonus().await.unwrap();
        assert_eq!(desk.claim_quest(quests::FIRST_LOGIN).await.unwrap(), 500);
        assert_eq!(backend.get_balance("alice").await.unwrap(), 1_500);

        assert!(desk.claim_quest(quests::FIRST_LOGIN).await.is_err());
        assert!(matches!(
            desk.claim_quest("follow_on_x").await,
            Err(DuelError::SessionState(SessionStateError::QuestNotClaimable(_)))
        ));
    }
}
