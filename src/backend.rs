//! In-process game service
//!
//! `LocalBackend` hosts the same engines the client uses, authoritatively: it
//! debits bets, settles payouts exactly once and enforces one active wager
//! per player. It stands in for the hosted service in tests and simulations.
//! It also keeps the crash history, registered accounts with their invite
//! codes and referrals, and the reaction scoreboard.

use crate::clock::Clock;
use crate::config::DuelConfig;
use crate::errors::{DuelError, RemoteError, SessionStateError, ValidationError};
use crate::games::cards::Deck;
use crate::games::crash::{CrashEngine, CrashPhase};
use crate::games::fairness::RoundSeed;
use crate::games::mines::{random_positions, MinesPhase, MinesSetup};
use crate::games::{BlackjackGame, MinesBoard, Multiplier, RevealOutcome};
use crate::quests::{QuestLedger, QuestProgress};
use crate::remote::{
    ActOutcome, CashoutReceipt, GameAction, GameBackend, LeaderboardEntry, QuestBackend, RankInfo,
    RegisteredUser, Registration, RegistryBackend, RemoteResult, RewardSource, RoundConfig, RoundStarted,
    RoundView, ScoreSummary, SessionId, StakingBackend, WithdrawReceipt,
};
use crate::staking::{StakePosition, StakeValue};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Where round outcomes come from
pub trait OutcomeSource: Send + Sync {
    fn crash_seed(&self) -> RoundSeed;

    fn mine_positions(&self, mine_count: u8) -> Vec<usize>;

    fn shuffled_deck(&self) -> Deck;
}

pub struct RandomOutcomes {
    rng: Mutex<StdRng>,
}

impl RandomOutcomes {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible outcomes for simulations
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }
}

impl Default for RandomOutcomes {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeSource for RandomOutcomes {
    fn crash_seed(&self) -> RoundSeed {
        self.with_rng(|rng| RoundSeed::random(rng))
    }

    fn mine_positions(&self, mine_count: u8) -> Vec<usize> {
        self.with_rng(|rng| random_positions(rng, mine_count))
    }

    fn shuffled_deck(&self) -> Deck {
        self.with_rng(|rng| Deck::shuffled(rng))
    }
}

enum LiveRound {
    Crash { engine: CrashEngine, last_sync_ms: u64 },
    Mines(MinesBoard),
    Blackjack(BlackjackGame),
}

impl LiveRound {
    fn view(&self) -> RoundView {
        match self {
            LiveRound::Crash { engine, .. } => RoundView::Crash(engine.snapshot()),
            LiveRound::Mines(board) => RoundView::Mines(board.snapshot()),
            LiveRound::Blackjack(game) => RoundView::Blackjack(game.snapshot()),
        }
    }

    fn is_resolved(&self) -> bool {
        match self {
            LiveRound::Crash { engine, .. } => {
                engine.phase() == CrashPhase::Crashed
                    || engine.bet().map_or(false, |b| b.cashed_out_at.is_some())
            }
            LiveRound::Mines(board) => board.phase() != MinesPhase::Active,
            LiveRound::Blackjack(game) => game.is_resolved(),
        }
    }

    fn payout(&self) -> u64 {
        match self {
            LiveRound::Crash { engine, .. } => engine.bet().map_or(0, |b| b.payout()),
            LiveRound::Mines(board) => board.snapshot().payout.unwrap_or(0),
            LiveRound::Blackjack(game) => game.payout().unwrap_or(0),
        }
    }

    /// Catch a crash round up with wall time, stopping at its crash
    fn sync(&mut self, now_ms: u64) {
        if let LiveRound::Crash { engine, last_sync_ms } = self {
            let elapsed = now_ms.saturating_sub(*last_sync_ms);
            *last_sync_ms = now_ms;
            if let Some(until) = engine.ms_until_crash() {
                engine.advance(Duration::from_millis(elapsed.min(until)));
            }
        }
    }
}

struct SessionRecord {
    user: String,
    bet: u64,
    round: LiveRound,
    /// Set once, when the payout is credited
    settled: Option<u64>,
}

/// Crash points of finished sessions, shared by every crash engine
#[derive(Default)]
struct CrashLedger {
    rounds: u64,
    points: VecDeque<Multiplier>,
}

struct InviteCode {
    used_by: Option<String>,
    /// Wallet holding the code and when the hold lapses
    held: Option<(String, u64)>,
}

#[derive(Clone)]
struct Account {
    wallet: String,
    display_name: String,
    /// User id of the referring player
    referred_by: Option<String>,
    joined: u64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn normalize_wallet(wallet: &str) -> String {
    wallet.trim().to_lowercase()
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub struct LocalBackend {
    config: DuelConfig,
    clock: Arc<dyn Clock>,
    outcomes: Arc<dyn OutcomeSource>,
    balances: DashMap<String, u64>,
    sessions: DashMap<SessionId, SessionRecord>,
    active_by_user: DashMap<String, SessionId>,
    stakes: DashMap<String, StakePosition>,
    quests: DashMap<String, QuestLedger>,
    crash_ledger: Mutex<CrashLedger>,
    invite_codes: DashMap<String, InviteCode>,
    accounts: DashMap<String, Account>,
    /// Lower-case wallet to user id
    wallets: DashMap<String, String>,
    /// Lower-case display name to user id
    names: DashMap<String, String>,
    scores: DashMap<String, Vec<u64>>,
    joined: AtomicU64,
}

fn remote_from(err: DuelError) -> RemoteError {
    match err {
        DuelError::Validation(ValidationError::BetOutOfRange { .. })
        | DuelError::Validation(ValidationError::MineCountOutOfRange { .. })
        | DuelError::Validation(ValidationError::AutoCashoutTooLow(_)) => RemoteError::InvalidBet,
        DuelError::SessionState(SessionStateError::AlreadyResolved)
        | DuelError::SessionState(SessionStateError::WrongPhase { .. })
        | DuelError::SessionState(SessionStateError::NoBet) => RemoteError::NotActive,
        DuelError::Remote(remote) => remote,
        other => RemoteError::InvalidAction(other.to_string()),
    }
}

impl LocalBackend {
    pub fn new(config: DuelConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_outcomes(config, clock, Arc::new(RandomOutcomes::new()))
    }

    pub fn with_outcomes(config: DuelConfig, clock: Arc<dyn Clock>, outcomes: Arc<dyn OutcomeSource>) -> Self {
        Self {
            config,
            clock,
            outcomes,
            balances: DashMap::new(),
            sessions: DashMap::new(),
            active_by_user: DashMap::new(),
            stakes: DashMap::new(),
            quests: DashMap::new(),
            crash_ledger: Mutex::new(CrashLedger::default()),
            invite_codes: DashMap::new(),
            accounts: DashMap::new(),
            wallets: DashMap::new(),
            names: DashMap::new(),
            scores: DashMap::new(),
            joined: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DuelConfig {
        &self.config
    }

    pub fn create_user(&self, user: &str, balance: u64) {
        self.balances.insert(user.to_string(), balance);
    }

    /// Recent crash points of finished crash sessions, newest first
    pub fn crash_history(&self) -> Vec<Multiplier> {
        lock(&self.crash_ledger).points.iter().copied().collect()
    }

    /// Seed the crash history, e.g. from a mirrored copy after a restart
    pub fn restore_crash_history(&self, points: &[Multiplier]) {
        let mut ledger = lock(&self.crash_ledger);
        ledger.points = points.iter().copied().take(self.config.crash.history_len).collect();
        ledger.rounds = ledger.rounds.max(ledger.points.len() as u64);
    }

    /// Make a single-use access code available for sign-up
    pub fn issue_invite_code(&self, code: &str) {
        self.invite_codes.insert(
            normalize_code(code),
            InviteCode {
                used_by: None,
                held: None,
            },
        );
    }

    /// Active session id of `user`, if any
    pub fn active_session(&self, user: &str) -> Option<SessionId> {
        self.active_by_user.get(user).map(|s| s.value().clone())
    }

    fn balance_of(&self, user: &str) -> RemoteResult<u64> {
        self.balances
            .get(user)
            .map(|b| *b.value())
            .ok_or_else(|| RemoteError::UnknownUser(user.to_string()))
    }

    fn credit(&self, user: &str, amount: u64) -> RemoteResult<u64> {
        let mut balance = self
            .balances
            .get_mut(user)
            .ok_or_else(|| RemoteError::UnknownUser(user.to_string()))?;
        *balance += amount;
        Ok(*balance)
    }

    fn debit(&self, user: &str, amount: u64) -> RemoteResult<u64> {
        let mut balance = self
            .balances
            .get_mut(user)
            .ok_or_else(|| RemoteError::UnknownUser(user.to_string()))?;
        if *balance < amount {
            return Err(RemoteError::InsufficientBalance);
        }
        *balance -= amount;
        Ok(*balance)
    }

    fn open_round(&self, bet: u64, config: RoundConfig) -> Result<LiveRound, DuelError> {
        let limits = &self.config.limits;
        match config {
            RoundConfig::Crash { auto_cashout } => {
                limits.check(bet)?;
                let seed = self.outcomes.crash_seed();
                let mut engine = {
                    let mut ledger = lock(&self.crash_ledger);
                    ledger.rounds += 1;
                    let points: Vec<Multiplier> = ledger.points.iter().copied().collect();
                    let mut engine = CrashEngine::new(self.config.crash.clone(), Box::new(move || seed.clone()))
                        .starting_at(ledger.rounds);
                    engine.restore_history(&points);
                    engine
                };
                engine.place_bet(bet, auto_cashout, limits)?;
                Ok(LiveRound::Crash {
                    engine,
                    last_sync_ms: self.clock.now_ms(),
                })
            }
            RoundConfig::Mines { mine_count } => {
                let setup = MinesSetup { bet, mine_count };
                setup.validate(limits, &self.config.mines)?;
                let positions = self.outcomes.mine_positions(mine_count);
                Ok(LiveRound::Mines(MinesBoard::start(setup, &positions, limits, &self.config.mines)?))
            }
            RoundConfig::Blackjack => {
                let deck = self.outcomes.shuffled_deck();
                Ok(LiveRound::Blackjack(BlackjackGame::deal(
                    bet,
                    deck,
                    limits,
                    self.config.blackjack.clone(),
                )?))
            }
        }
    }

    /// Push the crash point of a finished crash session that got off the ground
    fn record_crash_point(&self, round: &LiveRound) {
        let LiveRound::Crash { engine, .. } = round else { return };
        if engine.phase() == CrashPhase::Waiting {
            return;
        }
        let mut ledger = lock(&self.crash_ledger);
        ledger.points.push_front(engine.committed_crash_point());
        ledger.points.truncate(self.config.crash.history_len);
    }

    /// Current view of a session. Settled crash sessions carry the shared
    /// history, which already includes their own crash point.
    fn view_of(&self, record: &SessionRecord) -> RoundView {
        match record.round.view() {
            RoundView::Crash(mut snapshot) if record.settled.is_some() => {
                snapshot.history = self.crash_history();
                RoundView::Crash(snapshot)
            }
            view => view,
        }
    }

    /// Credit the payout of a resolved session exactly once
    fn settle(&self, record: &mut SessionRecord, session_id: &str) -> RemoteResult<Option<u64>> {
        if record.settled.is_some() || !record.round.is_resolved() {
            return Ok(record.settled);
        }
        let payout = record.round.payout();
        if payout > 0 {
            self.credit(&record.user, payout)?;
        }
        record.settled = Some(payout);
        self.record_crash_point(&record.round);
        self.active_by_user
            .remove_if(&record.user, |_, active| active == session_id);
        tracing::info!(
            session = %session_id,
            user = %record.user,
            bet = record.bet,
            payout,
            "session settled"
        );
        Ok(Some(payout))
    }

    fn act_sync(&self, session_id: &str, action: GameAction) -> RemoteResult<ActOutcome> {
        let now = self.clock.now_ms();
        let mut record = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RemoteError::UnknownSession(session_id.to_string()))?;
        let record = &mut *record;
        record.round.sync(now);

        if record.settled.is_none() && !record.round.is_resolved() {
            if action == GameAction::Forfeit {
                record.settled = Some(0);
                self.record_crash_point(&record.round);
                self.active_by_user
                    .remove_if(&record.user, |_, active| active == session_id);
                tracing::info!(session = %session_id, user = %record.user, "session forfeited");
                return Ok(ActOutcome {
                    state: self.view_of(record),
                    resolved: true,
                    payout: Some(0),
                    new_balance: self.balance_of(&record.user)?,
                });
            }
            match (&mut record.round, action) {
                (_, GameAction::Poll) => {}
                (LiveRound::Mines(board), GameAction::Reveal { cell }) => {
                    if let RevealOutcome::Mine { cell } = board.reveal(cell).map_err(remote_from)? {
                        tracing::debug!(session = %session_id, cell, "mine hit");
                    }
                }
                (LiveRound::Blackjack(game), GameAction::Hit) => {
                    game.hit().map_err(|e| remote_from(e.into()))?;
                }
                (LiveRound::Blackjack(game), GameAction::Stand) => {
                    game.stand().map_err(|e| remote_from(e.into()))?;
                }
                (round, action) => {
                    return Err(RemoteError::InvalidAction(format!(
                        "{:?} is not valid for {}",
                        action,
                        round.view().kind()
                    )));
                }
            }
        } else if action != GameAction::Poll {
            return Err(RemoteError::NotActive);
        }

        let payout = self.settle(record, session_id)?;
        Ok(ActOutcome {
            state: self.view_of(record),
            resolved: record.settled.is_some(),
            payout,
            new_balance: self.balance_of(&record.user)?,
        })
    }

    fn cashout_sync(&self, session_id: &str) -> RemoteResult<CashoutReceipt> {
        let now = self.clock.now_ms();
        let mut record = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RemoteError::UnknownSession(session_id.to_string()))?;
        let record = &mut *record;
        record.round.sync(now);
        if record.settled.is_none() && record.round.is_resolved() {
            // An auto-cashout or the crash landed since the last call.
            let payout = self.settle(record, session_id)?.unwrap_or(0);
            let LiveRound::Crash { engine, .. } = &record.round else {
                return Err(RemoteError::NotActive);
            };
            let Some(multiplier) = engine.bet().and_then(|b| b.cashed_out_at) else {
                return Err(RemoteError::NotActive);
            };
            return Ok(CashoutReceipt {
                payout,
                multiplier,
                new_balance: self.balance_of(&record.user)?,
            });
        }
        if record.settled.is_some() {
            return Err(RemoteError::NotActive);
        }

        let multiplier = match &mut record.round {
            LiveRound::Crash { engine, .. } => {
                engine.cashout().map_err(|e| remote_from(e.into()))?;
                engine
                    .bet()
                    .and_then(|b| b.cashed_out_at)
                    .unwrap_or(Multiplier::ONE)
            }
            LiveRound::Mines(board) => {
                board.cashout().map_err(|e| remote_from(e.into()))?;
                board.multiplier()
            }
            LiveRound::Blackjack(_) => {
                return Err(RemoteError::InvalidAction("blackjack has no cashout".to_string()));
            }
        };

        let payout = self.settle(record, session_id)?.unwrap_or(0);
        Ok(CashoutReceipt {
            payout,
            multiplier,
            new_balance: self.balance_of(&record.user)?,
        })
    }

    fn start_sync(&self, user: &str, bet: u64, config: RoundConfig) -> RemoteResult<RoundStarted> {
        let balance = self.balance_of(user)?;
        if let Some(active) = self.active_session(user) {
            tracing::debug!(user, session = %active, "start rejected, session active");
            return Err(RemoteError::SessionConflict);
        }
        let round = self.open_round(bet, config).map_err(remote_from)?;
        if balance < bet {
            return Err(RemoteError::InsufficientBalance);
        }

        let session_id = Uuid::new_v4().to_string();
        // Claim the active slot first so concurrent starts cannot both win.
        match self.active_by_user.entry(user.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(RemoteError::SessionConflict),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session_id.clone());
            }
        }
        let new_balance = match self.debit(user, bet) {
            Ok(b) => b,
            Err(e) => {
                self.active_by_user.remove(user);
                return Err(e);
            }
        };

        let mut record = SessionRecord {
            user: user.to_string(),
            bet,
            round,
            settled: None,
        };
        // A natural blackjack resolves on the deal.
        self.settle(&mut record, &session_id)?;
        let state = self.view_of(&record);
        let new_balance = self.balance_of(user).unwrap_or(new_balance);
        tracing::info!(user, session = %session_id, game = %config.kind(), bet, "round started");
        self.sessions.insert(session_id.clone(), record);

        Ok(RoundStarted {
            session_id,
            state,
            new_balance,
        })
    }

    fn check_code(&self, code: &str, wallet: Option<&str>) -> RemoteResult<String> {
        let code = normalize_code(code);
        let now = self.clock.now_ms();
        let entry = self
            .invite_codes
            .get(&code)
            .ok_or_else(|| RemoteError::Rejected("Invalid invite code".to_string()))?;
        if entry.used_by.is_some() {
            return Err(RemoteError::Rejected("Code already used".to_string()));
        }
        if let Some((holder, until)) = &entry.held {
            if *until > now && wallet != Some(holder.as_str()) {
                return Err(RemoteError::Rejected("Code is reserved".to_string()));
            }
        }
        Ok(code)
    }

    fn account_view(&self, user_id: &str, account: &Account) -> RegisteredUser {
        let referred_by = account
            .referred_by
            .as_ref()
            .and_then(|id| self.accounts.get(id).map(|a| a.display_name.clone()));
        RegisteredUser {
            user_id: user_id.to_string(),
            wallet: account.wallet.clone(),
            display_name: account.display_name.clone(),
            referred_by,
        }
    }

    fn register_sync(&self, registration: Registration) -> RemoteResult<RegisteredUser> {
        let wallet = normalize_wallet(&registration.wallet);
        let display_name = registration.display_name.trim().to_string();
        let name_key = display_name.to_lowercase();
        let rules = &self.config.registry;
        let len = display_name.chars().count();
        if wallet.is_empty() || len < rules.display_name_min || len > rules.display_name_max {
            return Err(RemoteError::Rejected("Invalid registration".to_string()));
        }
        if self.wallets.contains_key(&wallet) {
            return Err(RemoteError::Rejected("Wallet already registered".to_string()));
        }

        let referrer = match registration.referrer.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) if r.to_lowercase() == name_key => {
                return Err(RemoteError::Rejected("Cannot use your own username as referral code".to_string()));
            }
            Some(r) => Some(
                self.names
                    .get(&r.to_lowercase())
                    .map(|id| id.value().clone())
                    .ok_or_else(|| RemoteError::Rejected("Invalid invite code - username not found".to_string()))?,
            ),
            None => None,
        };
        let code = match registration.access_code.as_deref() {
            Some(code) => Some(self.check_code(code, Some(&wallet))?),
            None => None,
        };

        let user_id = Uuid::new_v4().to_string();
        match self.names.entry(name_key.clone()) {
            Entry::Occupied(_) => return Err(RemoteError::Rejected("Display name already taken".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(user_id.clone());
            }
        }
        match self.wallets.entry(wallet.clone()) {
            Entry::Occupied(_) => {
                self.names.remove(&name_key);
                return Err(RemoteError::Rejected("Wallet already registered".to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(user_id.clone());
            }
        }
        if let Some(code) = code {
            if let Some(mut entry) = self.invite_codes.get_mut(&code) {
                entry.used_by = Some(user_id.clone());
                entry.held = None;
            }
        }

        let account = Account {
            wallet,
            display_name,
            referred_by: referrer,
            joined: self.joined.fetch_add(1, Ordering::SeqCst),
        };
        let view = self.account_view(&user_id, &account);
        self.accounts.insert(user_id.clone(), account);
        self.balances.insert(user_id.clone(), rules.starting_balance);
        tracing::info!(user = %user_id, name = %view.display_name, referred_by = ?view.referred_by, "player registered");
        Ok(view)
    }

    /// Registered players ranked by balance; ties share a rank
    fn ranked(&self) -> Vec<LeaderboardEntry> {
        let mut rows: Vec<LeaderboardEntry> = self
            .accounts
            .iter()
            .map(|a| LeaderboardEntry {
                rank: 0,
                user_id: a.key().clone(),
                display_name: a.display_name.clone(),
                wallet: a.wallet.clone(),
                gc_balance: self.balances.get(a.key()).map_or(0, |b| *b.value()),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.gc_balance
                .cmp(&a.gc_balance)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        let mut previous = None;
        for (i, row) in rows.iter_mut().enumerate() {
            row.rank = match previous {
                Some((balance, rank)) if balance == row.gc_balance => rank,
                _ => i as u32 + 1,
            };
            previous = Some((row.gc_balance, row.rank));
        }
        rows
    }

    fn stake_value_now(&self, user: &str) -> StakeValue {
        let rate = self.config.staking.hourly_rate_bps;
        match self.stakes.get(user) {
            Some(position) => StakeValue::of(position.value(), self.clock.now_ms(), rate),
            None => StakeValue::empty(rate),
        }
    }
}

#[async_trait]
impl GameBackend for LocalBackend {
    async fn start_round(&self, user: &str, bet: u64, config: RoundConfig) -> RemoteResult<RoundStarted> {
        self.start_sync(user, bet, config)
    }

    async fn act(&self, session: &str, action: GameAction) -> RemoteResult<ActOutcome> {
        self.act_sync(session, action)
    }

    async fn cashout(&self, session: &str) -> RemoteResult<CashoutReceipt> {
        self.cashout_sync(session)
    }

    async fn get_balance(&self, user: &str) -> RemoteResult<u64> {
        self.balance_of(user)
    }

    async fn grant_reward(&self, user: &str, amount: u64, source: RewardSource) -> RemoteResult<u64> {
        let balance = self.credit(user, amount)?;
        tracing::info!(user, amount, ?source, "reward granted");
        Ok(balance)
    }
}

#[async_trait]
impl StakingBackend for LocalBackend {
    async fn stake_deposit(&self, user: &str, amount: u64) -> RemoteResult<StakeValue> {
        if amount == 0 || amount < self.config.staking.min_deposit {
            return Err(RemoteError::InvalidBet);
        }
        self.debit(user, amount)?;
        let now = self.clock.now_ms();
        let rate = self.config.staking.hourly_rate_bps;
        self.stakes
            .entry(user.to_string())
            .and_modify(|p| *p = p.top_up(amount, now, rate))
            .or_insert(StakePosition {
                principal: amount,
                since_ms: now,
            });
        Ok(self.stake_value_now(user))
    }

    async fn stake_withdraw(&self, user: &str) -> RemoteResult<WithdrawReceipt> {
        let value = self.stake_value_now(user);
        let (_, _position) = self.stakes.remove(user).ok_or(RemoteError::NotActive)?;
        let new_balance = self.credit(user, value.current_value)?;
        Ok(WithdrawReceipt {
            amount_withdrawn: value.current_value,
            new_balance,
        })
    }

    async fn get_stake_value(&self, user: &str) -> RemoteResult<StakeValue> {
        self.balance_of(user)?;
        Ok(self.stake_value_now(user))
    }
}

#[async_trait]
impl QuestBackend for LocalBackend {
    async fn update_quest_progress(&self, user: &str, quest_id: &str) -> RemoteResult<QuestProgress> {
        self.balance_of(user)?;
        let now = self.clock.now();
        self.quests
            .entry(user.to_string())
            .or_default()
            .advance(quest_id, 1, now)
            .ok_or_else(|| RemoteError::InvalidAction(format!("unknown quest {}", quest_id)))
    }

    async fn claim_quest_reward(&self, user: &str, quest_id: &str) -> RemoteResult<u64> {
        self.balance_of(user)?;
        let now = self.clock.now();
        let reward = self
            .quests
            .entry(user.to_string())
            .or_default()
            .claim(quest_id, now)
            .map_err(|e| RemoteError::InvalidAction(e.to_string()))?;
        self.credit(user, reward)
    }

    async fn get_user_quests(&self, user: &str) -> RemoteResult<Vec<QuestProgress>> {
        self.balance_of(user)?;
        let now = self.clock.now();
        Ok(self.quests.entry(user.to_string()).or_default().all(now))
    }
}

#[async_trait]
impl RegistryBackend for LocalBackend {
    async fn validate_invite_code(&self, code: &str) -> RemoteResult<()> {
        self.check_code(code, None).map(|_| ())
    }

    async fn reserve_invite_code(&self, code: &str, wallet: &str) -> RemoteResult<()> {
        let wallet = normalize_wallet(wallet);
        let code = self.check_code(code, Some(&wallet))?;
        let until = self.clock.now_ms() + self.config.registry.reservation_ms;
        if let Some(mut entry) = self.invite_codes.get_mut(&code) {
            entry.held = Some((wallet, until));
        }
        Ok(())
    }

    async fn register_user(&self, registration: Registration) -> RemoteResult<RegisteredUser> {
        self.register_sync(registration)
    }

    async fn login_with_wallet(&self, wallet: &str) -> RemoteResult<RegisteredUser> {
        let wallet = normalize_wallet(wallet);
        let user_id = self
            .wallets
            .get(&wallet)
            .map(|id| id.value().clone())
            .ok_or_else(|| RemoteError::UnknownUser(wallet.clone()))?;
        let account = self
            .accounts
            .get(&user_id)
            .map(|a| a.value().clone())
            .ok_or_else(|| RemoteError::UnknownUser(user_id.clone()))?;
        Ok(self.account_view(&user_id, &account))
    }

    async fn get_referrals(&self, user: &str) -> RemoteResult<Vec<String>> {
        if !self.accounts.contains_key(user) {
            return Err(RemoteError::UnknownUser(user.to_string()));
        }
        let mut referred: Vec<(u64, String)> = self
            .accounts
            .iter()
            .filter(|a| a.referred_by.as_deref() == Some(user))
            .map(|a| (a.joined, a.display_name.clone()))
            .collect();
        referred.sort();
        Ok(referred.into_iter().map(|(_, name)| name).collect())
    }

    async fn submit_score(&self, user: &str, time_ms: u64) -> RemoteResult<ScoreSummary> {
        self.balance_of(user)?;
        let mut scores = self.scores.entry(user.to_string()).or_default();
        scores.push(time_ms);
        Ok(ScoreSummary {
            plays: scores.len() as u32,
            best_ms: scores.iter().copied().min().unwrap_or(time_ms),
        })
    }

    async fn get_leaderboard(&self, limit: usize) -> RemoteResult<Vec<LeaderboardEntry>> {
        let mut rows = self.ranked();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_user_rank(&self, user: &str) -> RemoteResult<RankInfo> {
        self.ranked()
            .into_iter()
            .find(|row| row.user_id == user)
            .map(|row| RankInfo {
                rank: row.rank,
                gc_balance: row.gc_balance,
            })
            .ok_or_else(|| RemoteError::UnknownUser(user.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::games::cards::{Card, Rank, Suit};

    struct FixedOutcomes {
        seed: RoundSeed,
        mines: Vec<usize>,
        deck: Vec<Card>,
    }

    impl OutcomeSource for FixedOutcomes {
        fn crash_seed(&self) -> RoundSeed {
            self.seed.clone()
        }

        fn mine_positions(&self, _mine_count: u8) -> Vec<usize> {
            self.mines.clone()
        }

        fn shuffled_deck(&self) -> Deck {
            Deck::stacked(&self.deck)
        }
    }

    fn backend_with(mines: Vec<usize>, deck: Vec<Card>) -> (LocalBackend, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let outcomes = FixedOutcomes {
            seed: RoundSeed::from_bytes([3u8; 32]),
            mines,
            deck,
        };
        let backend = LocalBackend::with_outcomes(DuelConfig::default(), Arc::new(clock.clone()), Arc::new(outcomes));
        backend.create_user("alice", 1_000);
        (backend, clock)
    }

    #[tokio::test]
    async fn test_mines_round_settles_once() {
        let (backend, _) = backend_with(vec![0, 1, 2, 3, 4], vec![]);
        let started = backend.start_round("alice", 100, RoundConfig::Mines { mine_count: 5 }).await.unwrap();
        assert_eq!(started.new_balance, 900);

        for cell in 5..15 {
            backend.act(&started.session_id, GameAction::Reveal { cell }).await.unwrap();
        }
        let receipt = backend.cashout(&started.session_id).await.unwrap();
        assert_eq!(receipt.payout, 340);
        assert_eq!(receipt.multiplier, Multiplier(34_000));
        assert_eq!(receipt.new_balance, 1_240);

        assert_eq!(backend.cashout(&started.session_id).await, Err(RemoteError::NotActive));
        let polled = backend.act(&started.session_id, GameAction::Poll).await.unwrap();
        assert!(polled.resolved);
        assert_eq!(polled.new_balance, 1_240);
        assert!(backend.active_session("alice").is_none());
    }

    #[tokio::test]
    async fn test_single_active_session() {
        let (backend, _) = backend_with(vec![0], vec![]);
        backend.start_round("alice", 100, RoundConfig::Mines { mine_count: 1 }).await.unwrap();
        let second = backend.start_round("alice", 100, RoundConfig::Blackjack).await;
        assert_eq!(second, Err(RemoteError::SessionConflict));
        assert_eq!(backend.get_balance("alice").await.unwrap(), 900);
    }

    #[tokio::test]
    async fn test_start_rejections_leave_balance() {
        let (backend, _) = backend_with(vec![0], vec![]);
        assert_eq!(
            backend.start_round("alice", 5, RoundConfig::Blackjack).await,
            Err(RemoteError::InvalidBet)
        );
        assert_eq!(
            backend.start_round("alice", 5_000, RoundConfig::Blackjack).await,
            Err(RemoteError::InsufficientBalance)
        );
        assert_eq!(backend.get_balance("alice").await.unwrap(), 1_000);
        assert!(backend.active_session("alice").is_none());
    }

    #[tokio::test]
    async fn test_natural_push_refunds_on_deal() {
        let s = |r| Card::new(r, Suit::Spades);
        let h = |r| Card::new(r, Suit::Hearts);
        let (backend, _) = backend_with(vec![], vec![s(Rank::Ace), h(Rank::Ace), s(Rank::King), h(Rank::King)]);
        let started = backend.start_round("alice", 100, RoundConfig::Blackjack).await.unwrap();
        assert_eq!(started.new_balance, 1_000);
        assert!(backend.active_session("alice").is_none());
    }

    #[tokio::test]
    async fn test_crash_poll_follows_clock() {
        let (backend, clock) = backend_with(vec![], vec![]);
        let started = backend
            .start_round("alice", 100, RoundConfig::Crash { auto_cashout: None })
            .await
            .unwrap();
        assert!(matches!(started.state, RoundView::Crash(ref c) if c.phase == CrashPhase::Waiting));
        assert_eq!(backend.cashout(&started.session_id).await, Err(RemoteError::NotActive));

        clock.advance(Duration::from_millis(3_000));
        let polled = backend.act(&started.session_id, GameAction::Poll).await.unwrap();
        assert!(matches!(polled.state, RoundView::Crash(ref c) if c.phase == CrashPhase::Flying));

        // Long after the crash the session is settled with no payout.
        clock.advance(Duration::from_secs(3_600));
        let polled = backend.act(&started.session_id, GameAction::Poll).await.unwrap();
        assert!(polled.resolved);
        assert_eq!(polled.payout, Some(0));
        assert!(matches!(polled.state, RoundView::Crash(ref c) if c.phase == CrashPhase::Crashed && c.bet.is_some()));
        assert_eq!(polled.new_balance, 900);
    }

    #[tokio::test]
    async fn test_forfeit_and_invalid_actions() {
        let (backend, _) = backend_with(vec![3], vec![]);
        let started = backend.start_round("alice", 100, RoundConfig::Mines { mine_count: 1 }).await.unwrap();
        assert!(matches!(
            backend.act(&started.session_id, GameAction::Hit).await,
            Err(RemoteError::InvalidAction(_))
        ));
        let out = backend.act(&started.session_id, GameAction::Forfeit).await.unwrap();
        assert!(out.resolved);
        assert_eq!(out.new_balance, 900);
        assert_eq!(
            backend.act(&started.session_id, GameAction::Reveal { cell: 1 }).await,
            Err(RemoteError::NotActive)
        );
        assert!(matches!(
            backend.act("missing", GameAction::Poll).await,
            Err(RemoteError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_staking_roundtrip() {
        let (backend, clock) = backend_with(vec![], vec![]);
        let value = backend.stake_deposit("alice", 500).await.unwrap();
        assert_eq!(value.principal, 500);
        assert_eq!(backend.get_balance("alice").await.unwrap(), 500);

        clock.advance(Duration::from_secs(10 * 3_600));
        let value = backend.get_stake_value("alice").await.unwrap();
        assert!(value.current_value > 500);

        let receipt = backend.stake_withdraw("alice").await.unwrap();
        assert_eq!(receipt.amount_withdrawn, value.current_value);
        assert_eq!(receipt.new_balance, 500 + value.current_value);
        assert_eq!(backend.stake_withdraw("alice").await, Err(RemoteError::NotActive));
        assert_eq!(backend.stake_deposit("alice", 5_000).await, Err(RemoteError::InsufficientBalance));
    }

    #[tokio::test]
    async fn test_quest_claim_credits() {
        let (backend, _) = backend_with(vec![], vec![]);
        backend.update_quest_progress("alice", "first_login").await.unwrap();
        assert_eq!(backend.claim_quest_reward("alice", "first_login").await, Ok(1_500));
        assert!(backend.claim_quest_reward("alice", "first_login").await.is_err());
        let quests = backend.get_user_quests("alice").await.unwrap();
        assert!(quests.iter().any(|q| q.quest_id == "first_login" && q.claimed));
    }

    fn crash_played_out(backend: &LocalBackend, clock: &ManualClock) -> ActOutcome {
        let started = backend
            .start_sync("alice", 10, RoundConfig::Crash { auto_cashout: None })
            .unwrap();
        clock.advance(Duration::from_secs(3_600));
        backend.act_sync(&started.session_id, GameAction::Poll).unwrap()
    }

    fn crash_view(outcome: &ActOutcome) -> &crate::games::CrashSnapshot {
        match &outcome.state {
            RoundView::Crash(snapshot) => snapshot,
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[test]
    fn test_crash_history_spans_sessions() {
        let clock = ManualClock::new(1_000_000);
        let backend = LocalBackend::with_outcomes(
            DuelConfig::default(),
            Arc::new(clock.clone()),
            Arc::new(RandomOutcomes::seeded(7)),
        );
        backend.create_user("alice", 1_000);

        let mut points = Vec::new();
        for _ in 0..3 {
            let outcome = crash_played_out(&backend, &clock);
            let snapshot = crash_view(&outcome);
            points.insert(0, snapshot.crash_point.expect("crashed rounds reveal their point"));
            assert_eq!(snapshot.history, points);
        }
        assert_eq!(crash_view(&crash_played_out(&backend, &clock)).round_id, 4);
        assert_eq!(backend.crash_history().len(), 4);
        assert_eq!(&backend.crash_history()[1..], &points[..]);
    }

    #[test]
    fn test_restored_history_reaches_new_rounds() {
        let (backend, _) = backend_with(vec![], vec![]);
        let earlier = vec![Multiplier(31_000), Multiplier(12_500)];
        backend.restore_crash_history(&earlier);

        let started = backend
            .start_sync("alice", 10, RoundConfig::Crash { auto_cashout: None })
            .unwrap();
        match started.state {
            RoundView::Crash(snapshot) => {
                assert_eq!(snapshot.history, earlier);
                assert_eq!(snapshot.round_id, 3);
            }
            other => panic!("unexpected view {:?}", other),
        }

        // Forfeiting before launch leaves no crash point behind.
        backend.act_sync(&started.session_id, GameAction::Forfeit).unwrap();
        assert_eq!(backend.crash_history(), earlier);
    }

    #[tokio::test]
    async fn test_cashout_after_auto_target_passed_pays_target() {
        let (backend, clock) = backend_with(vec![], vec![]);
        let started = backend
            .start_round("alice", 100, RoundConfig::Crash { auto_cashout: Some(Multiplier(10_100)) })
            .await
            .unwrap();
        clock.advance(Duration::from_secs(3_600));

        let receipt = backend.cashout(&started.session_id).await.unwrap();
        assert_eq!(receipt.multiplier, Multiplier(10_100));
        assert_eq!(receipt.payout, 101);
        assert_eq!(receipt.new_balance, 1_001);
        assert!(backend.active_session("alice").is_none());

        assert_eq!(backend.cashout(&started.session_id).await, Err(RemoteError::NotActive));
        let polled = backend.act(&started.session_id, GameAction::Poll).await.unwrap();
        assert_eq!(polled.payout, Some(101));
        assert_eq!(polled.new_balance, 1_001);
        assert_eq!(backend.crash_history().len(), 1);
    }

    #[tokio::test]
    async fn test_cashout_after_crash_settles_loss() {
        let (backend, clock) = backend_with(vec![], vec![]);
        let started = backend
            .start_round("alice", 100, RoundConfig::Crash { auto_cashout: None })
            .await
            .unwrap();
        clock.advance(Duration::from_secs(3_600));

        assert_eq!(backend.cashout(&started.session_id).await, Err(RemoteError::NotActive));
        assert!(backend.active_session("alice").is_none());
        assert_eq!(backend.get_balance("alice").await.unwrap(), 900);
    }

    fn signup(name: &str, wallet: &str, referrer: Option<&str>) -> Registration {
        Registration {
            wallet: wallet.to_string(),
            display_name: name.to_string(),
            access_code: None,
            referrer: referrer.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_invite_code_reservation_and_use() {
        let (backend, clock) = backend_with(vec![], vec![]);
        backend.issue_invite_code("arena-01");

        assert!(backend.validate_invite_code(" arena-01 ").await.is_ok());
        assert_eq!(
            backend.validate_invite_code("nope").await,
            Err(RemoteError::Rejected("Invalid invite code".to_string()))
        );

        backend.reserve_invite_code("ARENA-01", "0xAAA1").await.unwrap();
        assert_eq!(
            backend.reserve_invite_code("ARENA-01", "0xBBB2").await,
            Err(RemoteError::Rejected("Code is reserved".to_string()))
        );

        let mut registration = signup("bob", "0xaaa1", None);
        registration.access_code = Some("arena-01".to_string());
        let bob = backend.register_user(registration).await.unwrap();
        assert_eq!(bob.wallet, "0xaaa1");
        assert_eq!(backend.get_balance(&bob.user_id).await, Ok(0));

        // Once used the code stays used, even after the hold lapses.
        clock.advance(Duration::from_secs(600));
        assert_eq!(
            backend.validate_invite_code("arena-01").await,
            Err(RemoteError::Rejected("Code already used".to_string()))
        );
    }

    #[tokio::test]
    async fn test_expired_reservation_frees_code() {
        let (backend, clock) = backend_with(vec![], vec![]);
        backend.issue_invite_code("ARENA-02");
        backend.reserve_invite_code("ARENA-02", "0xAAA1").await.unwrap();
        clock.advance(Duration::from_millis(backend.config().registry.reservation_ms));
        assert!(backend.reserve_invite_code("ARENA-02", "0xBBB2").await.is_ok());
    }

    #[tokio::test]
    async fn test_referral_registration_rules() {
        let (backend, _) = backend_with(vec![], vec![]);
        let bob = backend.register_user(signup("Bob", "0x01", None)).await.unwrap();

        let carol = backend.register_user(signup("carol", "0x02", Some(" BOB "))).await.unwrap();
        assert_eq!(carol.referred_by.as_deref(), Some("Bob"));

        let reject = |msg: &str| -> RemoteResult<RegisteredUser> { Err(RemoteError::Rejected(msg.to_string())) };
        assert_eq!(
            backend.register_user(signup("dave", "0x03", Some("dave"))).await,
            reject("Cannot use your own username as referral code")
        );
        assert_eq!(
            backend.register_user(signup("dave", "0x03", Some("zed"))).await,
            reject("Invalid invite code - username not found")
        );
        assert_eq!(
            backend.register_user(signup("BOB", "0x03", None)).await,
            reject("Display name already taken")
        );
        assert_eq!(
            backend.register_user(signup("erin", "0X01", None)).await,
            reject("Wallet already registered")
        );
        assert_eq!(backend.register_user(signup("ed", "0x04", None)).await, reject("Invalid registration"));

        assert_eq!(backend.get_referrals(&bob.user_id).await.unwrap(), vec!["carol".to_string()]);
        let again = backend.login_with_wallet("0X02").await.unwrap();
        assert_eq!(again, carol);
        assert!(matches!(backend.login_with_wallet("0x99").await, Err(RemoteError::UnknownUser(_))));
    }

    #[tokio::test]
    async fn test_leaderboard_ranks_by_balance() {
        let (backend, _) = backend_with(vec![], vec![]);
        let bob = backend.register_user(signup("bob", "0x01", None)).await.unwrap();
        let carol = backend.register_user(signup("carol", "0x02", None)).await.unwrap();
        let dave = backend.register_user(signup("dave", "0x03", None)).await.unwrap();
        backend.grant_reward(&carol.user_id, 500, RewardSource::Farm).await.unwrap();
        backend.grant_reward(&bob.user_id, 100, RewardSource::Farm).await.unwrap();
        backend.grant_reward(&dave.user_id, 100, RewardSource::Farm).await.unwrap();

        let board = backend.get_leaderboard(100).await.unwrap();
        let ranks: Vec<(&str, u32)> = board.iter().map(|e| (e.display_name.as_str(), e.rank)).collect();
        assert_eq!(ranks, vec![("carol", 1), ("bob", 2), ("dave", 2)]);
        assert_eq!(backend.get_leaderboard(1).await.unwrap().len(), 1);

        let rank = backend.get_user_rank(&dave.user_id).await.unwrap();
        assert_eq!(rank, RankInfo { rank: 2, gc_balance: 100 });
        // Unregistered wallets hold balances but have no place on the board.
        assert!(backend.get_user_rank("alice").await.is_err());
    }

    #[tokio::test]
    async fn test_scores_track_plays_and_best() {
        let (backend, _) = backend_with(vec![], vec![]);
        assert_eq!(
            backend.submit_score("alice", 300).await,
            Ok(ScoreSummary { plays: 1, best_ms: 300 })
        );
        assert_eq!(
            backend.submit_score("alice", 180).await,
            Ok(ScoreSummary { plays: 2, best_ms: 180 })
        );
        assert!(backend.submit_score("nobody", 100).await.is_err());
    }
}
