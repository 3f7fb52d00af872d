//! Client-side wager orchestration
//!
//! `WagerTable` binds player intents to the game service. It validates input
//! locally, allows one outstanding request per session, and applies only
//! responses that belong to the current epoch. A reset bumps the epoch, so a
//! response that arrives afterwards is dropped instead of resurrecting the
//! old session. With a store attached, the crash history carried by crash
//! views is mirrored under `crash_history`.

use crate::balance::BalanceFacade;
use crate::config::DuelConfig;
use crate::errors::{DuelError, DuelResult, SessionStateError, ValidationError};
use crate::games::crash::{self, CrashPhase};
use crate::games::mines::MinesSetup;
use crate::games::{GameKind, Multiplier, WagerStatus};
use crate::kv::KvStore;
use crate::metrics::WagerMetrics;
use crate::remote::{GameAction, GameBackend, RoundConfig, RoundView, SessionId};
use crate::scheduler::{Scheduler, TimerId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWager {
    pub session_id: SessionId,
    pub kind: GameKind,
    pub bet: u64,
    pub status: WagerStatus,
    pub state: RoundView,
    pub payout: Option<u64>,
}

impl ActiveWager {
    fn is_open(&self) -> bool {
        self.status != WagerStatus::Resolved
    }

    fn knows_revealed(&self, cell: usize) -> bool {
        matches!(&self.state, RoundView::Mines(board) if board.revealed.contains(&cell))
    }
}

#[derive(Default)]
struct TableState {
    active: Option<ActiveWager>,
    in_flight: bool,
    epoch: u64,
    /// Last crash history written to the store
    mirrored: Vec<Multiplier>,
}

fn lock(state: &Mutex<TableState>) -> MutexGuard<'_, TableState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the in-flight flag when the request finishes, unless a reset
/// already moved the table to a newer epoch.
struct InFlight {
    state: Arc<Mutex<TableState>>,
    epoch: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut st = lock(&self.state);
        if st.epoch == self.epoch {
            st.in_flight = false;
        }
    }
}

pub struct WagerTable {
    backend: Arc<dyn GameBackend>,
    balance: Arc<BalanceFacade>,
    config: DuelConfig,
    state: Arc<Mutex<TableState>>,
    scheduler: Scheduler,
    metrics: Option<WagerMetrics>,
    store: Option<Arc<dyn KvStore>>,
}

impl WagerTable {
    pub fn new(backend: Arc<dyn GameBackend>, balance: Arc<BalanceFacade>, config: DuelConfig) -> Self {
        Self {
            backend,
            balance,
            config,
            state: Arc::new(Mutex::new(TableState::default())),
            scheduler: Scheduler::new(),
            metrics: None,
            store: None,
        }
    }

    /// Mirror crash history into `store`, starting from what it already holds
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        match crash::load_history(store.as_ref()) {
            Ok(points) => lock(&self.state).mirrored = points,
            Err(e) => tracing::warn!(error = %e, "could not read mirrored crash history"),
        }
        self.store = Some(store);
        self
    }

    /// Most recent crash points seen, newest first
    pub fn crash_history(&self) -> Vec<Multiplier> {
        lock(&self.state).mirrored.clone()
    }

    fn mirror_history(&self, state: &RoundView) {
        let RoundView::Crash(snapshot) = state else { return };
        {
            let mut st = lock(&self.state);
            if snapshot.history.is_empty() || st.mirrored == snapshot.history {
                return;
            }
            st.mirrored = snapshot.history.clone();
        }
        if let Some(store) = &self.store {
            if let Err(e) = crash::save_history(store.as_ref(), &snapshot.history) {
                tracing::warn!(error = %e, "failed to mirror crash history");
            }
        }
    }

    pub fn with_metrics(mut self, metrics: WagerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn balance(&self) -> &Arc<BalanceFacade> {
        &self.balance
    }

    pub fn active(&self) -> Option<ActiveWager> {
        lock(&self.state).active.clone()
    }

    pub fn status(&self) -> WagerStatus {
        let st = lock(&self.state);
        match (&st.active, st.in_flight) {
            (None, true) => WagerStatus::PendingConfirmation,
            (None, false) => WagerStatus::Idle,
            (Some(active), _) => active.status,
        }
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }

    fn validate_start(&self, bet: u64, config: &RoundConfig) -> Result<(), ValidationError> {
        match *config {
            RoundConfig::Mines { mine_count } => {
                MinesSetup { bet, mine_count }.validate(&self.config.limits, &self.config.mines)
            }
            RoundConfig::Crash { auto_cashout } => {
                self.config.limits.check(bet)?;
                match auto_cashout {
                    Some(target) if target <= Multiplier::ONE => {
                        Err(ValidationError::AutoCashoutTooLow(target.to_string()))
                    }
                    _ => Ok(()),
                }
            }
            RoundConfig::Blackjack => self.config.limits.check(bet),
        }
    }

    /// Claim the single request slot
    fn begin(&self, need_open_session: bool) -> Result<(InFlight, Option<ActiveWager>), SessionStateError> {
        let mut st = lock(&self.state);
        if st.in_flight {
            return Err(SessionStateError::Busy);
        }
        let open = st.active.as_ref().filter(|a| a.is_open()).cloned();
        match (need_open_session, &open, &st.active) {
            (false, Some(_), _) => return Err(SessionStateError::SessionConflict),
            (true, None, Some(_)) => return Err(SessionStateError::AlreadyResolved),
            (true, None, None) => return Err(SessionStateError::NoActiveSession),
            _ => {}
        }
        st.in_flight = true;
        let guard = InFlight {
            state: self.state.clone(),
            epoch: st.epoch,
        };
        Ok((guard, open))
    }

    fn note_remote_failure(&self, err: &crate::errors::RemoteError, op: &str) {
        tracing::warn!(op, error = %err, "game service call failed");
        if let Some(metrics) = &self.metrics {
            metrics.remote_failure();
        }
    }

    /// Place a bet and open a session with the game service
    pub async fn start(&self, config: RoundConfig, bet: u64) -> DuelResult<ActiveWager> {
        self.validate_start(bet, &config)?;
        let (flight, _) = self.begin(false)?;
        self.balance.ensure_affordable(bet).await?;

        let started = match self.backend.start_round(self.balance.user_id(), bet, config).await {
            Ok(started) => started,
            Err(e) => {
                self.note_remote_failure(&e, "start_round");
                return Err(e.into());
            }
        };

        let kind = config.kind();
        let confirmed = {
            let mut st = lock(&self.state);
            if st.epoch == flight.epoch {
                let wager = ActiveWager {
                    session_id: started.session_id.clone(),
                    kind,
                    bet,
                    status: WagerStatus::Active,
                    state: started.state.clone(),
                    payout: None,
                };
                st.active = Some(wager.clone());
                Some(wager)
            } else {
                None
            }
        };
        let Some(wager) = confirmed else {
            tracing::info!(session = %started.session_id, "start confirmed after reset; forfeiting");
            self.balance.invalidate();
            if let Err(e) = self.backend.act(&started.session_id, GameAction::Forfeit).await {
                self.note_remote_failure(&e, "forfeit");
            }
            return Err(SessionStateError::NoActiveSession.into());
        };

        self.balance.apply_confirmed(started.new_balance);
        self.mirror_history(&started.state);
        if let Some(metrics) = &self.metrics {
            metrics.round_started(kind, bet);
        }
        tracing::info!(session = %wager.session_id, game = %kind, bet, "wager started");

        // A natural blackjack is settled on the deal.
        if let RoundView::Blackjack(hand) = &started.state {
            if let Some(payout) = hand.payout {
                return self.mark_resolved(flight.epoch, started.state.clone(), payout, started.new_balance);
            }
        }
        Ok(wager)
    }

    /// Send a game action for the active session
    pub async fn act(&self, action: GameAction) -> DuelResult<ActiveWager> {
        if let GameAction::Reveal { cell } = action {
            if cell >= crate::games::mines::BOARD_CELLS {
                return Err(ValidationError::CellOutOfRange(cell).into());
            }
            // Revealing a cell we already know is safe changes nothing.
            if let Some(active) = self.active() {
                if active.is_open() && active.knows_revealed(cell) {
                    return Ok(active);
                }
            }
        }

        let (flight, active) = self.begin(true)?;
        let Some(active) = active else {
            return Err(SessionStateError::NoActiveSession.into());
        };

        let outcome = match self.backend.act(&active.session_id, action).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.note_remote_failure(&e, "act");
                return Err(e.into());
            }
        };

        if outcome.resolved {
            let payout = outcome.payout.unwrap_or(0);
            return self.apply_resolved(&flight, outcome.state, payout, outcome.new_balance);
        }
        self.apply_state(&flight, outcome.state)
    }

    pub async fn poll(&self) -> DuelResult<ActiveWager> {
        self.act(GameAction::Poll).await
    }

    /// Take the current multiplier
    pub async fn cashout(&self) -> DuelResult<ActiveWager> {
        let (flight, active) = self.begin(true)?;
        let Some(active) = active else {
            return Err(SessionStateError::NoActiveSession.into());
        };
        if active.kind == GameKind::Blackjack {
            return Err(ValidationError::ConfigMismatch("blackjack has no cashout".to_string()).into());
        }

        let receipt = match self.backend.cashout(&active.session_id).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.note_remote_failure(&e, "cashout");
                return Err(e.into());
            }
        };
        tracing::info!(
            session = %active.session_id,
            multiplier = %receipt.multiplier,
            payout = receipt.payout,
            "cashed out"
        );

        // Refresh the board or curve; the receipt alone is authoritative.
        let state = match self.backend.act(&active.session_id, GameAction::Poll).await {
            Ok(outcome) => outcome.state,
            Err(e) => {
                self.note_remote_failure(&e, "poll");
                active.state.clone()
            }
        };
        self.apply_resolved(&flight, state, receipt.payout, receipt.new_balance)
    }

    fn apply_state(&self, flight: &InFlight, state: RoundView) -> DuelResult<ActiveWager> {
        self.mirror_history(&state);
        let mut st = lock(&self.state);
        if st.epoch != flight.epoch {
            tracing::debug!("discarding response from a reset session");
            return Err(SessionStateError::NoActiveSession.into());
        }
        let active = st.active.as_mut().ok_or(SessionStateError::NoActiveSession)?;
        active.state = state;
        Ok(active.clone())
    }

    fn apply_resolved(&self, flight: &InFlight, state: RoundView, payout: u64, new_balance: u64) -> DuelResult<ActiveWager> {
        self.mark_resolved(flight.epoch, state, payout, new_balance)
    }

    /// Settle the session of `epoch`. The epoch check and the update happen
    /// under one lock, so a concurrent reset either wins outright or finds the
    /// session already resolved.
    fn mark_resolved(&self, epoch: u64, state: RoundView, payout: u64, new_balance: u64) -> DuelResult<ActiveWager> {
        self.mirror_history(&state);
        let resolved = {
            let mut st = lock(&self.state);
            let current = if st.epoch == epoch { st.active.as_mut() } else { None };
            current.map(|active| {
                active.state = state;
                active.status = WagerStatus::Resolved;
                active.payout = Some(payout);
                active.clone()
            })
        };
        let Some(resolved) = resolved else {
            tracing::debug!("discarding settlement from a reset session");
            self.balance.invalidate();
            return Err(SessionStateError::NoActiveSession.into());
        };

        self.balance.apply_confirmed(new_balance);
        if let Some(metrics) = &self.metrics {
            metrics.round_resolved(resolved.kind, payout);
        }
        tracing::info!(session = %resolved.session_id, payout, balance = new_balance, "wager resolved");

        if resolved.kind == GameKind::Mines {
            self.schedule_clear(epoch, resolved.session_id.clone());
        }
        Ok(resolved)
    }

    /// Clear a finished mines board after the reset delay
    fn schedule_clear(&self, epoch: u64, session_id: SessionId) {
        let state = Arc::downgrade(&self.state);
        self.scheduler.after(self.config.mines_reset_delay(), async move {
            let Some(state) = state.upgrade() else { return };
            let mut st = lock(&state);
            let same = st.epoch == epoch && st.active.as_ref().map_or(false, |a| a.session_id == session_id);
            if same && !st.in_flight {
                st.active = None;
            }
        });
    }

    /// Poll a crash session on the configured cadence until it resolves
    pub fn watch_crash(self: &Arc<Self>) -> Option<TimerId> {
        let active = self.active()?;
        if active.kind != GameKind::Crash || !active.is_open() {
            return None;
        }
        let table: Weak<Self> = Arc::downgrade(self);
        let id = self.scheduler.every(self.config.crash_poll_interval(), move || {
            let table = table.clone();
            async move {
                let Some(table) = table.upgrade() else { return false };
                match table.poll().await {
                    Ok(wager) => wager.is_open(),
                    Err(DuelError::SessionState(SessionStateError::Busy)) => true,
                    Err(e) if e.is_transient() => true,
                    Err(_) => false,
                }
            }
        });
        Some(id)
    }

    /// Abandon whatever is on the table. Never fails: timers are cancelled,
    /// late responses are discarded and an open session is forfeited best-effort.
    pub async fn reset(&self) {
        let abandoned = {
            let mut st = lock(&self.state);
            st.epoch += 1;
            st.in_flight = false;
            st.active.take()
        };
        self.scheduler.cancel_all();

        if let Some(active) = abandoned.filter(|a| a.is_open()) {
            tracing::info!(session = %active.session_id, "forfeiting open session on reset");
            if let Err(e) = self.backend.act(&active.session_id, GameAction::Forfeit).await {
                self.note_remote_failure(&e, "forfeit");
            }
        }
        self.balance.invalidate();
    }

    /// Crash phase of the active session, if it is a crash wager
    pub fn crash_phase(&self) -> Option<CrashPhase> {
        match self.active()?.state {
            RoundView::Crash(snapshot) => Some(snapshot.phase),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn table() -> (Arc<LocalBackend>, WagerTable) {
        let clock = ManualClock::new(0);
        let backend = Arc::new(LocalBackend::new(DuelConfig::default(), Arc::new(clock.clone())));
        backend.create_user("alice", 1_000);
        let balance = Arc::new(BalanceFacade::new(backend.clone(), Arc::new(clock), "alice", Duration::from_secs(5)));
        let table = WagerTable::new(backend.clone(), balance, DuelConfig::default());
        (backend, table)
    }

    #[tokio::test]
    async fn test_out_of_range_bet_rejected_locally() {
        let (backend, table) = table();
        let err = table.start(RoundConfig::Blackjack, 5).await.unwrap_err();
        assert!(matches!(err, DuelError::Validation(ValidationError::BetOutOfRange { .. })));
        let err = table.start(RoundConfig::Mines { mine_count: 25 }, 100).await.unwrap_err();
        assert!(matches!(err, DuelError::Validation(ValidationError::MineCountOutOfRange { .. })));
        assert_eq!(backend.get_balance("alice").await.unwrap(), 1_000);
        assert_eq!(table.status(), WagerStatus::Idle);
    }

    #[tokio::test]
    async fn test_insufficient_funds_checked_against_cache() {
        let (_, table) = table();
        let err = table.start(RoundConfig::Blackjack, 5_000).await.unwrap_err();
        assert!(matches!(err, DuelError::InsufficientFunds { balance: 1_000, required: 5_000 }));
        assert_eq!(table.status(), WagerStatus::Idle);
    }

    #[tokio::test]
    async fn test_second_start_conflicts() {
        let (_, table) = table();
        let wager = table.start(RoundConfig::Mines { mine_count: 3 }, 100).await.unwrap();
        assert_eq!(wager.status, WagerStatus::Active);
        assert_eq!(table.balance().cached(), Some(900));

        let err = table.start(RoundConfig::Blackjack, 100).await.unwrap_err();
        assert!(matches!(err, DuelError::SessionState(SessionStateError::SessionConflict)));
    }

    #[tokio::test]
    async fn test_act_without_session() {
        let (_, table) = table();
        assert!(matches!(
            table.act(GameAction::Hit).await,
            Err(DuelError::SessionState(SessionStateError::NoActiveSession))
        ));
        assert!(matches!(
            table.cashout().await,
            Err(DuelError::SessionState(SessionStateError::NoActiveSession))
        ));
    }

    #[tokio::test]
    async fn test_reset_forfeits_and_never_fails() {
        let (backend, table) = table();
        table.start(RoundConfig::Mines { mine_count: 3 }, 100).await.unwrap();
        table.reset().await;
        assert!(table.active().is_none());
        assert!(backend.active_session("alice").is_none());
        assert_eq!(table.pending_timers(), 0);

        // Resetting an empty table is fine too.
        table.reset().await;
        assert_eq!(table.status(), WagerStatus::Idle);
    }

    #[tokio::test]
    async fn test_settlement_after_reset_is_discarded() {
        let (_, table) = table();
        let wager = table.start(RoundConfig::Mines { mine_count: 3 }, 100).await.unwrap();
        let stale_epoch = lock(&table.state).epoch;
        table.reset().await;

        let late = table.mark_resolved(stale_epoch, wager.state.clone(), 500, 4_321);
        assert!(matches!(late, Err(DuelError::SessionState(SessionStateError::NoActiveSession))));
        assert!(table.active().is_none());
        assert_eq!(table.balance().cached(), None);
    }

    #[tokio::test]
    async fn test_settlement_without_session_is_discarded() {
        let (_, table) = table();
        let wager = table.start(RoundConfig::Mines { mine_count: 3 }, 100).await.unwrap();
        let epoch = {
            let mut st = lock(&table.state);
            st.active = None;
            st.epoch
        };

        let result = table.mark_resolved(epoch, wager.state, 500, 4_321);
        assert!(matches!(result, Err(DuelError::SessionState(SessionStateError::NoActiveSession))));
        assert_ne!(table.balance().cached(), Some(4_321));
        assert_eq!(table.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_crash_history_mirrored_to_store() {
        let (backend, table) = table();
        let store = Arc::new(crate::kv::MemoryStore::new());
        crash::save_history(store.as_ref(), &[Multiplier(20_000)]).unwrap();
        backend.restore_crash_history(&[Multiplier(20_000)]);
        let table = table.with_store(store.clone());
        assert_eq!(table.crash_history(), vec![Multiplier(20_000)]);

        table.start(RoundConfig::Crash { auto_cashout: None }, 100).await.unwrap();
        table.reset().await;
        // A round forfeited during the countdown never flew.
        assert_eq!(crash::load_history(store.as_ref()).unwrap(), vec![Multiplier(20_000)]);
    }
}
