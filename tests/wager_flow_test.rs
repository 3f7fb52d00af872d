//! End-to-end wager flows: client table over the in-process game service

use async_trait::async_trait;
use duelpvp::backend::{LocalBackend, OutcomeSource};
use duelpvp::errors::{DuelError, RemoteError, SessionStateError};
use duelpvp::games::cards::{Card, Deck, Rank, Suit};
use duelpvp::games::fairness::RoundSeed;
use duelpvp::games::reaction::PriceChart;
use duelpvp::games::{Attempt, CrashPhase, ReactionRound};
use duelpvp::kv::MemoryStore;
use duelpvp::remote::{
    ActOutcome, CashoutReceipt, GameAction, GameBackend, RemoteResult, RewardSource, RoundConfig, RoundStarted,
    RoundView,
};
use duelpvp::{BalanceFacade, DuelConfig, ManualClock, Multiplier, RewardDesk, WagerMetrics, WagerStatus, WagerTable};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

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

/// Wraps the local service to inject failures, hold calls open and count actions
struct Harness {
    inner: Arc<LocalBackend>,
    fail_next: AtomicBool,
    hold_start: Option<(Arc<Notify>, Arc<Notify>)>,
    acts: AtomicUsize,
}

impl Harness {
    fn failing(&self) -> RemoteResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl GameBackend for Harness {
    async fn start_round(&self, user: &str, bet: u64, config: RoundConfig) -> RemoteResult<RoundStarted> {
        self.failing()?;
        if let Some((entered, release)) = &self.hold_start {
            entered.notify_one();
            release.notified().await;
        }
        self.inner.start_round(user, bet, config).await
    }

    async fn act(&self, session: &str, action: GameAction) -> RemoteResult<ActOutcome> {
        self.failing()?;
        self.acts.fetch_add(1, Ordering::SeqCst);
        self.inner.act(session, action).await
    }

    async fn cashout(&self, session: &str) -> RemoteResult<CashoutReceipt> {
        self.failing()?;
        self.inner.cashout(session).await
    }

    async fn get_balance(&self, user: &str) -> RemoteResult<u64> {
        self.inner.get_balance(user).await
    }

    async fn grant_reward(&self, user: &str, amount: u64, source: RewardSource) -> RemoteResult<u64> {
        self.failing()?;
        self.inner.grant_reward(user, amount, source).await
    }
}

struct Rig {
    local: Arc<LocalBackend>,
    harness: Arc<Harness>,
    clock: ManualClock,
    table: Arc<WagerTable>,
    metrics: WagerMetrics,
}

fn late_seed() -> RoundSeed {
    (0u8..=255)
        .map(|b| RoundSeed::from_bytes([b; 32]))
        .find(|s| s.crash_point(11_000, 1_000_000).bps() >= 30_000)
        .expect("some seed crashes after 3.00x")
}

fn rig_with(mines: Vec<usize>, deck: Vec<Card>, hold: Option<(Arc<Notify>, Arc<Notify>)>) -> Rig {
    let clock = ManualClock::new(1_700_000_000_000);
    let outcomes = FixedOutcomes {
        seed: late_seed(),
        mines,
        deck,
    };
    let local = Arc::new(LocalBackend::with_outcomes(
        DuelConfig::default(),
        Arc::new(clock.clone()),
        Arc::new(outcomes),
    ));
    local.create_user("alice", 1_000);
    let harness = Arc::new(Harness {
        inner: local.clone(),
        fail_next: AtomicBool::new(false),
        hold_start: hold,
        acts: AtomicUsize::new(0),
    });
    let balance = Arc::new(BalanceFacade::new(
        harness.clone(),
        Arc::new(clock.clone()),
        "alice",
        Duration::from_secs(5),
    ));
    let metrics = WagerMetrics::new().unwrap();
    let table = Arc::new(WagerTable::new(harness.clone(), balance, DuelConfig::default()).with_metrics(metrics.clone()));
    Rig {
        local,
        harness,
        clock,
        table,
        metrics,
    }
}

fn rig() -> Rig {
    rig_with(vec![0, 1, 2, 3, 4], Vec::new(), None)
}

#[tokio::test]
async fn mines_ten_reveals_pays_three_forty() {
    let rig = rig();
    rig.table.start(RoundConfig::Mines { mine_count: 5 }, 100).await.unwrap();
    for cell in 5..15 {
        rig.table.act(GameAction::Reveal { cell }).await.unwrap();
    }
    let done = rig.table.cashout().await.unwrap();

    assert_eq!(done.status, WagerStatus::Resolved);
    assert_eq!(done.payout, Some(340));
    match &done.state {
        RoundView::Mines(board) => assert_eq!(board.multiplier, Multiplier::from_bps(34_000)),
        other => panic!("unexpected view {:?}", other),
    }
    assert_eq!(rig.local.get_balance("alice").await.unwrap(), 1_240);
    assert_eq!(rig.table.balance().cached(), Some(1_240));
}

#[tokio::test]
async fn mines_hit_pays_nothing() {
    let rig = rig();
    rig.table.start(RoundConfig::Mines { mine_count: 5 }, 100).await.unwrap();
    rig.table.act(GameAction::Reveal { cell: 7 }).await.unwrap();
    let done = rig.table.act(GameAction::Reveal { cell: 2 }).await.unwrap();
    assert_eq!(done.status, WagerStatus::Resolved);
    assert_eq!(done.payout, Some(0));
    assert_eq!(rig.local.get_balance("alice").await.unwrap(), 900);

    assert!(matches!(
        rig.table.act(GameAction::Reveal { cell: 9 }).await,
        Err(DuelError::SessionState(SessionStateError::AlreadyResolved))
    ));
}

#[tokio::test]
async fn double_reveal_is_a_local_no_op() {
    let rig = rig();
    rig.table.start(RoundConfig::Mines { mine_count: 5 }, 100).await.unwrap();
    let first = rig.table.act(GameAction::Reveal { cell: 12 }).await.unwrap();
    let calls = rig.harness.acts.load(Ordering::SeqCst);

    let again = rig.table.act(GameAction::Reveal { cell: 12 }).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(rig.harness.acts.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn blackjack_natural_against_dealer_twenty_one_pushes() {
    // Deal order: player, dealer, player, dealer
    let deck = vec![
        Card::new(Rank::Ace, Suit::Spades),
        Card::new(Rank::Ace, Suit::Hearts),
        Card::new(Rank::King, Suit::Spades),
        Card::new(Rank::King, Suit::Hearts),
    ];
    let rig = rig_with(Vec::new(), deck, None);
    let wager = rig.table.start(RoundConfig::Blackjack, 100).await.unwrap();

    assert_eq!(wager.status, WagerStatus::Resolved);
    assert_eq!(wager.payout, Some(100));
    assert_eq!(rig.local.get_balance("alice").await.unwrap(), 1_000);
    assert_eq!(rig.table.balance().cached(), Some(1_000));
}

#[tokio::test]
async fn crash_manual_cashout_pays_floor_of_multiplier() {
    let rig = rig();
    let wager = rig.table.start(RoundConfig::Crash { auto_cashout: None }, 100).await.unwrap();
    assert!(matches!(&wager.state, RoundView::Crash(c) if c.phase == CrashPhase::Waiting));

    // Three second countdown, then two seconds of flight at 0.30x/s
    rig.clock.advance(Duration::from_millis(5_000));
    let done = rig.table.cashout().await.unwrap();
    assert_eq!(done.payout, Some(160));
    assert_eq!(rig.local.get_balance("alice").await.unwrap(), 1_060);

    assert!(matches!(
        rig.table.cashout().await,
        Err(DuelError::SessionState(SessionStateError::AlreadyResolved))
    ));
}

#[tokio::test(start_paused = true)]
async fn crash_watch_settles_auto_cashout() {
    let rig = rig();
    let target = Multiplier::from_bps(15_000);
    rig.table
        .start(RoundConfig::Crash { auto_cashout: Some(target) }, 100)
        .await
        .unwrap();
    rig.clock.advance(Duration::from_secs(60));

    assert!(rig.table.watch_crash().is_some());
    tokio::time::sleep(Duration::from_millis(350)).await;

    let done = rig.table.active().unwrap();
    assert_eq!(done.status, WagerStatus::Resolved);
    assert_eq!(done.payout, Some(150));
    assert_eq!(rig.table.pending_timers(), 0);
    assert_eq!(rig.metrics.resolved(duelpvp::GameKind::Crash), 1);
}

#[tokio::test]
async fn crash_cashout_after_auto_target_passed_pays_target() {
    let rig = rig();
    let target = Multiplier::from_bps(15_000);
    rig.table
        .start(RoundConfig::Crash { auto_cashout: Some(target) }, 100)
        .await
        .unwrap();

    // Well past the target; the service already cashed the bet out.
    rig.clock.advance(Duration::from_secs(60));
    let done = rig.table.cashout().await.unwrap();
    assert_eq!(done.status, WagerStatus::Resolved);
    assert_eq!(done.payout, Some(150));
    assert_eq!(rig.local.get_balance("alice").await.unwrap(), 1_050);
    assert_eq!(rig.table.balance().cached(), Some(1_050));
    assert!(rig.local.active_session("alice").is_none());
}

#[tokio::test]
async fn remote_failure_leaves_state_untouched() {
    let rig = rig();
    rig.table.balance().balance().await.unwrap();
    rig.harness.fail_next.store(true, Ordering::SeqCst);

    let err = rig.table.start(RoundConfig::Mines { mine_count: 5 }, 100).await.unwrap_err();
    assert!(matches!(err, DuelError::Remote(RemoteError::Transport(_))));
    assert!(err.is_transient());
    assert_eq!(rig.table.status(), WagerStatus::Idle);
    assert_eq!(rig.table.balance().cached(), Some(1_000));
    assert_eq!(rig.local.get_balance("alice").await.unwrap(), 1_000);
    assert_eq!(rig.metrics.failures(), 1);

    // A failed action keeps the session as it was.
    let started = rig.table.start(RoundConfig::Mines { mine_count: 5 }, 100).await.unwrap();
    rig.harness.fail_next.store(true, Ordering::SeqCst);
    assert!(rig.table.act(GameAction::Reveal { cell: 20 }).await.is_err());
    assert_eq!(rig.table.active(), Some(started));
    assert_eq!(rig.metrics.failures(), 2);

    // The same reveal goes through once the service is reachable again.
    let revealed = rig.table.act(GameAction::Reveal { cell: 20 }).await.unwrap();
    assert_eq!(revealed.status, WagerStatus::Active);
    assert_eq!(rig.local.get_balance("alice").await.unwrap(), 900);
}

#[tokio::test]
async fn busy_guard_and_stale_response_after_reset() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let rig = rig_with(vec![0, 1, 2], Vec::new(), Some((entered.clone(), release.clone())));

    let table = rig.table.clone();
    let pending = tokio::spawn(async move { table.start(RoundConfig::Mines { mine_count: 3 }, 100).await });
    entered.notified().await;

    assert_eq!(rig.table.status(), WagerStatus::PendingConfirmation);
    assert!(matches!(
        rig.table.start(RoundConfig::Blackjack, 100).await,
        Err(DuelError::SessionState(SessionStateError::Busy))
    ));
    assert!(matches!(
        rig.table.act(GameAction::Reveal { cell: 4 }).await,
        Err(DuelError::SessionState(SessionStateError::Busy))
    ));

    rig.table.reset().await;
    release.notify_one();
    let late = pending.await.unwrap();

    assert!(matches!(late, Err(DuelError::SessionState(SessionStateError::NoActiveSession))));
    assert!(rig.table.active().is_none());
    // The orphaned session was forfeited, so the player can start again.
    assert!(rig.local.active_session("alice").is_none());
}

#[tokio::test]
async fn reaction_round_at_one_fifty_earns_reward() {
    let clock = ManualClock::new(1_709_294_400_000);
    let backend = Arc::new(LocalBackend::new(DuelConfig::default(), Arc::new(clock.clone())));
    backend.create_user("alice", 1_000);
    let balance = Arc::new(BalanceFacade::new(
        backend.clone(),
        Arc::new(clock.clone()),
        "alice",
        Duration::from_secs(5),
    ));
    let desk = RewardDesk::new(
        backend.clone(),
        backend.clone(),
        balance.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(clock),
        DuelConfig::default(),
    );

    let chart = PriceChart {
        start_price: 40_000.0,
        peak_price: 50_000.0,
        crash_price: 37_000.0,
        rise_shape: 1.0,
        crash_shape: 2.0,
    };
    let mut round = ReactionRound::with_timing(5_000, 2_000, chart);
    assert!(round.advance(Duration::from_millis(2_150)).is_none());
    let attempt = round.sell().unwrap();
    assert_eq!(attempt, Attempt::Timed { score_ms: 150, auto: false });

    let receipt = desk.record_reaction(attempt).await.unwrap();
    assert_eq!(receipt.reward, Some(300));
    assert_eq!(balance.cached(), Some(1_300));
}
