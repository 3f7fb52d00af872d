//! Prometheus counters for wager activity

use crate::games::GameKind;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct WagerMetrics {
    registry: Registry,
    rounds_started: IntCounterVec,
    rounds_resolved: IntCounterVec,
    wagered: IntCounterVec,
    paid_out: IntCounterVec,
    remote_failures: IntCounter,
    rewards_granted: IntCounter,
}

impl WagerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("duelpvp".to_string()), None)?;

        let rounds_started = IntCounterVec::new(
            Opts::new("rounds_started_total", "Wager rounds confirmed by the game service"),
            &["game"],
        )?;
        let rounds_resolved = IntCounterVec::new(
            Opts::new("rounds_resolved_total", "Wager rounds that reached a terminal state"),
            &["game"],
        )?;
        let wagered = IntCounterVec::new(Opts::new("gc_wagered_total", "GC placed as bets"), &["game"])?;
        let paid_out = IntCounterVec::new(Opts::new("gc_paid_out_total", "GC paid back to players"), &["game"])?;
        let remote_failures = IntCounter::new("remote_failures_total", "Calls to the game service that failed")?;
        let rewards_granted = IntCounter::new("gc_rewards_total", "GC credited outside wagers")?;

        registry.register(Box::new(rounds_started.clone()))?;
        registry.register(Box::new(rounds_resolved.clone()))?;
        registry.register(Box::new(wagered.clone()))?;
        registry.register(Box::new(paid_out.clone()))?;
        registry.register(Box::new(remote_failures.clone()))?;
        registry.register(Box::new(rewards_granted.clone()))?;

        Ok(Self {
            registry,
            rounds_started,
            rounds_resolved,
            wagered,
            paid_out,
            remote_failures,
            rewards_granted,
        })
    }

    pub fn round_started(&self, game: GameKind, bet: u64) {
        self.rounds_started.with_label_values(&[game.as_str()]).inc();
        self.wagered.with_label_values(&[game.as_str()]).inc_by(bet);
    }

    pub fn round_resolved(&self, game: GameKind, payout: u64) {
        self.rounds_resolved.with_label_values(&[game.as_str()]).inc();
        self.paid_out.with_label_values(&[game.as_str()]).inc_by(payout);
    }

    pub fn remote_failure(&self) {
        self.remote_failures.inc();
    }

    pub fn reward_granted(&self, amount: u64) {
        self.rewards_granted.inc_by(amount);
    }

    pub fn started(&self, game: GameKind) -> u64 {
        self.rounds_started.with_label_values(&[game.as_str()]).get()
    }

    pub fn resolved(&self, game: GameKind) -> u64 {
        self.rounds_resolved.with_label_values(&[game.as_str()]).get()
    }

    pub fn failures(&self) -> u64 {
        self.remote_failures.get()
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
