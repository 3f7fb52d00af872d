//! Batch wager simulation
//!
//! Plays many rounds against an in-process `LocalBackend` with seeded
//! outcomes and a manual clock, then reports return-to-player figures.

use crate::backend::{LocalBackend, RandomOutcomes};
use crate::clock::ManualClock;
use crate::config::DuelConfig;
use crate::errors::DuelResult;
use crate::games::mines::BOARD_CELLS;
use crate::games::{GameKind, Multiplier};
use crate::remote::{GameAction, GameBackend, RoundConfig, RoundView};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SIM_USER: &str = "simulator";

/// How the simulated player plays each game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Crash with an automatic cashout target
    CrashAuto { target: Multiplier },
    /// Mines: reveal this many cells, then cash out
    MinesReveal { mine_count: u8, reveals: usize },
    /// Blackjack: hit below this total, then stand
    BlackjackHitBelow { stand_on: u8 },
}

impl Strategy {
    pub fn kind(&self) -> GameKind {
        match self {
            Strategy::CrashAuto { .. } => GameKind::Crash,
            Strategy::MinesReveal { .. } => GameKind::Mines,
            Strategy::BlackjackHitBelow { .. } => GameKind::Blackjack,
        }
    }

    pub fn default_for(kind: GameKind) -> Self {
        match kind {
            GameKind::Crash => Strategy::CrashAuto {
                target: Multiplier::from_bps(20_000),
            },
            GameKind::Mines => Strategy::MinesReveal {
                mine_count: 3,
                reveals: 3,
            },
            GameKind::Blackjack => Strategy::BlackjackHitBelow { stand_on: 17 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub game: GameKind,
    pub strategy: Strategy,
    pub rounds: usize,
    pub wins: usize,
    pub wagered: u64,
    pub paid_out: u64,
    pub execution_time: Duration,
}

impl SimulationReport {
    /// Paid out over wagered
    pub fn rtp(&self) -> f64 {
        if self.wagered == 0 {
            return 0.0;
        }
        self.paid_out as f64 / self.wagered as f64
    }

    /// Rounds that paid back more than the bet
    pub fn win_rate(&self) -> f64 {
        if self.rounds == 0 {
            return 0.0;
        }
        self.wins as f64 / self.rounds as f64
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{} simulation ({:?})\n", self.game, self.strategy));
        out.push_str(&format!("{}\n", "=".repeat(50)));
        out.push_str(&format!("Rounds:        {}\n", self.rounds));
        out.push_str(&format!("Win rate:      {:.1}%\n", self.win_rate() * 100.0));
        out.push_str(&format!("Wagered:       {} GC\n", self.wagered));
        out.push_str(&format!("Paid out:      {} GC\n", self.paid_out));
        out.push_str(&format!("RTP:           {:.2}%\n", self.rtp() * 100.0));
        out.push_str(&format!("Elapsed:       {:?}\n", self.execution_time));
        out
    }
}

pub struct Simulator {
    backend: Arc<LocalBackend>,
    clock: ManualClock,
    rng: StdRng,
}

impl Simulator {
    pub fn new(config: DuelConfig, seed: u64) -> Self {
        let clock = ManualClock::new(0);
        let backend = Arc::new(LocalBackend::with_outcomes(
            config,
            Arc::new(clock.clone()),
            Arc::new(RandomOutcomes::seeded(seed)),
        ));
        Self {
            backend,
            clock,
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
        }
    }

    pub async fn run(&mut self, strategy: Strategy, rounds: usize, bet: u64) -> DuelResult<SimulationReport> {
        let started = Instant::now();
        // Enough GC that the bankroll never runs out mid-batch.
        let bankroll = bet.saturating_mul(rounds as u64).saturating_add(bet);
        self.backend.create_user(SIM_USER, bankroll);

        let mut report = SimulationReport {
            game: strategy.kind(),
            strategy,
            rounds: 0,
            wins: 0,
            wagered: 0,
            paid_out: 0,
            execution_time: Duration::ZERO,
        };

        for _ in 0..rounds {
            let payout = self.play_round(strategy, bet).await?;
            report.rounds += 1;
            report.wagered += bet;
            report.paid_out += payout;
            if payout > bet {
                report.wins += 1;
            }
        }

        report.execution_time = started.elapsed();
        tracing::info!(
            game = %report.game,
            rounds = report.rounds,
            rtp = format!("{:.4}", report.rtp()),
            "simulation finished"
        );
        Ok(report)
    }

    async fn play_round(&mut self, strategy: Strategy, bet: u64) -> DuelResult<u64> {
        match strategy {
            Strategy::CrashAuto { target } => {
                let started = self
                    .backend
                    .start_round(SIM_USER, bet, RoundConfig::Crash { auto_cashout: Some(target) })
                    .await?;
                // Round sync stops at the crash, so one long jump settles it.
                self.clock.advance(Duration::from_secs(3_600));
                let outcome = self.backend.act(&started.session_id, GameAction::Poll).await?;
                Ok(outcome.payout.unwrap_or(0))
            }
            Strategy::MinesReveal { mine_count, reveals } => {
                let started = self
                    .backend
                    .start_round(SIM_USER, bet, RoundConfig::Mines { mine_count })
                    .await?;
                let mut cells: Vec<usize> = (0..BOARD_CELLS).collect();
                cells.shuffle(&mut self.rng);
                for cell in cells.into_iter().take(reveals.max(1)) {
                    let outcome = self
                        .backend
                        .act(&started.session_id, GameAction::Reveal { cell })
                        .await?;
                    if outcome.resolved {
                        return Ok(outcome.payout.unwrap_or(0));
                    }
                }
                Ok(self.backend.cashout(&started.session_id).await?.payout)
            }
            Strategy::BlackjackHitBelow { stand_on } => {
                let started = self.backend.start_round(SIM_USER, bet, RoundConfig::Blackjack).await?;
                let mut state = started.state;
                loop {
                    let RoundView::Blackjack(hand) = &state else {
                        return Ok(0);
                    };
                    if let Some(payout) = hand.payout {
                        return Ok(payout);
                    }
                    let action = if hand.player_value < stand_on {
                        GameAction::Hit
                    } else {
                        GameAction::Stand
                    };
                    state = self.backend.act(&started.session_id, action).await?.state;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_counts_every_round() {
        let mut sim = Simulator::new(DuelConfig::default(), 42);
        let report = sim.run(Strategy::default_for(GameKind::Mines), 50, 100).await.unwrap();
        assert_eq!(report.rounds, 50);
        assert_eq!(report.wagered, 5_000);
        assert!(report.win_rate() >= 0.0 && report.win_rate() <= 1.0);
        assert!(report.render().contains("RTP"));
    }

    #[tokio::test]
    async fn test_crash_auto_pays_target_or_nothing() {
        let mut sim = Simulator::new(DuelConfig::default(), 7);
        let target = Multiplier::from_bps(15_000);
        let report = sim.run(Strategy::CrashAuto { target }, 40, 100).await.unwrap();
        assert_eq!(report.rounds, 40);
        assert_eq!(report.paid_out, report.wins as u64 * 150);
    }

    #[tokio::test]
    async fn test_blackjack_rounds_all_resolve() {
        let mut sim = Simulator::new(DuelConfig::default(), 3);
        let report = sim.run(Strategy::default_for(GameKind::Blackjack), 30, 100).await.unwrap();
        assert_eq!(report.rounds, 30);
        // Every payout is a push, a win or a natural.
        assert!(report.paid_out <= 30 * 250);
    }
}
