//! "Sell the top" reaction timer.
//!
//! A price chart rises to a hidden peak and then dumps. Selling before the
//! peak is a false start; selling after it scores the milliseconds elapsed
//! since the peak (lower is better). A round nobody sells auto-resolves at
//! its end.

use crate::errors::SessionStateError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Weighted duration buckets: (cumulative probability, lower ms, upper ms)
const DURATION_BUCKETS: [(f64, f64, f64); 3] = [
    (0.15, 1_000.0, 2_500.0),
    (0.85, 2_500.0, 6_000.0),
    (1.00, 6_000.0, 9_000.0),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Attempt {
    /// Sold before the peak; recorded but never timed
    TooEarly { at_ms: u64 },
    /// Milliseconds after the peak
    Timed { score_ms: u64, auto: bool },
}

impl Attempt {
    pub fn score(&self) -> Option<u64> {
        match self {
            Attempt::TooEarly { .. } => None,
            Attempt::Timed { score_ms, .. } => Some(*score_ms),
        }
    }
}

/// Shape of the cosmetic price chart for one round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceChart {
    pub start_price: f64,
    pub peak_price: f64,
    pub crash_price: f64,
    pub rise_shape: f64,
    pub crash_shape: f64,
}

impl PriceChart {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let start_price = rng.gen_range(38_000.0..42_000.0);
        Self {
            start_price,
            peak_price: start_price + rng.gen_range(6_000.0..14_000.0),
            crash_price: start_price - rng.gen_range(2_000.0..5_000.0),
            rise_shape: rng.gen_range(0.5..1.3),
            crash_shape: rng.gen_range(1.5..3.0),
        }
    }

    /// Price at `elapsed_ms`: eased rise to the peak, then a steep dump
    pub fn price_at(&self, elapsed_ms: u64, peak_ms: u64, duration_ms: u64) -> f64 {
        let t = elapsed_ms.min(duration_ms) as f64;
        let peak = peak_ms as f64;
        if t < peak {
            let progress = t / peak;
            self.start_price + (self.peak_price - self.start_price) * progress.powf(self.rise_shape)
        } else {
            let span = (duration_ms as f64 - peak).max(1.0);
            let progress = ((t - peak) / span).min(1.0);
            self.peak_price - (self.peak_price - self.crash_price) * progress.powf(self.crash_shape)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReactionRound {
    duration_ms: u64,
    peak_ms: u64,
    chart: PriceChart,
    elapsed_ms: u64,
    result: Option<Attempt>,
}

impl ReactionRound {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let roll: f64 = rng.gen();
        let (_, lo, hi) = DURATION_BUCKETS
            .iter()
            .copied()
            .find(|(cumulative, _, _)| roll < *cumulative)
            .unwrap_or(DURATION_BUCKETS[2]);
        let duration = rng.gen_range(lo..hi);
        let peak = duration * rng.gen_range(0.2..0.9);
        Self::with_timing(duration as u64, peak as u64, PriceChart::random(rng))
    }

    pub fn with_timing(duration_ms: u64, peak_ms: u64, chart: PriceChart) -> Self {
        Self {
            duration_ms,
            peak_ms: peak_ms.min(duration_ms),
            chart,
            elapsed_ms: 0,
            result: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Hidden from the player while the round runs
    pub fn peak_ms(&self) -> u64 {
        self.peak_ms
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn result(&self) -> Option<Attempt> {
        self.result
    }

    pub fn has_peaked(&self) -> bool {
        self.elapsed_ms >= self.peak_ms
    }

    pub fn price(&self) -> f64 {
        self.chart.price_at(self.elapsed_ms, self.peak_ms, self.duration_ms)
    }

    pub fn price_at(&self, elapsed_ms: u64) -> f64 {
        self.chart.price_at(elapsed_ms, self.peak_ms, self.duration_ms)
    }

    /// Tick the round; returns the auto-resolved attempt when the round runs out
    pub fn advance(&mut self, delta: Duration) -> Option<Attempt> {
        if self.result.is_some() {
            return None;
        }
        let delta_ms = delta.as_millis().min(u64::MAX as u128) as u64;
        self.elapsed_ms = self.elapsed_ms.saturating_add(delta_ms).min(self.duration_ms);
        if self.elapsed_ms >= self.duration_ms {
            let attempt = Attempt::Timed {
                score_ms: self.duration_ms - self.peak_ms,
                auto: true,
            };
            self.result = Some(attempt);
            return Some(attempt);
        }
        None
    }

    /// Sell at the current elapsed time
    pub fn sell(&mut self) -> Result<Attempt, SessionStateError> {
        self.sell_at(self.elapsed_ms)
    }

    /// Sell at an explicit trigger time, relative to round start
    pub fn sell_at(&mut self, trigger_ms: u64) -> Result<Attempt, SessionStateError> {
        if self.result.is_some() {
            return Err(SessionStateError::AlreadyResolved);
        }
        let trigger = trigger_ms.min(self.duration_ms);
        let attempt = if trigger < self.peak_ms {
            Attempt::TooEarly { at_ms: trigger }
        } else {
            Attempt::Timed {
                score_ms: trigger - self.peak_ms,
                auto: false,
            }
        };
        self.elapsed_ms = trigger;
        self.result = Some(attempt);
        Ok(attempt)
    }
}

/// What a recorded attempt earned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub attempt: Attempt,
    pub new_best: bool,
    pub reward_eligible: bool,
}

/// Running stats for a player's reaction rounds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSession {
    best_ms: Option<u64>,
    plays: u32,
    false_starts: u32,
    history: Vec<Attempt>,
}

impl ReactionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best_ms(&self) -> Option<u64> {
        self.best_ms
    }

    pub fn plays(&self) -> u32 {
        self.plays
    }

    pub fn false_starts(&self) -> u32 {
        self.false_starts
    }

    pub fn history(&self) -> &[Attempt] {
        &self.history
    }

    /// Record an attempt; only timed attempts can improve the best score
    pub fn record(&mut self, attempt: Attempt, reward_threshold_ms: u64) -> AttemptReport {
        self.plays += 1;
        self.history.push(attempt);
        match attempt {
            Attempt::TooEarly { .. } => {
                self.false_starts += 1;
                AttemptReport {
                    attempt,
                    new_best: false,
                    reward_eligible: false,
                }
            }
            Attempt::Timed { score_ms, .. } => {
                let new_best = self.best_ms.map_or(true, |best| score_ms < best);
                if new_best {
                    self.best_ms = Some(score_ms);
                }
                AttemptReport {
                    attempt,
                    new_best,
                    reward_eligible: score_ms < reward_threshold_ms,
                }
            }
        }
    }
}
