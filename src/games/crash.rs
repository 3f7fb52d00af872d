//! Crash: a multiplier climbs linearly until a pre-committed crash point.
//!
//! The engine cycles `Waiting -> Flying -> Crashed -> Waiting` and only moves
//! when the owner calls [`CrashEngine::advance`]. Every crash point is drawn
//! from a committed [`RoundSeed`], which is revealed once the round crashes.

use crate::config::CrashConfig;
use crate::errors::{DuelError, DuelResult, SessionStateError, ValidationError};
use crate::games::fairness::{RoundReveal, RoundSeed};
use crate::games::types::{Multiplier, WagerLimits, MULTIPLIER_SCALE};
use crate::kv::{get_json, put_json, KvStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// KV key of the client's crash history mirror
pub const CRASH_HISTORY_KEY: &str = "crash_history";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CrashPhase {
    Waiting,
    Flying,
    Crashed,
}

impl fmt::Display for CrashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashPhase::Waiting => write!(f, "waiting"),
            CrashPhase::Flying => write!(f, "flying"),
            CrashPhase::Crashed => write!(f, "crashed"),
        }
    }
}

/// Supplies the secret seed of each new round
pub trait SeedSource: Send + Sync {
    fn next_seed(&mut self) -> RoundSeed;
}

impl<F> SeedSource for F
where
    F: FnMut() -> RoundSeed + Send + Sync,
{
    fn next_seed(&mut self) -> RoundSeed {
        self()
    }
}

/// Fresh seeds from an OS-seeded PRNG
pub struct RandomSeeds(StdRng);

impl RandomSeeds {
    pub fn new() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl Default for RandomSeeds {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedSource for RandomSeeds {
    fn next_seed(&mut self) -> RoundSeed {
        RoundSeed::random(&mut self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrashBet {
    pub amount: u64,
    pub auto_cashout: Option<Multiplier>,
    /// Multiplier the bet was cashed out at, if any
    pub cashed_out_at: Option<Multiplier>,
}

impl CrashBet {
    pub fn payout(&self) -> u64 {
        self.cashed_out_at.map(|m| m.payout(self.amount)).unwrap_or(0)
    }
}

/// Things that happened during an `advance` or explicit call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrashEvent {
    RoundOpened { round_id: u64, commitment: String },
    Launched { round_id: u64 },
    CashedOut { multiplier: Multiplier, payout: u64, auto: bool },
    Crashed { reveal: RoundReveal, lost_bet: Option<u64> },
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashSnapshot {
    pub round_id: u64,
    pub phase: CrashPhase,
    pub multiplier: Multiplier,
    pub commitment: String,
    /// Only disclosed after the crash
    pub crash_point: Option<Multiplier>,
    pub phase_remaining_ms: Option<u64>,
    pub bet: Option<CrashBet>,
    /// Recent crash points, newest first
    #[serde(default)]
    pub history: Vec<Multiplier>,
}

pub struct CrashEngine {
    config: CrashConfig,
    seeds: Box<dyn SeedSource>,
    round_id: u64,
    phase: CrashPhase,
    phase_elapsed_ms: u64,
    seed: RoundSeed,
    crash_point: Multiplier,
    multiplier: Multiplier,
    bet: Option<CrashBet>,
    history: VecDeque<Multiplier>,
}

impl CrashEngine {
    pub fn new(config: CrashConfig, mut seeds: Box<dyn SeedSource>) -> Self {
        let seed = seeds.next_seed();
        let crash_point = seed.crash_point(config.rtp_bps, config.max_multiplier_bps);
        Self {
            config,
            seeds,
            round_id: 1,
            phase: CrashPhase::Waiting,
            phase_elapsed_ms: 0,
            seed,
            crash_point,
            multiplier: Multiplier::ONE,
            bet: None,
            history: VecDeque::new(),
        }
    }

    pub fn with_random_seeds(config: CrashConfig) -> Self {
        Self::new(config, Box::new(RandomSeeds::new()))
    }

    /// Continue numbering from an earlier engine
    pub fn starting_at(mut self, round_id: u64) -> Self {
        self.round_id = round_id.max(1);
        self
    }

    pub fn phase(&self) -> CrashPhase {
        self.phase
    }

    pub fn round_id(&self) -> u64 {
        self.round_id
    }

    pub fn multiplier(&self) -> Multiplier {
        self.multiplier
    }

    pub fn commitment(&self) -> String {
        self.seed.commitment()
    }

    pub fn bet(&self) -> Option<&CrashBet> {
        self.bet.as_ref()
    }

    /// Newest first
    pub fn history(&self) -> Vec<Multiplier> {
        self.history.iter().copied().collect()
    }

    pub fn restore_history(&mut self, points: &[Multiplier]) {
        self.history = points.iter().copied().take(self.config.history_len).collect();
    }

    /// Crash point of the current round whether or not it has crashed yet.
    /// Only the service side reads this, to settle and log finished wagers.
    pub(crate) fn committed_crash_point(&self) -> Multiplier {
        self.crash_point
    }

    /// Crash point of the current round, disclosed once it has crashed
    pub fn revealed_crash_point(&self) -> Option<Multiplier> {
        (self.phase == CrashPhase::Crashed).then_some(self.crash_point)
    }

    pub fn snapshot(&self) -> CrashSnapshot {
        let phase_remaining_ms = match self.phase {
            CrashPhase::Waiting => Some(self.config.countdown_ms.saturating_sub(self.phase_elapsed_ms)),
            CrashPhase::Crashed => Some(self.config.cooldown_ms.saturating_sub(self.phase_elapsed_ms)),
            CrashPhase::Flying => None,
        };
        CrashSnapshot {
            round_id: self.round_id,
            phase: self.phase,
            multiplier: self.multiplier,
            commitment: self.commitment(),
            crash_point: self.revealed_crash_point(),
            phase_remaining_ms,
            bet: self.bet,
            history: self.history(),
        }
    }

    /// Milliseconds until the current round crashes; `None` once it has
    pub fn ms_until_crash(&self) -> Option<u64> {
        match self.phase {
            CrashPhase::Waiting => Some(
                self.config.countdown_ms.saturating_sub(self.phase_elapsed_ms) + self.crash_offset_ms(),
            ),
            CrashPhase::Flying => Some(self.crash_offset_ms().saturating_sub(self.phase_elapsed_ms)),
            CrashPhase::Crashed => None,
        }
    }

    /// Multiplier on the curve after `elapsed_ms` of flight
    pub fn curve_at(&self, elapsed_ms: u64) -> Multiplier {
        multiplier_at(self.config.growth_bps_per_sec, elapsed_ms)
    }

    /// Place this round's single bet; affordability is the caller's job
    pub fn place_bet(
        &mut self,
        amount: u64,
        auto_cashout: Option<Multiplier>,
        limits: &WagerLimits,
    ) -> Result<(), DuelError> {
        if self.phase != CrashPhase::Waiting {
            return Err(SessionStateError::WrongPhase {
                expected: CrashPhase::Waiting.to_string(),
                actual: self.phase.to_string(),
            }
            .into());
        }
        if self.bet.is_some() {
            return Err(SessionStateError::BetAlreadyPlaced.into());
        }
        limits.check(amount)?;
        if let Some(target) = auto_cashout {
            if target <= Multiplier::ONE {
                return Err(ValidationError::AutoCashoutTooLow(target.to_string()).into());
            }
        }
        self.bet = Some(CrashBet {
            amount,
            auto_cashout,
            cashed_out_at: None,
        });
        Ok(())
    }

    /// Cash out at the current multiplier
    pub fn cashout(&mut self) -> Result<CrashEvent, SessionStateError> {
        if self.phase != CrashPhase::Flying {
            return Err(SessionStateError::WrongPhase {
                expected: CrashPhase::Flying.to_string(),
                actual: self.phase.to_string(),
            });
        }
        let multiplier = self.multiplier;
        let bet = self.bet.as_mut().ok_or(SessionStateError::NoBet)?;
        if bet.cashed_out_at.is_some() {
            return Err(SessionStateError::AlreadyResolved);
        }
        bet.cashed_out_at = Some(multiplier);
        Ok(CrashEvent::CashedOut {
            multiplier,
            payout: multiplier.payout(bet.amount),
            auto: false,
        })
    }

    /// Move the clock forward by `delta`, crossing as many phases as it covers
    pub fn advance(&mut self, delta: Duration) -> Vec<CrashEvent> {
        let mut events = Vec::new();
        let mut remaining = delta.as_millis().min(u64::MAX as u128) as u64;

        loop {
            match self.phase {
                CrashPhase::Waiting => {
                    let left = self.config.countdown_ms.saturating_sub(self.phase_elapsed_ms);
                    if remaining < left {
                        self.phase_elapsed_ms += remaining;
                        break;
                    }
                    remaining -= left;
                    self.launch(&mut events);
                }
                CrashPhase::Flying => {
                    let until_crash = self.crash_offset_ms().saturating_sub(self.phase_elapsed_ms);
                    let step = remaining.min(until_crash);
                    self.phase_elapsed_ms += step;
                    remaining -= step;
                    let candidate = self.curve_at(self.phase_elapsed_ms);
                    self.check_auto_cashout(candidate, &mut events);
                    if candidate >= self.crash_point {
                        self.crash(&mut events);
                        continue;
                    }
                    self.multiplier = candidate;
                    break;
                }
                CrashPhase::Crashed => {
                    let left = self.config.cooldown_ms.saturating_sub(self.phase_elapsed_ms);
                    if remaining < left {
                        self.phase_elapsed_ms += remaining;
                        break;
                    }
                    remaining -= left;
                    self.open_round(&mut events);
                    if remaining == 0 {
                        break;
                    }
                }
            }
        }
        events
    }

    /// Milliseconds of flight at which the curve first reaches the crash point
    fn crash_offset_ms(&self) -> u64 {
        let gap = self.crash_point.bps().saturating_sub(MULTIPLIER_SCALE);
        let growth = self.config.growth_bps_per_sec.max(1);
        (gap * 1000).div_ceil(growth)
    }

    fn launch(&mut self, events: &mut Vec<CrashEvent>) {
        self.phase = CrashPhase::Flying;
        self.phase_elapsed_ms = 0;
        self.multiplier = Multiplier::ONE;
        tracing::debug!(round = self.round_id, "crash round launched");
        events.push(CrashEvent::Launched { round_id: self.round_id });
    }

    fn check_auto_cashout(&mut self, candidate: Multiplier, events: &mut Vec<CrashEvent>) {
        let crash_point = self.crash_point;
        if let Some(bet) = self.bet.as_mut() {
            if let (Some(target), None) = (bet.auto_cashout, bet.cashed_out_at) {
                if target < crash_point && candidate >= target {
                    bet.cashed_out_at = Some(target);
                    events.push(CrashEvent::CashedOut {
                        multiplier: target,
                        payout: target.payout(bet.amount),
                        auto: true,
                    });
                }
            }
        }
    }

    fn crash(&mut self, events: &mut Vec<CrashEvent>) {
        self.phase = CrashPhase::Crashed;
        self.phase_elapsed_ms = 0;
        self.multiplier = self.crash_point;
        self.history.push_front(self.crash_point);
        self.history.truncate(self.config.history_len);

        let lost_bet = self
            .bet
            .as_ref()
            .filter(|b| b.cashed_out_at.is_none())
            .map(|b| b.amount);
        tracing::debug!(round = self.round_id, crash_point = %self.crash_point, "crash round crashed");
        events.push(CrashEvent::Crashed {
            reveal: RoundReveal {
                commitment: self.seed.commitment(),
                seed: self.seed.to_hex(),
                crash_point: self.crash_point,
            },
            lost_bet,
        });
    }

    fn open_round(&mut self, events: &mut Vec<CrashEvent>) {
        self.round_id += 1;
        self.seed = self.seeds.next_seed();
        self.crash_point = self
            .seed
            .crash_point(self.config.rtp_bps, self.config.max_multiplier_bps);
        self.phase = CrashPhase::Waiting;
        self.phase_elapsed_ms = 0;
        self.multiplier = Multiplier::ONE;
        self.bet = None;
        events.push(CrashEvent::RoundOpened {
            round_id: self.round_id,
            commitment: self.seed.commitment(),
        });
    }
}

/// Read the mirrored crash history, newest first
pub fn load_history(store: &dyn KvStore) -> DuelResult<Vec<Multiplier>> {
    Ok(get_json(store, CRASH_HISTORY_KEY)?.unwrap_or_default())
}

pub fn save_history(store: &dyn KvStore, points: &[Multiplier]) -> DuelResult<()> {
    put_json(store, CRASH_HISTORY_KEY, &points)
}

/// `1 + growth × elapsed_s` in basis points
pub fn multiplier_at(growth_bps_per_sec: u64, elapsed_ms: u64) -> Multiplier {
    Multiplier(MULTIPLIER_SCALE + growth_bps_per_sec.saturating_mul(elapsed_ms) / 1000)
}
