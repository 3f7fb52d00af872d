use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Basis points per 1.00x
pub const MULTIPLIER_SCALE: u64 = 10_000;

/// Supported wager games
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Crash,
    Mines,
    Blackjack,
}

impl GameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Crash => "crash",
            GameKind::Mines => "mines",
            GameKind::Blackjack => "blackjack",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed-point payout multiplier in basis points (10_000 = 1.00x)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Multiplier(pub u64);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(MULTIPLIER_SCALE);

    pub fn from_bps(bps: u64) -> Self {
        Multiplier(bps)
    }

    /// Nearest basis point of a float multiplier; used for user input only
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Multiplier(0);
        }
        Multiplier((value * MULTIPLIER_SCALE as f64).round() as u64)
    }

    pub fn bps(&self) -> u64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / MULTIPLIER_SCALE as f64
    }

    /// floor(bet × multiplier), exact in integer arithmetic
    pub fn payout(&self, bet: u64) -> u64 {
        ((bet as u128 * self.0 as u128) / MULTIPLIER_SCALE as u128) as u64
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncate to hundredths like the multiplier readout.
        let hundredths = self.0 / 100;
        write!(f, "{}.{:02}x", hundredths / 100, hundredths % 100)
    }
}

/// Inclusive bet bounds shared by every wager game
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WagerLimits {
    pub min_bet: u64,
    pub max_bet: u64,
}

impl Default for WagerLimits {
    fn default() -> Self {
        Self {
            min_bet: 10,
            max_bet: 10_000,
        }
    }
}

impl WagerLimits {
    pub fn check(&self, amount: u64) -> Result<(), ValidationError> {
        if amount < self.min_bet || amount > self.max_bet {
            return Err(ValidationError::BetOutOfRange {
                amount,
                min: self.min_bet,
                max: self.max_bet,
            });
        }
        Ok(())
    }
}

/// Lifecycle of a wager as seen by the player
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Idle,
    /// Submitted; waiting for the remote service to confirm
    PendingConfirmation,
    Active,
    Resolved,
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerStatus::Idle => write!(f, "idle"),
            WagerStatus::PendingConfirmation => write!(f, "pending"),
            WagerStatus::Active => write!(f, "active"),
            WagerStatus::Resolved => write!(f, "resolved"),
        }
    }
}
