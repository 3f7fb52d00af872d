//! Airdrop farm: click for a weighted random GC drop, then cool down

use crate::config::{FarmConfig, RewardTier};
use crate::errors::SessionStateError;
use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const FARM_STATE_KEY: &str = "duelpvp.farm";

/// Pick a reward amount by tier weight
pub fn roll_reward<R: Rng + ?Sized>(rng: &mut R, tiers: &[RewardTier]) -> u64 {
    let total: u64 = tiers.iter().map(|t| t.weight as u64).sum();
    if total == 0 {
        return 0;
    }
    let mut roll = rng.gen_range(0..total);
    for tier in tiers {
        if roll < tier.weight as u64 {
            return tier.amount;
        }
        roll -= tier.weight as u64;
    }
    0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmState {
    pub total_earned: u64,
    pub today_earned: u64,
    pub total_clicks: u64,
    pub last_click_ms: Option<u64>,
    pub last_reset_date: Option<NaiveDate>,
}

impl FarmState {
    /// Milliseconds until the next click is allowed
    pub fn cooldown_remaining(&self, now_ms: u64, config: &FarmConfig) -> u64 {
        match self.last_click_ms {
            Some(last) => (last + config.cooldown_ms).saturating_sub(now_ms),
            None => 0,
        }
    }

    /// Zero the daily counter when the date changes
    pub fn rollover(&mut self, today: NaiveDate) {
        if self.last_reset_date != Some(today) {
            self.today_earned = 0;
            self.last_reset_date = Some(today);
        }
    }

    /// Register a click and return the rolled reward
    pub fn click<R: Rng + ?Sized>(
        &mut self,
        now_ms: u64,
        today: NaiveDate,
        rng: &mut R,
        config: &FarmConfig,
    ) -> Result<u64, SessionStateError> {
        let remaining_ms = self.cooldown_remaining(now_ms, config);
        if remaining_ms > 0 {
            return Err(SessionStateError::CoolingDown { remaining_ms });
        }
        self.rollover(today);

        let reward = roll_reward(rng, &config.tiers);
        self.total_clicks += 1;
        self.last_click_ms = Some(now_ms);
        self.total_earned += reward;
        self.today_earned += reward;
        Ok(reward)
    }
}
