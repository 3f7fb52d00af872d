//! Oven staking: GC deposited here compounds at a fixed hourly rate.

use crate::balance::BalanceFacade;
use crate::errors::{DuelResult, ValidationError};
use crate::remote::{StakingBackend, WithdrawReceipt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MS_PER_HOUR: f64 = 3_600_000.0;
const HOURS_PER_YEAR: f64 = 8_760.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    pub principal: u64,
    /// When the current principal started compounding
    pub since_ms: u64,
}

impl StakePosition {
    pub fn value_at(&self, now_ms: u64, hourly_rate_bps: u64) -> u64 {
        let hours = now_ms.saturating_sub(self.since_ms) as f64 / MS_PER_HOUR;
        let rate = hourly_rate_bps as f64 / 10_000.0;
        let value = self.principal as f64 * (1.0 + rate).powf(hours);
        // Nudge past float error before flooring; never report less than what went in.
        ((value + 1e-6).floor() as u64).max(self.principal)
    }

    /// Fold the accrued value into a new principal together with `amount`
    pub fn top_up(&self, amount: u64, now_ms: u64, hourly_rate_bps: u64) -> Self {
        Self {
            principal: self.value_at(now_ms, hourly_rate_bps) + amount,
            since_ms: now_ms,
        }
    }
}

/// Annual yield in percent for an hourly compounding rate
pub fn apy_percent(hourly_rate_bps: u64) -> f64 {
    let rate = hourly_rate_bps as f64 / 10_000.0;
    ((1.0 + rate).powf(HOURS_PER_YEAR) - 1.0) * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakeValue {
    pub principal: u64,
    pub current_value: u64,
    pub profit: u64,
    pub apy: f64,
}

impl StakeValue {
    pub fn empty(hourly_rate_bps: u64) -> Self {
        Self {
            principal: 0,
            current_value: 0,
            profit: 0,
            apy: apy_percent(hourly_rate_bps),
        }
    }

    pub fn of(position: &StakePosition, now_ms: u64, hourly_rate_bps: u64) -> Self {
        let current_value = position.value_at(now_ms, hourly_rate_bps);
        Self {
            principal: position.principal,
            current_value,
            profit: current_value - position.principal,
            apy: apy_percent(hourly_rate_bps),
        }
    }

    /// APY text, collapsing absurd values
    pub fn apy_label(&self) -> String {
        if self.apy > 1_000_000.0 {
            ">1,000,000%".to_string()
        } else {
            format!("{:.0}%", self.apy)
        }
    }
}

/// Client-side staking flow: validate, call the service, refresh the balance
pub struct StakingDesk {
    backend: Arc<dyn StakingBackend>,
    balance: Arc<BalanceFacade>,
}

impl StakingDesk {
    pub fn new(backend: Arc<dyn StakingBackend>, balance: Arc<BalanceFacade>) -> Self {
        Self { backend, balance }
    }

    pub async fn deposit(&self, amount: u64) -> DuelResult<StakeValue> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        self.balance.ensure_affordable(amount).await?;

        let value = self.backend.stake_deposit(self.balance.user_id(), amount).await?;
        tracing::info!(amount, principal = value.principal, "staked GC");
        self.balance.invalidate();
        Ok(value)
    }

    pub async fn withdraw(&self) -> DuelResult<WithdrawReceipt> {
        let receipt = self.backend.stake_withdraw(self.balance.user_id()).await?;
        tracing::info!(amount = receipt.amount_withdrawn, "withdrew stake");
        self.balance.apply_confirmed(receipt.new_balance);
        Ok(receipt)
    }

    pub async fn value(&self) -> DuelResult<StakeValue> {
        Ok(self.backend.get_stake_value(self.balance.user_id()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compounding() {
        let position = StakePosition { principal: 10_000, since_ms: 0 };
        assert_eq!(position.value_at(0, 10), 10_000);
        // One hour at 0.1%.
        assert_eq!(position.value_at(3_600_000, 10), 10_010);
        // Two hours compound: 10_000 × 1.001² = 10_020.01
        assert_eq!(position.value_at(7_200_000, 10), 10_020);
    }

    #[test]
    fn test_top_up_rolls_accrued_value() {
        let position = StakePosition { principal: 10_000, since_ms: 0 };
        let topped = position.top_up(500, 3_600_000, 10);
        assert_eq!(topped.principal, 10_510);
        assert_eq!(topped.since_ms, 3_600_000);
    }

    #[test]
    fn test_stake_value_reporting() {
        let position = StakePosition { principal: 1_000, since_ms: 0 };
        let value = StakeValue::of(&position, 36_000_000, 10);
        assert_eq!(value.principal, 1_000);
        assert_eq!(value.profit, value.current_value - 1_000);
        assert!(value.profit > 0);
        assert!((600_000.0..700_000.0).contains(&apy_percent(10)));
        assert_eq!(StakeValue::empty(10_000).apy_label(), ">1,000,000%");
    }
}
