//! Cached view of the player's GC balance
//!
//! The facade is the only writer of the cached value. It stores balances the
//! game service has confirmed and refetches once the cache goes stale.

use crate::clock::Clock;
use crate::errors::{DuelError, DuelResult};
use crate::remote::GameBackend;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CachedBalance {
    value: u64,
    /// `None` once invalidated; the value is kept for display
    fetched_at_ms: Option<u64>,
}

pub struct BalanceFacade {
    backend: Arc<dyn GameBackend>,
    clock: Arc<dyn Clock>,
    user_id: String,
    ttl: Duration,
    cached: Mutex<Option<CachedBalance>>,
}

impl BalanceFacade {
    pub fn new(
        backend: Arc<dyn GameBackend>,
        clock: Arc<dyn Clock>,
        user_id: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            user_id: user_id.into(),
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn slot(&self) -> MutexGuard<'_, Option<CachedBalance>> {
        self.cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fresh_value(&self) -> Option<u64> {
        let now = self.clock.now_ms();
        let ttl_ms = self.ttl.as_millis() as u64;
        self.slot().and_then(|c| match c.fetched_at_ms {
            Some(at) if now.saturating_sub(at) < ttl_ms => Some(c.value),
            _ => None,
        })
    }

    /// Current balance, fetched from the service when the cache is stale
    pub async fn balance(&self) -> DuelResult<u64> {
        if let Some(value) = self.fresh_value() {
            return Ok(value);
        }
        let value = self.backend.get_balance(&self.user_id).await.map_err(|e| {
            tracing::warn!(user = %self.user_id, error = %e, "balance fetch failed");
            DuelError::from(e)
        })?;
        self.apply_confirmed(value);
        Ok(value)
    }

    /// Last known value, fresh or not
    pub fn cached(&self) -> Option<u64> {
        self.slot().map(|c| c.value)
    }

    /// Store a balance the service reported after a transaction
    pub fn apply_confirmed(&self, value: u64) {
        let now = self.clock.now_ms();
        *self.slot() = Some(CachedBalance {
            value,
            fetched_at_ms: Some(now),
        });
        tracing::debug!(user = %self.user_id, balance = value, "balance confirmed");
    }

    /// Force the next read to go to the service
    pub fn invalidate(&self) {
        if let Some(cached) = self.slot().as_mut() {
            cached.fetched_at_ms = None;
        }
    }

    /// Reject locally when the balance cannot cover `required`
    pub async fn ensure_affordable(&self, required: u64) -> DuelResult<()> {
        let balance = self.balance().await?;
        if balance < required {
            return Err(DuelError::InsufficientFunds { balance, required });
        }
        Ok(())
    }

    pub fn clear(&self) {
        *self.slot() = None;
    }
}
