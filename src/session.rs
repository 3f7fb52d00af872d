//! Wallet-keyed player session persisted in the local store

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::errors::{DuelResult, SessionStateError};
use crate::kv::{get_json, put_json, KvStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SESSION_KEY: &str = "duelpvp.auth";
pub const SESSION_VERSION: u32 = 1;

/// Every key the client writes starts with one of these
const CLIENT_PREFIXES: [&str; 2] = ["duelpvp.", "duelpvp_"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSession {
    pub version: u32,
    pub user_id: String,
    /// Always lower-case
    pub wallet: String,
    pub display_name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PlayerSession {
    pub fn new(
        user_id: impl Into<String>,
        wallet: &str,
        display_name: impl Into<String>,
        now: DateTime<Utc>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            version: SESSION_VERSION,
            user_id: user_id.into(),
            wallet: wallet.trim().to_lowercase(),
            display_name: display_name.into(),
            issued_at: now,
            expires_at: now + Duration::days(config.lifetime_days),
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.version == SESSION_VERSION && !self.user_id.is_empty() && now < self.expires_at
    }

    /// Short form of the wallet for display, e.g. `0x12ab…cdef`
    pub fn short_wallet(&self) -> String {
        let w = &self.wallet;
        if w.len() <= 10 || !w.is_ascii() {
            return w.clone();
        }
        format!("{}…{}", &w[..6], &w[w.len() - 4..])
    }
}

/// Player level derived from the balance
pub fn level_for(balance: u64, config: &SessionConfig) -> u64 {
    balance / config.level_step.max(1) + 1
}

/// Loads, saves and clears the persisted session
pub struct SessionStore {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        Self { store, clock, config }
    }

    pub fn login(&self, user_id: &str, wallet: &str, display_name: &str) -> DuelResult<PlayerSession> {
        let session = PlayerSession::new(user_id, wallet, display_name, self.clock.now(), &self.config);
        put_json(self.store.as_ref(), SESSION_KEY, &session)?;
        tracing::info!(user = %session.user_id, wallet = %session.short_wallet(), "player logged in");
        Ok(session)
    }

    /// The stored session if it is still valid; expired sessions are removed
    pub fn current(&self) -> DuelResult<Option<PlayerSession>> {
        let Some(session) = get_json::<PlayerSession>(self.store.as_ref(), SESSION_KEY)? else {
            return Ok(None);
        };
        if session.is_valid(self.clock.now()) {
            return Ok(Some(session));
        }
        tracing::info!(user = %session.user_id, "stored session expired");
        self.store.remove(SESSION_KEY)?;
        Ok(None)
    }

    pub fn require(&self) -> DuelResult<PlayerSession> {
        self.current()?
            .ok_or_else(|| SessionStateError::NotLoggedIn.into())
    }

    /// Remove every client-owned key
    pub fn logout(&self) -> DuelResult<usize> {
        let mut removed = 0;
        for prefix in CLIENT_PREFIXES {
            removed += self.store.remove_prefix(prefix)?;
        }
        tracing::info!(removed, "player logged out");
        Ok(removed)
    }
}
