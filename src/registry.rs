//! Sign-up, wallet login, referrals and the leaderboard
//!
//! Access codes and referrer names are checked by the service; the desk only
//! rejects what it can tell is malformed and keeps the logged-in session.

use crate::config::RegistryConfig;
use crate::errors::{DuelError, DuelResult, RemoteError, ValidationError};
use crate::remote::{LeaderboardEntry, RankInfo, Registration, RegistryBackend};
use crate::session::{PlayerSession, SessionStore};
use std::sync::Arc;

/// Shareable link that pre-fills `display_name` as the referrer
pub fn referral_link(origin: &str, display_name: &str) -> String {
    format!("{}?ref={}", origin.trim_end_matches('/'), display_name.trim().to_lowercase())
}

/// The `ref` query parameter of a landing URL
pub fn referral_from_url(url: &str) -> Option<String> {
    let query = url.split('#').next()?.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "ref")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn validate_display_name(name: &str, config: &RegistryConfig) -> Result<String, ValidationError> {
    let name = name.trim();
    let len = name.chars().count();
    if len < config.display_name_min || len > config.display_name_max {
        return Err(ValidationError::DisplayNameLength {
            min: config.display_name_min,
            max: config.display_name_max,
        });
    }
    Ok(name.to_string())
}

fn normalize_code(code: &str) -> Result<String, ValidationError> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return Err(ValidationError::EmptyCode);
    }
    Ok(code)
}

pub struct RegistryDesk {
    backend: Arc<dyn RegistryBackend>,
    sessions: Arc<SessionStore>,
    config: RegistryConfig,
}

impl RegistryDesk {
    pub fn new(backend: Arc<dyn RegistryBackend>, sessions: Arc<SessionStore>, config: RegistryConfig) -> Self {
        Self {
            backend,
            sessions,
            config,
        }
    }

    fn remote(e: RemoteError, op: &str) -> DuelError {
        tracing::warn!(op, error = %e, "registry call failed");
        e.into()
    }

    /// Check an access code before asking for a wallet
    pub async fn check_access_code(&self, code: &str) -> DuelResult<String> {
        let code = normalize_code(code)?;
        self.backend
            .validate_invite_code(&code)
            .await
            .map_err(|e| Self::remote(e, "validate_invite_code"))?;
        Ok(code)
    }

    /// Create the account and log it in. The access code, if any, is
    /// reserved for `wallet` first so nobody else can spend it meanwhile.
    pub async fn register(
        &self,
        wallet: &str,
        display_name: &str,
        access_code: Option<&str>,
        referrer: Option<&str>,
    ) -> DuelResult<PlayerSession> {
        let display_name = validate_display_name(display_name, &self.config)?;
        let access_code = access_code.map(normalize_code).transpose()?;
        if let Some(code) = &access_code {
            self.backend
                .reserve_invite_code(code, wallet)
                .await
                .map_err(|e| Self::remote(e, "reserve_invite_code"))?;
        }

        let registration = Registration {
            wallet: wallet.to_string(),
            display_name,
            access_code,
            referrer: referrer.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string),
        };
        let user = self
            .backend
            .register_user(registration)
            .await
            .map_err(|e| Self::remote(e, "register_user"))?;
        self.sessions.login(&user.user_id, &user.wallet, &user.display_name)
    }

    pub async fn login(&self, wallet: &str) -> DuelResult<PlayerSession> {
        let user = self
            .backend
            .login_with_wallet(wallet)
            .await
            .map_err(|e| Self::remote(e, "login_with_wallet"))?;
        self.sessions.login(&user.user_id, &user.wallet, &user.display_name)
    }

    pub fn referral_link(&self) -> DuelResult<String> {
        let session = self.sessions.require()?;
        Ok(referral_link(&self.config.link_origin, &session.display_name))
    }

    pub async fn referrals(&self) -> DuelResult<Vec<String>> {
        let session = self.sessions.require()?;
        self.backend
            .get_referrals(&session.user_id)
            .await
            .map_err(|e| Self::remote(e, "get_referrals"))
    }

    pub async fn leaderboard(&self) -> DuelResult<Vec<LeaderboardEntry>> {
        self.backend
            .get_leaderboard(self.config.leaderboard_limit)
            .await
            .map_err(|e| Self::remote(e, "get_leaderboard"))
    }

    pub async fn my_rank(&self) -> DuelResult<RankInfo> {
        let session = self.sessions.require()?;
        self.backend
            .get_user_rank(&session.user_id)
            .await
            .map_err(|e| Self::remote(e, "get_user_rank"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::clock::ManualClock;
    use crate::config::{DuelConfig, SessionConfig};
    use crate::errors::SessionStateError;
    use crate::kv::MemoryStore;
    use crate::remote::{GameBackend, RewardSource};

    fn desk() -> (Arc<LocalBackend>, RegistryDesk) {
        let clock = ManualClock::new(1_709_294_400_000);
        let backend = Arc::new(LocalBackend::new(DuelConfig::default(), Arc::new(clock.clone())));
        let sessions = Arc::new(SessionStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(clock),
            SessionConfig::default(),
        ));
        let desk = RegistryDesk::new(backend.clone(), sessions, RegistryConfig::default());
        (backend, desk)
    }

    #[test]
    fn test_referral_link_round_trip() {
        let link = referral_link("https://duelpvp.com/", "DegenKing");
        assert_eq!(link, "https://duelpvp.com?ref=degenking");
        assert_eq!(referral_from_url(&link).as_deref(), Some("degenking"));
        assert_eq!(
            referral_from_url("https://duelpvp.com/?utm=x&ref=bob#play").as_deref(),
            Some("bob")
        );
        assert_eq!(referral_from_url("https://duelpvp.com/?ref="), None);
        assert_eq!(referral_from_url("https://duelpvp.com/"), None);
    }

    #[test]
    fn test_display_name_length() {
        let config = RegistryConfig::default();
        assert_eq!(validate_display_name("  bob ", &config), Ok("bob".to_string()));
        assert!(validate_display_name("al", &config).is_err());
        assert!(validate_display_name("a_very_long_warrior", &config).is_err());
    }

    #[tokio::test]
    async fn test_register_with_code_and_referrer() {
        let (backend, desk) = desk();
        backend.issue_invite_code("WARRIOR");
        assert_eq!(desk.check_access_code(" warrior ").await.unwrap(), "WARRIOR");
        assert!(matches!(
            desk.check_access_code("  ").await,
            Err(DuelError::Validation(ValidationError::EmptyCode))
        ));

        let bob = desk.register("0xB0B", "bob", Some("warrior"), None).await.unwrap();
        assert_eq!(bob.wallet, "0xb0b");
        assert_eq!(desk.referral_link().unwrap(), "https://duelpvp.com?ref=bob");

        // The code is spent, so a second sign-up with it fails remotely.
        assert!(matches!(
            desk.register("0xCA7", "carol", Some("WARRIOR"), Some("bob")).await,
            Err(DuelError::Remote(RemoteError::Rejected(_)))
        ));

        let carol = desk.register("0xCA7", "carol", None, Some(" bob ")).await.unwrap();
        desk.login("0xb0b").await.unwrap();
        assert_eq!(desk.referrals().await.unwrap(), vec![carol.display_name]);
    }

    #[tokio::test]
    async fn test_leaderboard_and_rank() {
        let (backend, desk) = desk();
        let bob = desk.register("0x01", "bob", None, None).await.unwrap();
        let carol = desk.register("0x02", "carol", None, None).await.unwrap();
        backend.grant_reward(&bob.user_id, 700, RewardSource::Farm).await.unwrap();
        backend.grant_reward(&carol.user_id, 900, RewardSource::Farm).await.unwrap();

        let board = desk.leaderboard().await.unwrap();
        assert_eq!(board[0].display_name, "carol");
        assert_eq!(board[1].rank, 2);
        // carol registered last, so her session is the current one.
        assert_eq!(desk.my_rank().await.unwrap(), RankInfo { rank: 1, gc_balance: 900 });
    }

    #[tokio::test]
    async fn test_logged_out_calls_need_session() {
        let (_, desk) = desk();
        assert!(matches!(
            desk.my_rank().await,
            Err(DuelError::SessionState(SessionStateError::NotLoggedIn))
        ));
        assert!(desk.referral_link().is_err());
        assert!(matches!(
            desk.register("0x01", "x", None, None).await,
            Err(DuelError::Validation(ValidationError::DisplayNameLength { min: 3, max: 16 }))
        ));
    }
}
