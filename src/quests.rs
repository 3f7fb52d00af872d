//! Quest catalogue and per-player progress
//!
//! Daily quests reset at UTC midnight, weekly quests on ISO week change and
//! one-off quests never reset.

use crate::config::ReactionConfig;
use crate::errors::SessionStateError;
use crate::games::reaction::Attempt;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestPeriod {
    Daily,
    Weekly,
    Once,
}

impl QuestPeriod {
    /// Identifier of the period `now` falls into
    pub fn key(&self, now: DateTime<Utc>) -> String {
        match self {
            QuestPeriod::Daily => now.format("%Y-%m-%d").to_string(),
            QuestPeriod::Weekly => {
                let week = now.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            QuestPeriod::Once => "once".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestDef {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub period: QuestPeriod,
    pub target: u32,
    pub reward: u64,
}

pub const FIRST_LOGIN: &str = "first_login";
pub const DAILY_LOGIN: &str = "daily_login";
pub const DAILY_PLAY: &str = "daily_play_3";
pub const WEEKLY_PLAY: &str = "weekly_play_20";
pub const DAILY_FAST: &str = "daily_fast_time";
pub const WEEKLY_FAST: &str = "weekly_sub_250";

pub const CATALOGUE: &[QuestDef] = &[
    QuestDef {
        id: FIRST_LOGIN,
        name: "First Steps",
        description: "Log in for the first time",
        period: QuestPeriod::Once,
        target: 1,
        reward: 500,
    },
    QuestDef {
        id: DAILY_LOGIN,
        name: "Daily Check-in",
        description: "Log in or finish a reaction round today",
        period: QuestPeriod::Daily,
        target: 1,
        reward: 100,
    },
    QuestDef {
        id: DAILY_PLAY,
        name: "Warm Up",
        description: "Play 3 reaction rounds today",
        period: QuestPeriod::Daily,
        target: 3,
        reward: 250,
    },
    QuestDef {
        id: WEEKLY_PLAY,
        name: "Grinder",
        description: "Play 20 reaction rounds this week",
        period: QuestPeriod::Weekly,
        target: 20,
        reward: 2_000,
    },
    QuestDef {
        id: DAILY_FAST,
        name: "Quick Hands",
        description: "Sell within 300ms of the top",
        period: QuestPeriod::Daily,
        target: 1,
        reward: 500,
    },
    QuestDef {
        id: WEEKLY_FAST,
        name: "Sniper",
        description: "Sell within 200ms of the top",
        period: QuestPeriod::Weekly,
        target: 1,
        reward: 1_500,
    },
];

pub fn find(id: &str) -> Option<&'static QuestDef> {
    CATALOGUE.iter().find(|q| q.id == id)
}

/// Quests a recorded reaction attempt advances
pub fn reaction_triggers(attempt: &Attempt, config: &ReactionConfig) -> Vec<&'static str> {
    let Some(score) = attempt.score() else {
        return Vec::new();
    };
    let mut ids = vec![DAILY_PLAY, WEEKLY_PLAY];
    if score < config.daily_fast_ms {
        ids.push(DAILY_FAST);
    }
    if score < config.weekly_fast_ms {
        ids.push(WEEKLY_FAST);
    }
    ids.push(DAILY_LOGIN);
    ids
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestProgress {
    pub quest_id: String,
    pub progress: u32,
    pub target: u32,
    pub reward: u64,
    pub claimed: bool,
    pub period_key: String,
}

impl QuestProgress {
    pub fn is_claimable(&self) -> bool {
        self.progress >= self.target && !self.claimed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    progress: u32,
    claimed: bool,
    period_key: String,
}

/// One player's progress across the catalogue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestLedger {
    entries: HashMap<String, Entry>,
}

impl QuestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, def: &QuestDef, now: DateTime<Utc>) -> &mut Entry {
        let key = def.period.key(now);
        let entry = self.entries.entry(def.id.to_string()).or_default();
        if entry.period_key != key {
            *entry = Entry {
                progress: 0,
                claimed: false,
                period_key: key,
            };
        }
        entry
    }

    /// Bump progress, capped at the target
    pub fn advance(&mut self, quest_id: &str, amount: u32, now: DateTime<Utc>) -> Option<QuestProgress> {
        let def = find(quest_id)?;
        let entry = self.entry(def, now);
        entry.progress = entry.progress.saturating_add(amount).min(def.target);
        Some(self.progress_of(def, now))
    }

    /// Mark the quest claimed and return its reward
    pub fn claim(&mut self, quest_id: &str, now: DateTime<Utc>) -> Result<u64, SessionStateError> {
        let def = find(quest_id).ok_or_else(|| SessionStateError::QuestNotClaimable(quest_id.to_string()))?;
        let entry = self.entry(def, now);
        if entry.claimed || entry.progress < def.target {
            return Err(SessionStateError::QuestNotClaimable(quest_id.to_string()));
        }
        entry.claimed = true;
        Ok(def.reward)
    }

    pub fn progress_of(&mut self, def: &QuestDef, now: DateTime<Utc>) -> QuestProgress {
        let entry = self.entry(def, now);
        QuestProgress {
            quest_id: def.id.to_string(),
            progress: entry.progress,
            target: def.target,
            reward: def.reward,
            claimed: entry.claimed,
            period_key: entry.period_key.clone(),
        }
    }

    pub fn all(&mut self, now: DateTime<Utc>) -> Vec<QuestProgress> {
        CATALOGUE.iter().map(|def| self.progress_of(def, now)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_check_in_describes_both_triggers() {
        let quest = find(DAILY_LOGIN).unwrap();
        assert!(quest.description.contains("Log in"));
        assert!(quest.description.contains("reaction round"));
    }

    #[test]
    fn test_period_keys() {
        let now = at(2024, 5, 1);
        assert_eq!(QuestPeriod::Daily.key(now), "2024-05-01");
        assert_eq!(QuestPeriod::Weekly.key(now), "2024-W18");
        assert_eq!(QuestPeriod::Once.key(now), "once");
    }

    #[test]
    fn test_claim_requires_target() {
        let mut ledger = QuestLedger::new();
        let now = at(2024, 5, 1);
        ledger.advance(DAILY_PLAY, 2, now);
        assert!(ledger.claim(DAILY_PLAY, now).is_err());

        let p = ledger.advance(DAILY_PLAY, 5, now).unwrap();
        assert_eq!(p.progress, 3);
        assert!(p.is_claimable());
        assert_eq!(ledger.claim(DAILY_PLAY, now), Ok(250));
        assert_eq!(
            ledger.claim(DAILY_PLAY, now),
            Err(SessionStateError::QuestNotClaimable(DAILY_PLAY.to_string()))
        );
    }

    #[test]
    fn test_daily_reset() {
        let mut ledger = QuestLedger::new();
        ledger.advance(DAILY_FAST, 1, at(2024, 5, 1));
        ledger.claim(DAILY_FAST, at(2024, 5, 1)).unwrap();

        let next_day = ledger.advance(DAILY_FAST, 0, at(2024, 5, 2)).unwrap();
        assert_eq!(next_day.progress, 0);
        assert!(!next_day.claimed);

        ledger.advance(FIRST_LOGIN, 1, at(2024, 5, 1));
        ledger.claim(FIRST_LOGIN, at(2024, 5, 1)).unwrap();
        assert!(ledger.claim(FIRST_LOGIN, at(2025, 1, 1)).is_err());
    }

    #[test]
    fn test_reaction_triggers() {
        let config = ReactionConfig::default();
        assert!(reaction_triggers(&Attempt::TooEarly { at_ms: 5 }, &config).is_empty());

        let slow = reaction_triggers(&Attempt::Timed { score_ms: 450, auto: false }, &config);
        assert_eq!(slow, vec![DAILY_PLAY, WEEKLY_PLAY, DAILY_LOGIN]);

        let fast = reaction_triggers(&Attempt::Timed { score_ms: 150, auto: false }, &config);
        assert!(fast.contains(&DAILY_FAST) && fast.contains(&WEEKLY_FAST));
    }

    #[test]
    fn test_unknown_quest() {
        let mut ledger = QuestLedger::new();
        assert!(ledger.advance("retweet", 1, at(2024, 5, 1)).is_none());
        assert!(ledger.claim("retweet", at(2024, 5, 1)).is_err());
    }
}
