//! Swarm feed simulation
//!
//! A commander bot spawns agents on a timer; each spawn may chain into a
//! second one. Everything is driven by `advance`, so the feed is
//! reproducible under a seeded RNG.

use crate::config::SwarmConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::time::Duration;

/// Wallets the commander holds before any spawn
pub const COMMANDER_WALLETS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Commander,
    Trader,
    Farmer,
    Scout,
    Builder,
}

impl Role {
    const SPAWNABLE: [Role; 4] = [Role::Trader, Role::Farmer, Role::Scout, Role::Builder];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Commander => "COMMANDER",
            Role::Trader => "TRADER",
            Role::Farmer => "FARMER",
            Role::Scout => "SCOUT",
            Role::Builder => "BUILDER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    All,
    Eth,
    Sol,
    Btc,
    Arb,
    Base,
    Avax,
    Matic,
    Op,
}

impl Chain {
    const SPAWNABLE: [Chain; 8] = [
        Chain::Eth,
        Chain::Sol,
        Chain::Btc,
        Chain::Arb,
        Chain::Base,
        Chain::Avax,
        Chain::Matic,
        Chain::Op,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::All => "ALL",
            Chain::Eth => "ETH",
            Chain::Sol => "SOL",
            Chain::Btc => "BTC",
            Chain::Arb => "ARB",
            Chain::Base => "BASE",
            Chain::Avax => "AVAX",
            Chain::Matic => "MATIC",
            Chain::Op => "OP",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    pub id: u32,
    pub name: String,
    pub role: Role,
    pub chain: Chain,
    pub generation: u32,
    pub parent_id: Option<u32>,
    pub spawned_at: DateTime<Utc>,
}

fn bot_name(id: u32) -> String {
    format!("CLAWD-{:02}", id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedTag {
    Done,
    Active,
    Spawn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    pub at: DateTime<Utc>,
    pub icon: &'static str,
    pub message: String,
    pub tag: Option<FeedTag>,
}

impl fmt::Display for FeedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.at.format("%H:%M:%S"), self.icon, self.message)?;
        if let Some(tag) = self.tag {
            write!(f, " [{:?}]", tag)?;
        }
        Ok(())
    }
}

const STATUSES: [&str; 8] = [
    "SWARM ONLINE",
    "DEPLOYING AGENTS...",
    "EXPANDING NETWORK...",
    "HIVE MIND ACTIVE...",
    "SCANNING CHAINS...",
    "ARMY GROWING...",
    "ALL NODES NOMINAL...",
    "SPAWNING NEW BOTS...",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Due {
    Spawn,
    ChainSpawn,
    Status,
    Heartbeat,
}

pub struct SwarmSim {
    config: SwarmConfig,
    rng: StdRng,
    started_at: DateTime<Utc>,
    elapsed_ms: u64,
    bots: Vec<Bot>,
    next_id: u32,
    generation: u32,
    /// Newest first
    feed: VecDeque<FeedEntry>,
    status_index: usize,
    burst_done: usize,
    next_spawn_ms: u64,
    chain_spawns: VecDeque<u64>,
    next_status_ms: u64,
    next_heartbeat_ms: u64,
}

impl SwarmSim {
    pub fn new(config: SwarmConfig, started_at: DateTime<Utc>, seed: u64) -> Self {
        let mut sim = Self {
            next_spawn_ms: config.burst_interval_ms.max(1),
            next_status_ms: config.status_interval_ms.max(1),
            next_heartbeat_ms: config.heartbeat_interval_ms.max(1),
            config,
            rng: StdRng::seed_from_u64(seed),
            started_at,
            elapsed_ms: 0,
            bots: Vec::new(),
            next_id: 1,
            generation: 0,
            feed: VecDeque::new(),
            status_index: 0,
            burst_done: 0,
            chain_spawns: VecDeque::new(),
        };
        sim.bots.push(Bot {
            id: 0,
            name: bot_name(0),
            role: Role::Commander,
            chain: Chain::All,
            generation: 0,
            parent_id: None,
            spawned_at: started_at,
        });
        for msg in [
            "[CLAWD-00] Website access acquired",
            "[CLAWD-00] Discord access acquired",
            "[CLAWD-00] Twitter / X access acquired",
        ] {
            sim.push_feed("✅", msg.to_string(), Some(FeedTag::Done));
        }
        for chain in [Chain::Eth, Chain::Sol, Chain::Btc] {
            sim.push_feed("💰", format!("[CLAWD-00] {} wallet online", chain), Some(FeedTag::Active));
        }
        sim.push_feed("🤖", "[SYSTEM] Swarm protocol initialized".to_string(), Some(FeedTag::Active));
        sim.push_feed("⚡", "[CLAWD-00] Beginning agent deployment...".to_string(), Some(FeedTag::Spawn));
        sim
    }

    pub fn bots(&self) -> &[Bot] {
        &self.bots
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn wallets(&self) -> usize {
        COMMANDER_WALLETS + self.bots.len()
    }

    pub fn status(&self) -> &'static str {
        STATUSES[self.status_index]
    }

    /// Newest entry first
    pub fn feed(&self) -> impl Iterator<Item = &FeedEntry> {
        self.feed.iter()
    }

    pub fn feed_len(&self) -> usize {
        self.feed.len()
    }

    pub fn count_by_role(&self, role: Role) -> usize {
        self.bots.iter().filter(|b| b.role == role).count()
    }

    pub fn unique_chains(&self) -> usize {
        self.bots.iter().map(|b| b.chain).collect::<BTreeSet<_>>().len()
    }

    fn now(&self) -> DateTime<Utc> {
        self.started_at + ChronoDuration::milliseconds(self.elapsed_ms as i64)
    }

    fn push_feed(&mut self, icon: &'static str, message: String, tag: Option<FeedTag>) {
        let entry = FeedEntry {
            at: self.now(),
            icon,
            message,
            tag,
        };
        tracing::trace!(entry = %entry, "swarm feed");
        self.feed.push_front(entry);
        self.feed.truncate(self.config.feed_max);
    }

    fn create_bot(&mut self, parent_index: usize) -> Option<usize> {
        if self.bots.len() >= self.config.max_bots {
            return None;
        }
        let parent = &self.bots[parent_index];
        let generation = (parent.generation + 1).min(self.config.max_generation);
        let parent_id = parent.id;

        let id = self.next_id;
        self.next_id += 1;
        let role = *Role::SPAWNABLE.choose(&mut self.rng)?;
        let chain = *Chain::SPAWNABLE.choose(&mut self.rng)?;
        self.generation = self.generation.max(generation);

        self.bots.push(Bot {
            id,
            name: bot_name(id),
            role,
            chain,
            generation,
            parent_id: Some(parent_id),
            spawned_at: self.now(),
        });
        Some(self.bots.len() - 1)
    }

    fn spawn(&mut self) {
        let parent = self.rng.gen_range(0..self.bots.len());
        let Some(child) = self.create_bot(parent) else {
            return;
        };
        let msg = format!(
            "[{}] spawned {} ({} on {})",
            self.bots[parent].name, self.bots[child].name, self.bots[child].role, self.bots[child].chain
        );
        self.push_feed("🤖", msg, Some(FeedTag::Spawn));

        if self.rng.gen_bool(self.config.batch_chance.clamp(0.0, 1.0)) && self.bots.len() < self.config.max_bots {
            self.chain_spawns.push_back(self.elapsed_ms + self.config.batch_delay_ms);
        }
    }

    fn chain_spawn(&mut self) {
        let parent = self.rng.gen_range(0..self.bots.len());
        let Some(child) = self.create_bot(parent) else {
            return;
        };
        let msg = format!(
            "[{}] chain-spawned {} ({})",
            self.bots[parent].name, self.bots[child].name, self.bots[child].role
        );
        self.push_feed("⚡", msg, Some(FeedTag::Spawn));
    }

    fn heartbeat(&mut self) {
        let (icon, msg) = match self.rng.gen_range(0..8) {
            0 => ("📡", format!("[SYSTEM] Swarm heartbeat - {} bots nominal", self.bots.len())),
            1 => ("🌐", format!("[CLAWD-00] Network coverage: {} chains", self.unique_chains())),
            2 => ("⚔", format!("[SYSTEM] {} traders active across DEXs", self.count_by_role(Role::Trader))),
            3 => ("🌾", format!("[SYSTEM] {} farmers harvesting yield", self.count_by_role(Role::Farmer))),
            4 => ("🔍", format!("[SYSTEM] {} scouts monitoring alpha", self.count_by_role(Role::Scout))),
            5 => ("🛠", format!("[SYSTEM] {} builders deploying infra", self.count_by_role(Role::Builder))),
            6 => ("🤖", format!("[SYSTEM] Generation {} agents operational", self.generation)),
            _ => ("⚡", format!("[SYSTEM] Total wallets: {}", self.wallets())),
        };
        self.push_feed(icon, msg, None);
    }

    fn next_due(&self) -> (u64, Due) {
        let mut due = (self.next_spawn_ms, Due::Spawn);
        if let Some(&at) = self.chain_spawns.front() {
            due = due.min((at, Due::ChainSpawn));
        }
        due = due.min((self.next_status_ms, Due::Status));
        due.min((self.next_heartbeat_ms, Due::Heartbeat))
    }

    /// Run every timer that falls inside the next `delta`
    pub fn advance(&mut self, delta: Duration) {
        let target = self.elapsed_ms + delta.as_millis() as u64;
        loop {
            let (at, due) = self.next_due();
            if at > target {
                break;
            }
            self.elapsed_ms = at;
            match due {
                Due::Spawn => {
                    self.spawn();
                    if self.burst_done < self.config.burst_size {
                        self.burst_done += 1;
                    }
                    let step = if self.burst_done < self.config.burst_size {
                        self.config.burst_interval_ms
                    } else {
                        self.config.spawn_interval_ms
                    };
                    self.next_spawn_ms = at + step.max(1);
                }
                Due::ChainSpawn => {
                    self.chain_spawns.pop_front();
                    self.chain_spawn();
                }
                Due::Status => {
                    self.status_index = (self.status_index + 1) % STATUSES.len();
                    self.next_status_ms = at + self.config.status_interval_ms.max(1);
                }
                Due::Heartbeat => {
                    self.heartbeat();
                    self.next_heartbeat_ms = at + self.config.heartbeat_interval_ms.max(1);
                }
            }
        }
        self.elapsed_ms = target;
    }
}
