//! Short-lived result cache shared by every node base.
//!
//! A cached status is reused when all three hold:
//!
//! 1. fewer than `window` ticks have passed since it was stored,
//! 2. the new observation is similar to the one that produced it,
//! 3. the parameter arena has not been written in between.
//!
//! Similarity is either a tolerance check on positions and health
//! ([`CacheKey::Snapshot`], used by action and movement nodes) or an exact
//! match on a coarse hash of the salient fields ([`CacheKey::Hash`], used by
//! condition nodes).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use arbiter_types::{Observation, Vec2};

use crate::clock::Tick;
use crate::node::NodeStatus;

/// Default cache lifetime: 6 ticks, about 0.1 s at 60 Hz.
pub const DEFAULT_CACHE_WINDOW: u64 = 6;
pub const POSITION_TOLERANCE: f32 = 0.1;
pub const HEALTH_TOLERANCE: f32 = 1.0;

/// The part of an observation a cached result depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheKey {
    Snapshot {
        agent: Vec2,
        enemy: Vec2,
        health: f32,
        enemy_health: f32,
        /// Node-specific readiness bit; entries with different bits never match.
        gate: bool,
    },
    Hash(u64),
}

impl CacheKey {
    pub fn snapshot(obs: &Observation) -> Self {
        CacheKey::Snapshot {
            agent: obs.agent.position,
            enemy: obs.enemy.position,
            health: obs.agent.health,
            enemy_health: obs.enemy.health,
            gate: true,
        }
    }

    /// Tie a snapshot key to a readiness bit the tolerances cannot see
    /// (cooldowns, the action in progress).  Hash keys are unchanged.
    pub fn with_gate(self, open: bool) -> Self {
        match self {
            CacheKey::Snapshot {
                agent,
                enemy,
                health,
                enemy_health,
                ..
            } => CacheKey::Snapshot {
                agent,
                enemy,
                health,
                enemy_health,
                gate: open,
            },
            hash => hash,
        }
    }

    /// Coarse hash of health, enemy distance (0.1 resolution) and agent state.
    pub fn coarse_hash(obs: &Observation) -> Self {
        let mut hasher = DefaultHasher::new();
        (obs.agent.health.floor() as i64).hash(&mut hasher);
        ((obs.enemy_distance() * 10.0).round() as i64).hash(&mut hasher);
        obs.state.hash(&mut hasher);
        CacheKey::Hash(hasher.finish())
    }

    pub fn is_similar(&self, other: &CacheKey) -> bool {
        match (self, other) {
            (
                CacheKey::Snapshot {
                    agent: a1,
                    enemy: e1,
                    health: h1,
                    enemy_health: eh1,
                    gate: g1,
                },
                CacheKey::Snapshot {
                    agent: a2,
                    enemy: e2,
                    health: h2,
                    enemy_health: eh2,
                    gate: g2,
                },
            ) => {
                g1 == g2
                    && a1.distance(*a2) < POSITION_TOLERANCE
                    && e1.distance(*e2) < POSITION_TOLERANCE
                    && (h1 - h2).abs() < HEALTH_TOLERANCE
                    && (eh1 - eh2).abs() < HEALTH_TOLERANCE
            }
            (CacheKey::Hash(a), CacheKey::Hash(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    status: NodeStatus,
    stored_at: Tick,
    key: CacheKey,
    revision: u64,
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    window: u64,
    entry: Option<Entry>,
}

impl ResultCache {
    /// A window of `0` disables caching.
    pub fn new(window: u64) -> Self {
        Self {
            window,
            entry: None,
        }
    }

    pub fn lookup(&self, now: Tick, key: &CacheKey, revision: u64) -> Option<NodeStatus> {
        let entry = self.entry.as_ref()?;
        let fresh = now.since(entry.stored_at) < self.window && now >= entry.stored_at;
        (fresh && entry.revision == revision && entry.key.is_similar(key)).then_some(entry.status)
    }

    pub fn store(&mut self, now: Tick, key: CacheKey, revision: u64, status: NodeStatus) {
        if self.window == 0 {
            return;
        }
        self.entry = Some(Entry {
            status,
            stored_at: now,
            key,
            revision,
        });
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn window(&self) -> u64 {
        self.window
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_WINDOW)
    }
}
