//! Toy duel world driving the CLI.
//!
//! One agent (controlled by the behavior tree through [`DuelActuator`])
//! fights a scripted opponent that walks towards it and swings on a fixed
//! cadence.  Nothing here is physically accurate; the world only has to
//! react to parameter changes so that telemetry has something to measure.

use std::sync::{Arc, Mutex, MutexGuard};

use arbiter_nodes::action::{ActionSpec, TargetEnemy};
use arbiter_nodes::condition::{ConditionOptions, CooldownReady, EnemyWithinRange, HealthBelow};
use arbiter_nodes::movement::{ChaseEnemy, MovementSpec};
use arbiter_nodes::{ActionCommand, Actuator, ActuatorResponse, Node, TargetRef, TreeBuilder};
use arbiter_telemetry::FrameSample;
use arbiter_types::{ActionKind, AgentSnapshot, AgentState, ArbiterError, Cooldowns, Observation, Vec2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

const ARENA_RADIUS: f32 = 20.0;
/// Distance at which a swing can connect.
const REACH: f32 = 2.5;
const AGENT_DAMAGE: f32 = 12.0;
const SPECIAL_DAMAGE: f32 = 25.0;
const ENEMY_DAMAGE: f32 = 6.0;
const ENEMY_SPEED: f32 = 1.5;
const ENEMY_SWING_SECS: f32 = 1.0;
/// Seconds the world keeps an action "in progress" for chain checks.
const ACTION_SECS: f32 = 0.3;
const ENEMY_ID: TargetRef = TargetRef(2);

fn cooldown_secs(kind: ActionKind) -> f32 {
    match kind {
        ActionKind::Attack => 0.5,
        ActionKind::Dodge => 1.5,
        ActionKind::Defend => 2.0,
        ActionKind::Special => 4.0,
        ActionKind::Move => 0.0,
    }
}

/// Winner of a finished episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeOutcome {
    AgentWon,
    EnemyWon,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuelStats {
    pub episodes: u64,
    pub agent_wins: u64,
    pub enemy_wins: u64,
    pub hits: u64,
    pub misses: u64,
}

pub struct DuelWorld {
    rng: ChaCha8Rng,
    tick: u64,
    tick_rate_hz: f32,
    agent: AgentSnapshot,
    enemy: AgentSnapshot,
    move_target: Option<(Vec2, f32)>,
    action: Option<(ActionKind, u64)>,
    /// Remaining cooldown ticks for attack, dodge, defend, special.
    cooldowns: [u64; 4],
    enemy_swing_in: u64,
    stats: DuelStats,
}

fn slot(kind: ActionKind) -> Option<usize> {
    match kind {
        ActionKind::Attack => Some(0),
        ActionKind::Dodge => Some(1),
        ActionKind::Defend => Some(2),
        ActionKind::Special => Some(3),
        ActionKind::Move => None,
    }
}

impl DuelWorld {
    pub fn new(seed: u64, tick_rate_hz: f32) -> Self {
        let tick_rate_hz = if tick_rate_hz > 0.0 { tick_rate_hz } else { 60.0 };
        let mut world = Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick: 0,
            tick_rate_hz,
            agent: AgentSnapshot::default(),
            enemy: AgentSnapshot::default(),
            move_target: None,
            action: None,
            cooldowns: [0; 4],
            enemy_swing_in: 0,
            stats: DuelStats::default(),
        };
        world.spawn();
        world
    }

    fn ticks(&self, seconds: f32) -> u64 {
        (seconds * self.tick_rate_hz).round() as u64
    }

    fn spawn(&mut self) {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let offset = Vec2::new(angle.cos(), angle.sin()) * 8.0;
        self.agent = AgentSnapshot {
            position: offset,
            ..AgentSnapshot::default()
        };
        self.enemy = AgentSnapshot {
            position: -offset,
            ..AgentSnapshot::default()
        };
        self.move_target = None;
        self.action = None;
        self.cooldowns = [0; 4];
        self.enemy_swing_in = self.ticks(ENEMY_SWING_SECS);
    }

    pub fn stats(&self) -> DuelStats {
        self.stats
    }

    pub fn distance(&self) -> f32 {
        self.agent.position.distance(self.enemy.position)
    }

    pub fn observation(&self) -> Observation {
        let mut cooldowns = Cooldowns::default();
        for kind in ActionKind::ALL {
            if let Some(i) = slot(kind) {
                cooldowns.set(kind, self.cooldowns[i] == 0);
            }
        }
        let state = match self.action {
            Some((ActionKind::Attack | ActionKind::Special, _)) => AgentState::Attacking,
            Some((ActionKind::Dodge, _)) => AgentState::Dodging,
            Some((ActionKind::Defend, _)) => AgentState::Defending,
            Some((ActionKind::Move, _)) => AgentState::Moving,
            None if self.move_target.is_some() => AgentState::Moving,
            None => AgentState::Idle,
        };
        Observation {
            tick: self.tick,
            agent: self.agent,
            enemy: self.enemy,
            cooldowns,
            state,
            current_action: self.action.map(|(kind, _)| kind),
            arena_center: Vec2::ZERO,
            arena_radius: ARENA_RADIUS,
        }
    }

    /// Host frame measurements with a little jitter.
    pub fn frame(&mut self) -> FrameSample {
        let fps = 60.0 + self.rng.gen_range(-3.0..3.0);
        let memory = 96.0 + self.rng.gen_range(0.0..8.0);
        FrameSample::new(fps, memory)
    }

    fn perform(&mut self, kind: ActionKind) -> ActuatorResponse {
        let cooldown_slot = slot(kind);
        if cooldown_slot.is_some_and(|i| self.cooldowns[i] > 0) {
            return ActuatorResponse::rejected();
        }
        let swings = matches!(kind, ActionKind::Attack | ActionKind::Special);
        if swings && self.distance() > REACH {
            self.stats.misses += 1;
            return ActuatorResponse::rejected();
        }
        if let Some(i) = cooldown_slot {
            self.cooldowns[i] = self.ticks(cooldown_secs(kind));
        }
        let mut target = None;
        if swings {
            let distance = self.distance();
            let hit_chance = (1.0 - distance / (REACH * 1.2)).clamp(0.1, 0.95);
            if self.rng.gen_bool(f64::from(hit_chance)) {
                let damage = if kind == ActionKind::Special { SPECIAL_DAMAGE } else { AGENT_DAMAGE };
                self.enemy.health = (self.enemy.health - damage).max(0.0);
                self.stats.hits += 1;
            } else {
                self.stats.misses += 1;
            }
            target = Some(ENEMY_ID);
        }
        self.action = Some((kind, self.ticks(ACTION_SECS).max(1)));
        ActuatorResponse::accepted(target)
    }

    pub fn apply(&mut self, command: &ActionCommand) -> ActuatorResponse {
        match *command {
            ActionCommand::Perform { kind, .. } => self.perform(kind),
            ActionCommand::MoveTo { destination, speed } => {
                if speed.is_finite() && speed > 0.0 {
                    self.move_target = Some((destination, speed));
                    ActuatorResponse::accepted(None)
                } else {
                    ActuatorResponse::rejected()
                }
            }
            ActionCommand::Stop => {
                self.move_target = None;
                self.action = None;
                ActuatorResponse::accepted(None)
            }
        }
    }

    /// Advance the world by one tick.
    pub fn step(&mut self) -> Option<EpisodeOutcome> {
        self.tick += 1;
        let dt = 1.0 / self.tick_rate_hz;

        let before = self.agent.position;
        if let Some((destination, speed)) = self.move_target {
            let to_go = destination - self.agent.position;
            let stride = speed * dt;
            if to_go.length() <= stride {
                self.agent.position = destination;
                self.move_target = None;
            } else {
                self.agent.position = self.agent.position + to_go.normalized() * stride;
            }
        }
        self.agent.position = clamp_to_arena(self.agent.position);
        self.agent.velocity = (self.agent.position - before) * self.tick_rate_hz;

        let enemy_before = self.enemy.position;
        if self.distance() > REACH * 0.8 {
            let towards = (self.agent.position - self.enemy.position).normalized();
            self.enemy.position = clamp_to_arena(self.enemy.position + towards * ENEMY_SPEED * dt);
        }
        self.enemy.velocity = (self.enemy.position - enemy_before) * self.tick_rate_hz;

        self.enemy_swing_in = self.enemy_swing_in.saturating_sub(1);
        if self.enemy_swing_in == 0 {
            self.enemy_swing_in = self.ticks(ENEMY_SWING_SECS).max(1);
            if self.distance() <= REACH {
                let damage = match self.action {
                    Some((ActionKind::Dodge, _)) => 0.0,
                    Some((ActionKind::Defend, _)) => ENEMY_DAMAGE * 0.5,
                    _ => ENEMY_DAMAGE,
                };
                self.agent.health = (self.agent.health - damage).max(0.0);
            }
        }

        for c in &mut self.cooldowns {
            *c = c.saturating_sub(1);
        }
        if let Some((kind, remaining)) = self.action {
            self.action = (remaining > 1).then_some((kind, remaining - 1));
        }

        let outcome = if self.enemy.health <= 0.0 {
            Some(EpisodeOutcome::AgentWon)
        } else if self.agent.health <= 0.0 {
            Some(EpisodeOutcome::EnemyWon)
        } else {
            None
        };
        if let Some(outcome) = outcome {
            self.stats.episodes += 1;
            match outcome {
                EpisodeOutcome::AgentWon => self.stats.agent_wins += 1,
                EpisodeOutcome::EnemyWon => self.stats.enemy_wins += 1,
            }
            debug!(tick = self.tick, ?outcome, episodes = self.stats.episodes, "duel episode finished");
            self.spawn();
        }
        outcome
    }
}

fn clamp_to_arena(p: Vec2) -> Vec2 {
    let r = p.length();
    if r > ARENA_RADIUS { p * (ARENA_RADIUS / r) } else { p }
}

/// World handle shared by the CLI loop and the actuator.
#[derive(Clone)]
pub struct SharedWorld(Arc<Mutex<DuelWorld>>);

impl SharedWorld {
    pub fn new(world: DuelWorld) -> Self {
        Self(Arc::new(Mutex::new(world)))
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, DuelWorld>, ArbiterError> {
        self.0
            .lock()
            .map_err(|_| ArbiterError::Channel("duel world lock poisoned".into()))
    }
}

/// Turns node commands into world effects.
pub struct DuelActuator {
    id: String,
    world: SharedWorld,
}

impl DuelActuator {
    pub fn new(id: impl Into<String>, world: SharedWorld) -> Self {
        Self {
            id: id.into(),
            world,
        }
    }
}

impl Actuator for DuelActuator {
    fn id(&self) -> &str {
        &self.id
    }

    fn dispatch(&mut self, command: &ActionCommand) -> ActuatorResponse {
        match self.world.lock() {
            Ok(mut world) => world.apply(command),
            Err(_) => ActuatorResponse::rejected(),
        }
    }
}

/// `survive | engage | chase` selector used by every CLI command.
pub fn build_duelist(b: &mut TreeBuilder<'_>) -> Result<Box<dyn Node>, ArbiterError> {
    let low = b.condition("low_health", HealthBelow, ConditionOptions::default())?;
    let defend = b.action("defend", ActionSpec::defend(), TargetEnemy)?;
    let survive = b.sequence("survive", vec![low, defend]);

    let near = b.condition(
        "enemy_near",
        EnemyWithinRange,
        ConditionOptions {
            adaptive: true,
            ..ConditionOptions::default()
        },
    )?;
    let ready = b.condition("attack_ready", CooldownReady(ActionKind::Attack), ConditionOptions::default())?;
    let attack = b.action("attack", ActionSpec::attack(), TargetEnemy)?;
    let engage = b.sequence("engage", vec![near, ready, attack]);

    let chase = b.movement("chase", MovementSpec::default(), ChaseEnemy)?;
    Ok(b.selector("root", vec![survive, engage, chase]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> DuelWorld {
        DuelWorld::new(7, 60.0)
    }

    #[test]
    fn spawns_on_opposite_sides() {
        let w = world();
        assert!((w.distance() - 16.0).abs() < 1e-3);
        assert_eq!(w.observation().agent.health, 100.0);
    }

    #[test]
    fn attack_out_of_reach_is_rejected() {
        let mut w = world();
        let response = w.apply(&ActionCommand::Perform {
            kind: ActionKind::Attack,
            target: None,
        });
        assert!(!response.success);
        assert_eq!(w.stats().misses, 1);
    }

    #[test]
    fn attack_in_reach_starts_cooldown() {
        let mut w = world();
        w.enemy.position = w.agent.position + Vec2::new(1.0, 0.0);
        let first = w.apply(&ActionCommand::Perform {
            kind: ActionKind::Attack,
            target: None,
        });
        assert!(first.success);
        assert_eq!(first.target, Some(ENEMY_ID));
        let obs = w.observation();
        assert!(!obs.cooldowns.attack);
        assert_eq!(obs.current_action, Some(ActionKind::Attack));
        let second = w.apply(&ActionCommand::Perform {
            kind: ActionKind::Attack,
            target: None,
        });
        assert!(!second.success);
    }

    #[test]
    fn enemy_closes_distance() {
        let mut w = world();
        let start = w.distance();
        for _ in 0..60 {
            w.step();
        }
        assert!(w.distance() < start - 1.0);
    }

    #[test]
    fn movement_reaches_destination() {
        let mut w = world();
        let goal = w.agent.position + Vec2::new(0.5, 0.0);
        w.apply(&ActionCommand::MoveTo {
            destination: goal,
            speed: 4.0,
        });
        for _ in 0..20 {
            w.step();
        }
        assert!(w.agent.position.distance(goal) < 1e-3);
        assert_eq!(w.observation().state, AgentState::Idle);
    }

    #[test]
    fn dead_agent_ends_the_episode() {
        let mut w = world();
        w.agent.health = 0.0;
        assert_eq!(w.step(), Some(EpisodeOutcome::EnemyWon));
        assert_eq!(w.stats().episodes, 1);
        assert_eq!(w.agent.health, 100.0);
    }

    #[test]
    fn same_seed_same_world() {
        let run = |seed| {
            let mut w = DuelWorld::new(seed, 60.0);
            for _ in 0..100 {
                w.step();
            }
            w.observation()
        };
        assert_eq!(run(3), run(3));
    }

    #[test]
    fn duelist_tree_builds() {
        let mut arena = arbiter_nodes::ParameterArena::new();
        let mut b = TreeBuilder::new(arbiter_types::TreeId(1), "duelist", &mut arena);
        let root = build_duelist(&mut b).unwrap();
        let tree = b.build(root);
        assert_eq!(tree.node_count(), 9);
        assert_eq!(arena.handles_for_tree(arbiter_types::TreeId(1)).len(), 6);
    }
}
