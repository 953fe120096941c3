//! [`ArbiterEngine`] – the closed loop.
//!
//! Each call to [`ArbiterEngine::tick`] runs, in order:
//!
//! 1. **Evaluate** – every registered tree ticks against the observation.
//! 2. **Aggregate** – each [`TreeTickReport`] is folded into telemetry and,
//!    every `sample_interval_ticks`, a performance point is captured per
//!    tree.
//! 3. **Monitor** – the frame is sampled; when due the monitor snapshots,
//!    raises/resolves alerts and scores trees for optimization.
//! 4. **Analyze** – when due the analyzer reports on every tree, seeing the
//!    alerts that were active before this tick's monitor cycle.  Alerts
//!    raised on the same tick reach the analyzer on its next cycle.
//! 5. **Optimize** – monitor requests start runs on idle trees, then every
//!    active run or experiment advances one step and may write parameters.
//! 6. **Publish** – output events go onto the [`EventBus`].
//!
//! Everything happens on the caller's thread between two ticks, so the
//! parameter arena needs no locking.
//!
//! ```
//! use arbiter_nodes::action::{ActionSpec, TargetEnemy};
//! use arbiter_nodes::condition::{ConditionOptions, EnemyWithinRange};
//! use arbiter_runtime::{ArbiterEngine, EngineConfig};
//! use arbiter_telemetry::FrameSample;
//! use arbiter_types::Observation;
//!
//! let mut engine = ArbiterEngine::new(EngineConfig::default());
//! let tree = engine
//!     .add_tree("duelist", |b| {
//!         let near = b.condition("enemy_near", EnemyWithinRange, ConditionOptions::default())?;
//!         let attack = b.action("attack", ActionSpec::attack(), TargetEnemy)?;
//!         Ok(b.sequence("engage", vec![near, attack]))
//!     })
//!     .unwrap();
//! let report = engine.tick(&Observation::default(), &FrameSample::default());
//! assert_eq!(report.tick, 1);
//! assert_eq!(report.trees[0].tree, tree);
//! ```

use std::collections::BTreeMap;

use arbiter_analysis::{AnalysisReport, StatisticalAnalyzer};
use arbiter_middleware::EventBus;
use arbiter_monitor::{MonitorCycleReport, PerformanceMonitor, PerformanceSnapshot, TrendAnalysis};
use arbiter_nodes::{
    BehaviorTree, LogicalClock, Node, NodeStatus, NodeSummary, ParameterArena, ParameterWrite, SharedActuator,
    TreeBuilder, TreeTickReport,
};
use arbiter_optimizer::{
    CancellationToken, ExperimentResult, Objective, OptimizationEngine, OptimizationResult, OptimizerStepReport,
    StrategyKind,
};
use arbiter_telemetry::{FrameSample, TelemetryAggregator};
use arbiter_types::{Alert, ArbiterError, Event, EventPayload, Observation, TreeId};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

/// Event source names on the bus.
pub const SOURCE_TELEMETRY: &str = "arbiter/telemetry";
pub const SOURCE_MONITOR: &str = "arbiter/monitor";
pub const SOURCE_ANALYZER: &str = "arbiter/analyzer";
pub const SOURCE_OPTIMIZER: &str = "arbiter/optimizer";

/// Outcome of one tree in one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOutcome {
    pub tree: TreeId,
    pub status: NodeStatus,
}

/// Everything that happened during one [`ArbiterEngine::tick`].
#[derive(Debug, Default)]
pub struct EngineTickReport {
    pub tick: u64,
    pub trees: Vec<TreeOutcome>,
    pub captured: usize,
    pub monitor: Option<MonitorCycleReport>,
    pub analyses: Vec<AnalysisReport>,
    /// Runs started from monitor requests this tick.
    pub started: Vec<TreeId>,
    pub optimizer: OptimizerStepReport,
    pub events: usize,
}

pub struct ArbiterEngine {
    config: EngineConfig,
    clock: LogicalClock,
    arena: ParameterArena,
    trees: BTreeMap<TreeId, BehaviorTree>,
    next_tree: u32,
    actuator: Option<SharedActuator>,
    telemetry: TelemetryAggregator,
    monitor: PerformanceMonitor,
    analyzer: StatisticalAnalyzer,
    optimizer: OptimizationEngine,
    bus: EventBus,
}

impl ArbiterEngine {
    pub fn new(config: EngineConfig) -> Self {
        let bus = EventBus::new(config.bus_capacity.max(1));
        Self::with_bus(config, bus)
    }

    /// Build an engine that publishes on an existing bus.
    pub fn with_bus(config: EngineConfig, bus: EventBus) -> Self {
        let clock = LogicalClock::new(config.tick_rate_hz);
        let tick_rate = clock.tick_rate_hz() as f64;
        Self {
            clock,
            arena: ParameterArena::new(),
            trees: BTreeMap::new(),
            next_tree: 1,
            actuator: None,
            telemetry: TelemetryAggregator::new(config.telemetry.clone()),
            monitor: PerformanceMonitor::new(config.monitor.clone(), tick_rate),
            analyzer: StatisticalAnalyzer::new(config.analyzer.clone()),
            optimizer: OptimizationEngine::new(config.optimizer.clone()),
            bus,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn now(&self) -> u64 {
        self.clock.now().0
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    // ── trees ────────────────────────────────────────────────────────────────

    /// Assemble a tree with `build` and register it everywhere.  The
    /// current actuator, if any, is attached immediately.
    ///
    /// # Errors
    ///
    /// Whatever `build` returns; parameters it registered are removed.
    pub fn add_tree<F>(&mut self, name: &str, build: F) -> Result<TreeId, ArbiterError>
    where
        F: FnOnce(&mut TreeBuilder<'_>) -> Result<Box<dyn Node>, ArbiterError>,
    {
        let id = TreeId(self.next_tree);
        let mut builder = TreeBuilder::new(id, name, &mut self.arena);
        let root = match build(&mut builder) {
            Ok(root) => root,
            Err(e) => {
                self.arena.remove_tree(id);
                return Err(e);
            }
        };
        let mut tree = builder.build(root);
        self.next_tree += 1;

        if let Some(actuator) = &self.actuator {
            tree.initialize(actuator.clone());
        }
        self.telemetry.register_tree(id, name);
        self.analyzer.register_tree(id);
        info!(tree = %id, name, nodes = tree.node_count(), "tree registered");
        self.trees.insert(id, tree);
        Ok(id)
    }

    pub fn remove_tree(&mut self, tree: TreeId) -> Result<(), ArbiterError> {
        self.trees.remove(&tree).ok_or(ArbiterError::UnknownTree(tree))?;
        self.optimizer.forget_tree(tree);
        self.telemetry.unregister_tree(tree);
        self.analyzer.unregister_tree(tree);
        self.monitor.forget_tree(tree);
        self.arena.remove_tree(tree);
        info!(%tree, "tree removed");
        Ok(())
    }

    pub fn tree_ids(&self) -> impl Iterator<Item = TreeId> + '_ {
        self.trees.keys().copied()
    }

    pub fn tree(&self, tree: TreeId) -> Option<&BehaviorTree> {
        self.trees.get(&tree)
    }

    /// Attach `actuator` to every current and future tree.
    pub fn attach_actuator(&mut self, actuator: SharedActuator) {
        for tree in self.trees.values_mut() {
            tree.initialize(actuator.clone());
        }
        self.actuator = Some(actuator);
    }

    /// Episode boundary: node state and per-node metadata start over.
    /// Telemetry, alerts and optimization history are kept.
    pub fn begin_episode(&mut self) {
        for tree in self.trees.values_mut() {
            tree.reset();
            tree.reset_metadata();
        }
        debug!(tick = self.now(), trees = self.trees.len(), "episode started");
    }

    // ── parameters ───────────────────────────────────────────────────────────

    pub fn parameters(&self) -> &ParameterArena {
        &self.arena
    }

    /// Write one parameter through the validating setter.  Returns the
    /// stored value.
    pub fn set_parameter(&mut self, write: &ParameterWrite) -> Result<f64, ArbiterError> {
        self.arena.set(write.handle, &write.name, write.value)
    }

    // ── the loop ─────────────────────────────────────────────────────────────

    pub fn tick(&mut self, observation: &Observation, frame: &FrameSample) -> EngineTickReport {
        let tick = self.clock.advance().0;
        let mut report = EngineTickReport {
            tick,
            ..Default::default()
        };
        let mut events = Vec::new();

        for tree in self.trees.values_mut() {
            let tree_report: TreeTickReport = tree.tick(observation, &self.clock, &self.arena);
            report.trees.push(TreeOutcome {
                tree: tree_report.tree,
                status: tree_report.status,
            });
            if let Err(e) = self.telemetry.record_tick(&tree_report) {
                warn!(tree = %tree_report.tree, error = %e, "tick not aggregated");
            }
        }

        let interval = self.config.telemetry.sample_interval_ticks.max(1);
        if tick % interval == 0 {
            for (tree, _) in self.telemetry.capture_all(tick, frame) {
                report.captured += 1;
                let points = self.telemetry.series(tree).map_or(0, |s| s.len());
                events.push(Event::new(
                    SOURCE_TELEMETRY,
                    EventPayload::VisualizationDataUpdated { tree, points },
                ));
            }
        }

        let analyzer_due = self.analyzer.is_due(tick);
        let prior_alerts = if analyzer_due {
            self.monitor.active_alerts()
        } else {
            Vec::new()
        };

        self.monitor.record_frame(frame);
        if self.monitor.is_due(tick) {
            let cycle = self.monitor.run_cycle(tick, &self.telemetry);
            events.extend(
                cycle
                    .raised
                    .iter()
                    .map(|alert| Event::new(SOURCE_MONITOR, EventPayload::PerformanceAlert(alert.clone()))),
            );
            report.monitor = Some(cycle);
        }

        if analyzer_due {
            let analyses = self.analyzer.run_cycle(tick, &self.telemetry, &prior_alerts);
            for analysis in &analyses {
                events.extend(
                    analysis
                        .events()
                        .into_iter()
                        .map(|payload| Event::new(SOURCE_ANALYZER, payload)),
                );
            }
            report.analyses = analyses;
        }

        if let Some(cycle) = &report.monitor {
            for request in &cycle.requests {
                if self.optimizer.is_active(request.tree) {
                    continue;
                }
                match self
                    .optimizer
                    .start_default_optimization(request.tree, tick, &self.arena, &self.telemetry)
                {
                    Ok(_) => {
                        info!(tree = %request.tree, reason = %request.reason, "auto-optimization started");
                        report.started.push(request.tree);
                    }
                    Err(e) => debug!(tree = %request.tree, error = %e, "auto-optimization skipped"),
                }
            }
        }

        report.optimizer = self.optimizer.step(tick, &mut self.arena, &mut self.telemetry);
        events.extend(
            report
                .optimizer
                .events()
                .into_iter()
                .map(|payload| Event::new(SOURCE_OPTIMIZER, payload)),
        );

        report.events = events.len();
        for event in events {
            self.bus.emit(event);
        }
        report
    }

    // ── optimizer control ────────────────────────────────────────────────────

    pub fn start_optimization(
        &mut self,
        tree: TreeId,
        strategy: StrategyKind,
        objective: Objective,
    ) -> Result<CancellationToken, ArbiterError> {
        self.ensure_tree(tree)?;
        let tick = self.now();
        self.optimizer
            .start_optimization(tree, strategy, objective, tick, &self.arena, &self.telemetry)
    }

    pub fn start_experiment(
        &mut self,
        tree: TreeId,
        group_a: Vec<ParameterWrite>,
        group_b: Vec<ParameterWrite>,
    ) -> Result<CancellationToken, ArbiterError> {
        self.ensure_tree(tree)?;
        let tick = self.now();
        self.optimizer
            .start_experiment(tree, group_a, group_b, tick, &mut self.arena)
    }

    /// Flag every active run and experiment; they finish on the next tick.
    pub fn cancel_optimizations(&self) {
        self.optimizer.cancel_all();
    }

    pub fn optimizer(&self) -> &OptimizationEngine {
        &self.optimizer
    }

    fn ensure_tree(&self, tree: TreeId) -> Result<(), ArbiterError> {
        if self.trees.contains_key(&tree) {
            Ok(())
        } else {
            Err(ArbiterError::UnknownTree(tree))
        }
    }

    // ── query surface ────────────────────────────────────────────────────────

    pub fn telemetry(&self) -> &TelemetryAggregator {
        &self.telemetry
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn performance_history(&self) -> impl Iterator<Item = &PerformanceSnapshot> {
        self.monitor.history().iter()
    }

    pub fn optimization_history(&self) -> impl Iterator<Item = &OptimizationResult> {
        self.optimizer.optimization_history()
    }

    pub fn experiment_history(&self) -> impl Iterator<Item = &ExperimentResult> {
        self.optimizer.experiment_history()
    }

    pub fn trend_analysis(&self) -> Option<TrendAnalysis> {
        self.monitor.trend_analysis()
    }

    pub fn latest_analysis(&self, tree: TreeId) -> Option<&AnalysisReport> {
        self.analyzer.latest(tree)
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.monitor.active_alerts()
    }

    pub fn node_metadata(&self, tree: TreeId) -> Option<Vec<NodeSummary>> {
        self.trees.get(&tree).map(BehaviorTree::metadata_snapshot)
    }
}
