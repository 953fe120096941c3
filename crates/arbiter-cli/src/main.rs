//! `arbiter-cli` – command line front end for the Arbiter engine.
//!
//! ```text
//! arbiter run [ticks]          simulate a duel with auto-optimization
//! arbiter experiment [ticks]   A/B test two attack ranges on the duelist
//! arbiter config [init|path]   show, create or locate ~/.arbiter/config.toml
//! arbiter schema               JSON Schema of the exported report types
//! ```
//!
//! Ctrl-C during `run`/`experiment` cancels active optimization jobs, lets
//! them commit on one final tick, and prints the summary.

mod config;
mod sim;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use arbiter_analysis::AnalysisReport;
use arbiter_nodes::ParameterWrite;
use arbiter_nodes::actuator::shared;
use arbiter_optimizer::{CancellationToken, ExperimentResult, OptimizationResult};
use arbiter_runtime::{ArbiterEngine, init_tracing};
use arbiter_telemetry::{TelemetryAggregator, TreeSummary};
use arbiter_types::{Alert, AlertSeverity, ArbiterError, Event, EventPayload, TreeId};
use colored::Colorize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::Config;
use crate::sim::{DuelActuator, DuelWorld, SharedWorld};

/// Ticks between cooperative yields so the event printer keeps up.
const YIELD_EVERY: u64 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Run { ticks: Option<u64> },
    Experiment { ticks: Option<u64> },
    ShowConfig,
    InitConfig,
    ConfigPath,
    Schema,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let ticks = |arg: Option<&String>| -> Result<Option<u64>, String> {
        arg.map(|s| s.parse::<u64>().map_err(|_| format!("invalid tick count `{s}`")))
            .transpose()
    };
    match args.first().map(String::as_str) {
        None | Some("help" | "-h" | "--help") => Ok(Command::Help),
        Some("run") => Ok(Command::Run { ticks: ticks(args.get(1))? }),
        Some("experiment") => Ok(Command::Experiment { ticks: ticks(args.get(1))? }),
        Some("config") => match args.get(1).map(String::as_str) {
            None => Ok(Command::ShowConfig),
            Some("init") => Ok(Command::InitConfig),
            Some("path") => Ok(Command::ConfigPath),
            Some(other) => Err(format!("unknown config action `{other}`")),
        },
        Some("schema") => Ok(Command::Schema),
        Some(other) => Err(format!("unknown command `{other}`")),
    }
}

#[tokio::main]
async fn main() {
    let _guard = init_tracing("arbiter");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_help();
            std::process::exit(2);
        }
    };

    let result = match command {
        Command::Run { ticks } => simulate(ticks, false).await,
        Command::Experiment { ticks } => simulate(ticks, true).await,
        Command::ShowConfig => show_config(),
        Command::InitConfig => init_config(),
        Command::ConfigPath => {
            println!("{}", config::config_path().display());
            Ok(())
        }
        Command::Schema => print_schema(),
        Command::Help => {
            print_help();
            Ok(())
        }
    };
    if let Err(e) = result {
        eprintln!("{}: {e}", "error".red().bold());
        std::process::exit(1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulation
// ─────────────────────────────────────────────────────────────────────────────

async fn simulate(ticks: Option<u64>, experiment: bool) -> Result<(), ArbiterError> {
    let cfg = config::load_or_default()?;
    print_banner(&cfg);

    let world = SharedWorld::new(DuelWorld::new(cfg.world_seed, cfg.engine.tick_rate_hz));
    let mut engine = ArbiterEngine::new(cfg.engine.clone());
    let tree = engine.add_tree("duelist", sim::build_duelist)?;
    engine.attach_actuator(shared(DuelActuator::new("duel-agent-0", world.clone())));

    let ticks = if experiment {
        let (a, b) = experiment_groups(&engine, tree)?;
        engine.start_experiment(tree, a, b)?;
        println!(
            "  A/B experiment on {}: attack range {} vs {}",
            "duelist".bold(),
            "2.4".cyan(),
            "6.0".cyan()
        );
        ticks.unwrap_or(cfg.engine.optimizer.experiment.duration_ticks + 1)
    } else {
        ticks.unwrap_or(cfg.default_ticks)
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – cancelling optimization jobs …".yellow().bold());
        on_signal.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    // Subscribe before the first tick so no early alert is missed.
    let printer = tokio::spawn(print_events(engine.bus().subscribe()));

    info!(ticks, tree = %tree, "simulation started");
    for n in 0..ticks {
        if shutdown.is_cancelled() {
            engine.cancel_optimizations();
            step(&mut engine, &world)?;
            break;
        }
        step(&mut engine, &world)?;
        if n % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    let summary = render_summary(&engine, tree, &world)?;
    drop(engine);
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer stopped abnormally");
    }
    print!("{summary}");
    Ok(())
}

fn step(engine: &mut ArbiterEngine, world: &SharedWorld) -> Result<(), ArbiterError> {
    // The world lock must be released before the tree ticks: the actuator
    // takes it again on dispatch.
    let (observation, frame) = {
        let mut w = world.lock()?;
        (w.observation(), w.frame())
    };
    engine.tick(&observation, &frame);
    if world.lock()?.step().is_some() {
        engine.begin_episode();
    }
    Ok(())
}

fn experiment_groups(engine: &ArbiterEngine, tree: TreeId) -> Result<(Vec<ParameterWrite>, Vec<ParameterWrite>), ArbiterError> {
    let handle = engine
        .node_metadata(tree)
        .and_then(|nodes| nodes.into_iter().find(|n| n.name == "attack"))
        .map(|n| n.handle)
        .ok_or_else(|| ArbiterError::NodeFault {
            node: "attack".into(),
            details: format!("no such node in {tree}"),
        })?;
    let range = |value| {
        vec![ParameterWrite {
            handle,
            name: "range".into(),
            value,
        }]
    };
    Ok((range(2.4), range(6.0)))
}

async fn print_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => print_event(&event),
            Err(RecvError::Lagged(n)) => println!("  {}", format!("… {n} events skipped").dimmed()),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &Event) {
    match &event.payload {
        EventPayload::PerformanceAlert(alert) => {
            println!("  {} {} {}", "⚠".yellow(), severity_label(alert), alert.message);
        }
        EventPayload::RegressionDetected {
            tree,
            metric,
            degradation,
            t_statistic,
        } => println!(
            "  {} {tree}: {metric} degraded {:.1}% (t = {t_statistic:.2})",
            "↘".red().bold(),
            degradation * 100.0
        ),
        EventPayload::RecommendationReady { tree, title, priority } => {
            println!("  {} {tree}: {title} (priority {priority:.2})", "✎".cyan());
        }
        EventPayload::OptimizationCompleted {
            tree,
            iterations,
            best_score,
            converged,
            ..
        } => println!(
            "  {} {tree}: optimization finished after {iterations} iterations, best {best_score:.3}{}",
            "✓".green().bold(),
            if *converged { " (converged)" } else { "" }
        ),
        EventPayload::ExperimentCompleted {
            tree,
            winner,
            significant,
            ..
        } => println!(
            "  {} {tree}: experiment finished, winner {} (significant: {significant})",
            "✓".green().bold(),
            winner.as_deref().unwrap_or("none")
        ),
        EventPayload::AnalysisCompleted {
            tree,
            sample_count,
            regression_count,
            recommendation_count,
        } => println!(
            "  {}",
            format!(
                "{tree}: analysed {sample_count} points, {regression_count} regressions, {recommendation_count} recommendations"
            )
            .dimmed()
        ),
        EventPayload::VisualizationDataUpdated { .. } => {}
    }
}

fn severity_label(alert: &Alert) -> colored::ColoredString {
    match alert.severity {
        AlertSeverity::High => "HIGH".red().bold(),
        AlertSeverity::Medium => "MED".yellow().bold(),
        AlertSeverity::Low => "LOW".normal(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary
// ─────────────────────────────────────────────────────────────────────────────

fn render_summary(engine: &ArbiterEngine, tree: TreeId, world: &SharedWorld) -> Result<String, ArbiterError> {
    let stats = world.lock()?.stats();
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "── Summary ─────────────────────────────────────".bold());
    let _ = writeln!(
        out,
        "  tick {}  episodes {}  agent wins {}  enemy wins {}  hits {}  misses {}",
        engine.now(),
        stats.episodes,
        stats.agent_wins.to_string().green(),
        stats.enemy_wins.to_string().red(),
        stats.hits,
        stats.misses
    );

    if let Some(summary) = engine.telemetry().summary(tree) {
        render_tree(&mut out, &summary);
    }
    if let Some(nodes) = engine.node_metadata(tree) {
        let _ = writeln!(out, "  {}", "nodes".bold());
        for node in nodes {
            let m = &node.metadata;
            let success = if m.execution_count > 0 {
                m.success_count as f64 / m.execution_count as f64
            } else {
                0.0
            };
            let _ = writeln!(
                out,
                "    {:<14} {:<10} runs {:>7}  success {:>5.1}%  cached {}",
                node.name,
                TelemetryAggregator::kind_label(node.kind),
                m.execution_count,
                success * 100.0,
                m.cache_hits
            );
        }
    }

    if let Some(trend) = engine.trend_analysis() {
        let _ = writeln!(
            out,
            "  trend {:?}: fps {:+.1}%  memory {:+.1}%  success {:+.1}%",
            trend.direction,
            trend.fps_change * 100.0,
            trend.memory_change * 100.0,
            trend.success_change * 100.0
        );
    }

    let alerts = engine.active_alerts();
    let _ = writeln!(out, "  {} ({})", "active alerts".bold(), alerts.len());
    for alert in &alerts {
        let _ = writeln!(out, "    {} {}", severity_label(alert), alert.message);
    }

    if let Some(report) = engine.latest_analysis(tree) {
        render_analysis(&mut out, report);
    }
    for result in engine.optimization_history() {
        render_optimization(&mut out, result);
    }
    for result in engine.experiment_history() {
        render_experiment(&mut out, result);
    }
    Ok(out)
}

fn render_tree(out: &mut String, s: &TreeSummary) {
    let _ = writeln!(
        out,
        "  {} {}: {} ticks, success {:.1}%, {:.3} ms/tick, cache hits {:.1}%, {} points",
        "tree".bold(),
        s.name,
        s.executions,
        s.success_rate * 100.0,
        s.average_tick_ms,
        s.cache_hit_rate * 100.0,
        s.points
    );
    for b in &s.bottlenecks {
        let _ = writeln!(
            out,
            "    bottleneck {} ({:?}): {:.3} vs {:.3}, severity {:.2}",
            b.name, b.kind, b.observed, b.threshold, b.severity
        );
    }
    if let Some(top) = s.priorities.first() {
        let _ = writeln!(out, "    top tuning priority: {} ({:.2})", top.name, top.score);
    }
}

fn render_analysis(out: &mut String, report: &AnalysisReport) {
    let _ = writeln!(
        out,
        "  {} at tick {}: {} points, {} regressions",
        "analysis".bold(),
        report.tick,
        report.point_count,
        report.regressions.len()
    );
    for rec in report.recommendations.iter().take(3) {
        let _ = writeln!(out, "    [{:.2}] {}: {}", rec.priority, rec.title, rec.detail);
    }
}

fn render_optimization(out: &mut String, r: &OptimizationResult) {
    let status = if r.cancelled {
        "cancelled".yellow()
    } else if r.converged {
        "converged".green()
    } else {
        "budget spent".normal()
    };
    let _ = writeln!(
        out,
        "  {} {} / {}: {} iterations, best {:.3}, {}",
        "optimization".bold(),
        r.strategy,
        r.objective,
        r.iterations,
        r.best_score,
        status
    );
    let params: Vec<String> = r
        .best_parameters
        .iter()
        .map(|p| format!("{}.{}={:.2}", p.handle.node, p.name, p.value))
        .collect();
    if !params.is_empty() {
        let _ = writeln!(out, "    {}", params.join("  "));
    }
}

fn render_experiment(out: &mut String, r: &ExperimentResult) {
    let t = &r.verdict.test;
    let _ = writeln!(
        out,
        "  {}: A {:.3} (n={}) vs B {:.3} (n={}), t = {:.2}, winner {}",
        "experiment".bold(),
        t.mean_a,
        t.n_a,
        t.mean_b,
        t.n_b,
        t.t_statistic,
        r.winner().map_or_else(|| "none".to_string(), |g| g.to_string())
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Config & schema
// ─────────────────────────────────────────────────────────────────────────────

fn show_config() -> Result<(), ArbiterError> {
    let path = config::config_path();
    let (cfg, origin) = match config::load()? {
        Some(cfg) => (cfg, path.display().to_string()),
        None => (config::load_or_default()?, "defaults".to_string()),
    };
    let raw = toml::to_string_pretty(&cfg).map_err(|e| ArbiterError::Config(e.to_string()))?;
    println!("# {} {}", "effective configuration from".dimmed(), origin.bold());
    println!("{raw}");
    Ok(())
}

fn init_config() -> Result<(), ArbiterError> {
    let path = config::config_path();
    if config::load()?.is_some() {
        println!("  {} already exists; leaving it untouched.", path.display().to_string().bold());
        return Ok(());
    }
    config::save(&Config::default())?;
    println!("  {} Config written to {}", "✓".green().bold(), path.display().to_string().bold());
    Ok(())
}

fn print_schema() -> Result<(), ArbiterError> {
    let schemas = BTreeMap::from([
        ("Alert", schemars::schema_for!(Alert)),
        ("AnalysisReport", schemars::schema_for!(AnalysisReport)),
        ("ExperimentResult", schemars::schema_for!(ExperimentResult)),
        ("OptimizationResult", schemars::schema_for!(OptimizationResult)),
        ("TreeSummary", schemars::schema_for!(TreeSummary)),
    ]);
    let raw = serde_json::to_string_pretty(&schemas).map_err(|e| ArbiterError::Config(e.to_string()))?;
    println!("{raw}");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner & help
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(cfg: &Config) {
    println!();
    println!("  {} {}", "Arbiter".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Self-tuning behavior trees");
    println!(
        "  {} Hz, monitor every {} ticks, analysis every {} ticks, auto-optimize {}",
        cfg.engine.tick_rate_hz,
        cfg.engine.monitor.interval_ticks,
        cfg.engine.analyzer.interval_ticks,
        if cfg.engine.monitor.auto_optimize { "on".green() } else { "off".yellow() }
    );
    println!();
}

fn print_help() {
    println!("{}", "Usage:".bold());
    println!("  arbiter run [ticks]          simulate a duel with auto-optimization");
    println!("  arbiter experiment [ticks]   A/B test two attack ranges");
    println!("  arbiter config [init|path]   show, create or locate the config file");
    println!("  arbiter schema               print JSON Schema of exported reports");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_args(&args(&[])), Ok(Command::Help));
        assert_eq!(parse_args(&args(&["run"])), Ok(Command::Run { ticks: None }));
        assert_eq!(parse_args(&args(&["run", "600"])), Ok(Command::Run { ticks: Some(600) }));
        assert_eq!(
            parse_args(&args(&["experiment", "10"])),
            Ok(Command::Experiment { ticks: Some(10) })
        );
        assert_eq!(parse_args(&args(&["config"])), Ok(Command::ShowConfig));
        assert_eq!(parse_args(&args(&["config", "init"])), Ok(Command::InitConfig));
        assert_eq!(parse_args(&args(&["schema"])), Ok(Command::Schema));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&args(&["run", "lots"])).is_err());
        assert!(parse_args(&args(&["config", "delete"])).is_err());
        assert!(parse_args(&args(&["fly"])).is_err());
    }

    #[test]
    fn experiment_groups_target_attack_range() {
        let mut engine = ArbiterEngine::new(Config::default().engine);
        let tree = engine.add_tree("duelist", sim::build_duelist).unwrap();
        let (a, b) = experiment_groups(&engine, tree).unwrap();
        assert_eq!(a[0].name, "range");
        assert_eq!(a[0].handle, b[0].handle);
        assert_eq!((a[0].value, b[0].value), (2.4, 6.0));
    }

    #[test]
    fn simulated_duel_produces_a_summary() {
        let mut cfg = Config::default();
        cfg.engine.telemetry.sample_interval_ticks = 10;
        cfg.engine.monitor.interval_ticks = 30;
        cfg.engine.analyzer.interval_ticks = 120;
        let world = SharedWorld::new(DuelWorld::new(1, cfg.engine.tick_rate_hz));
        let mut engine = ArbiterEngine::new(cfg.engine);
        let tree = engine.add_tree("duelist", sim::build_duelist).unwrap();
        engine.attach_actuator(shared(DuelActuator::new("test", world.clone())));
        for _ in 0..600 {
            step(&mut engine, &world).unwrap();
        }
        assert_eq!(engine.now(), 600);
        assert_eq!(engine.telemetry().series(tree).map(|s| s.len()), Some(60));
        let summary = render_summary(&engine, tree, &world).unwrap();
        assert!(summary.contains("duelist"));
        assert!(summary.contains("attack"));
    }
}
