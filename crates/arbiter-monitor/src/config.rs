//! Monitor thresholds and cadence.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Ticks between monitor cycles.
    pub interval_ticks: u64,
    /// Snapshots kept in the rolling history.
    pub history_capacity: usize,
    pub min_fps: f64,
    pub max_exec_time_ms: f64,
    pub max_memory_mb: f64,
    pub max_failure_rate: f64,
    /// Snapshots inspected for trend alerts.
    pub trend_window: usize,
    /// Relative FPS decline / memory growth that raises a trend alert.
    pub trend_threshold: f64,
    /// Fraction past the threshold a metric must recover before its alert
    /// resolves.
    pub recovery_margin: f64,
    /// Seconds a resolved alert is kept before being purged.
    pub purge_after_secs: f64,
    pub auto_optimize: bool,
    /// Composite score at which an optimization run is requested.
    pub optimization_threshold: f64,
    /// Minimum seconds between two requests for the same tree.
    pub optimization_cooldown_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ticks: 60,
            history_capacity: 300,
            min_fps: 30.0,
            max_exec_time_ms: 5.0,
            max_memory_mb: 500.0,
            max_failure_rate: 0.3,
            trend_window: 10,
            trend_threshold: 0.10,
            recovery_margin: 0.10,
            purge_after_secs: 60.0,
            auto_optimize: true,
            optimization_threshold: 0.5,
            optimization_cooldown_secs: 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: MonitorConfig = serde_json::from_str(r#"{ "min_fps": 45.0 }"#).unwrap();
        assert_eq!(cfg.min_fps, 45.0);
        assert_eq!(cfg.interval_ticks, 60);
        assert_eq!(cfg.trend_window, 10);
    }
}
