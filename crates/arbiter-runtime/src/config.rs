//! [`EngineConfig`] – every component's settings in one serde document.

use arbiter_analysis::AnalyzerConfig;
use arbiter_monitor::MonitorConfig;
use arbiter_optimizer::OptimizerConfig;
use arbiter_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_rate_hz: f32,
    /// Buffered events per bus topic.
    pub bus_capacity: usize,
    pub telemetry: TelemetryConfig,
    pub monitor: MonitorConfig,
    pub analyzer: AnalyzerConfig,
    pub optimizer: OptimizerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60.0,
            bus_capacity: 256,
            telemetry: TelemetryConfig::default(),
            monitor: MonitorConfig::default(),
            analyzer: AnalyzerConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{ "tick_rate_hz": 30.0, "monitor": { "auto_optimize": false } }"#,
        )
        .unwrap();
        assert_eq!(cfg.tick_rate_hz, 30.0);
        assert!(!cfg.monitor.auto_optimize);
        assert_eq!(cfg.monitor.min_fps, 30.0);
        assert_eq!(cfg.telemetry, TelemetryConfig::default());
        assert_eq!(cfg.bus_capacity, 256);
    }
}
