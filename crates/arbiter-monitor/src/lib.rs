//! `arbiter-monitor` – runtime performance monitor.
//!
//! Frames are fed every tick through [`PerformanceMonitor::record_frame`];
//! every `interval_ticks` the engine calls [`PerformanceMonitor::run_cycle`]
//! which snapshots the system, raises and resolves deduplicated alerts,
//! checks trends and decides which trees need optimization.
//!
//! ```
//! use arbiter_monitor::{MonitorConfig, PerformanceMonitor};
//! use arbiter_telemetry::{FrameSample, TelemetryAggregator};
//!
//! let telemetry = TelemetryAggregator::default();
//! let mut monitor = PerformanceMonitor::new(MonitorConfig::default(), 60.0);
//! monitor.record_frame(&FrameSample::new(12.0, 100.0));
//! let report = monitor.run_cycle(60, &telemetry);
//! assert_eq!(report.raised.len(), 1);
//! ```

pub mod alerts;
pub mod config;
pub mod monitor;
pub mod trend;

pub use alerts::AlertBook;
pub use config::MonitorConfig;
pub use monitor::{
    MonitorCycleReport, OptimizationRequest, OptimizationScore, PerformanceMonitor, SYSTEM_SOURCE,
};
pub use trend::{FrameSampler, PerformanceSnapshot, TrendAnalysis, TrendDirection};
