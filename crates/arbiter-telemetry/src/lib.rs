//! `arbiter-telemetry` – execution counters, performance series and
//! bottleneck ranking.
//!
//! The engine feeds every [`TreeTickReport`][arbiter_nodes::TreeTickReport]
//! into [`TelemetryAggregator::record_tick`] and periodically closes an
//! interval with [`TelemetryAggregator::capture`], producing one
//! [`PerformancePoint`] per tree.  The monitor, analyzer and optimizer all
//! read from the resulting series.

pub mod aggregator;
pub mod correlation;
pub mod series;
pub mod stats;

pub use aggregator::{
    Bottleneck, BottleneckKind, NodePriority, TelemetryAggregator, TelemetryConfig, TreeSummary,
};
pub use correlation::{ParameterCorrelation, pearson};
pub use series::{FrameSample, PerformancePoint, PerformanceSeries};
pub use stats::{BranchHistogram, NodeStats, OnlineStats, TreeStats};
