//! `arbiter-analysis` – statistical analysis of behavior-tree performance.
//!
//! | Module | Contents |
//! |---|---|
//! | [`metric`] | Analysed metrics and their polarity |
//! | [`descriptive`] | Moments, quantiles, mode, confidence intervals, moving average |
//! | [`distribution`] | Shape classification, Jarque–Bera, histogram, IQR outliers, seasonality |
//! | [`correlation`] | Pairwise metric correlation matrix |
//! | [`trend`] | Least-squares trend line |
//! | [`regression`] | Pooled two-sample t-test and half-split regression checks |
//! | [`recommend`] | Ranked rule-based recommendations |
//! | [`analyzer`] | [`StatisticalAnalyzer`] cycle and [`AnalysisReport`] |
//!
//! ```
//! use arbiter_analysis::distribution::{OutlierReport, OutlierSide};
//!
//! let report = OutlierReport::iqr(&[0.80, 0.82, 0.79, 0.81, 0.05]);
//! assert_eq!(report.outliers[0].side, OutlierSide::Low);
//! ```

pub mod analyzer;
pub mod correlation;
pub mod descriptive;
pub mod distribution;
pub mod metric;
pub mod recommend;
pub mod regression;
pub mod trend;

pub use analyzer::{AnalysisReport, AnalyzerConfig, MetricAnalysis, StatisticalAnalyzer, analyze_points};
pub use correlation::CorrelationMatrix;
pub use descriptive::{ConfidenceInterval, ConfidenceLevel, DescriptiveStats};
pub use metric::{Metric, Polarity};
pub use recommend::{EffortTier, Recommendation, RecommendationConfig, RecommendationKind};
pub use regression::{RegressionCheck, RegressionConfig, TTestResult, two_sample_t_test};
pub use trend::TrendLine;
