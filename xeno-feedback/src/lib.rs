//! # Xeno Feedback
//!
//! The observation loop of the XenoComm stack: a time-windowed store of
//! communication outcomes with distribution and time-series analytics,
//! binary persistence with backup rotation, and a strategy adapter that
//! turns observed metrics into transmission-configuration changes and
//! A/B-test verdicts.

pub mod abtest;
pub mod analysis;
pub mod error;
pub mod persist;
pub mod store;
pub mod strategy;

pub use abtest::{AbTest, AbTestResult};
pub use analysis::{DetailedMetrics, DistributionStats, TimeSeriesAnalysis};
pub use error::FeedbackError;
pub use store::{FeedbackConfig, FeedbackStore, MetricsSummary, PersistenceConfig};
pub use strategy::{AdaptationThresholds, StrategyAdapter};
