use crate::analysis::{DetailedMetrics, DistributionStats, TimeSeriesAnalysis};
use crate::error::FeedbackError;
use crate::persist;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use xeno_transport::{CommunicationOutcome, OutcomeSink};
use xeno_wire::TimeProvider;

/// On-disk persistence options.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
    /// Outcomes older than this are pruned from snapshots.
    pub retention: Duration,
    pub max_storage_bytes: u64,
    pub compress: bool,
    pub backup: bool,
    pub max_backups: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./feedback_data"),
            retention: Duration::from_secs(30 * 24 * 3600),
            max_storage_bytes: 1024 * 1024 * 1024,
            compress: true,
            backup: true,
            max_backups: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    /// Age bound on retained outcomes and metric points.
    pub metrics_window: Duration,
    pub max_stored_outcomes: usize,
    pub enable_persistence: bool,
    pub enable_detailed_analysis: bool,
    /// Steps ahead to forecast in trend analysis.
    pub forecast_horizon: usize,
    /// Latency z-score beyond which an outcome is an outlier.
    pub outlier_threshold: f64,
    pub persistence: PersistenceConfig,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            metrics_window: Duration::from_secs(300),
            max_stored_outcomes: 10_000,
            enable_persistence: true,
            enable_detailed_analysis: true,
            forecast_horizon: 12,
            outlier_threshold: 3.0,
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Aggregate metrics over the current window.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub success_rate: f64,
    pub average_latency: Duration,
    pub throughput_bps: f64,
    pub error_rate: f64,
    pub total_transactions: u32,
    pub window_start: SystemTime,
    pub window_end: SystemTime,
}

pub(crate) struct StoreInner {
    pub outcomes: VecDeque<CommunicationOutcome>,
    pub metrics: BTreeMap<String, VecDeque<(SystemTime, f64)>>,
}

/// Time-windowed store of communication outcomes and named metric
/// series, with on-demand analytics and optional persistence.
///
/// Implements [`OutcomeSink`] so the transmission manager can publish
/// into it without holding it as a parent.
pub struct FeedbackStore {
    config: Mutex<FeedbackConfig>,
    inner: Mutex<StoreInner>,
    time: Arc<dyn TimeProvider>,
}

impl FeedbackStore {
    pub fn new(config: FeedbackConfig, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            config: Mutex::new(config),
            inner: Mutex::new(StoreInner {
                outcomes: VecDeque::new(),
                metrics: BTreeMap::new(),
            }),
            time,
        }
    }

    pub fn config(&self) -> FeedbackConfig {
        self.config.lock().unwrap().clone()
    }

    pub fn set_config(&self, config: FeedbackConfig) {
        *self.config.lock().unwrap() = config;
        let now = self.time.now_system();
        self.prune(now);
    }

    fn prune(&self, now: SystemTime) {
        let config = self.config();
        let horizon = now.checked_sub(config.metrics_window);
        let mut inner = self.inner.lock().unwrap();
        while inner.outcomes.len() > config.max_stored_outcomes {
            inner.outcomes.pop_front();
        }
        if let Some(horizon) = horizon {
            while inner
                .outcomes
                .front()
                .is_some_and(|outcome| outcome.timestamp < horizon)
            {
                inner.outcomes.pop_front();
            }
            for series in inner.metrics.values_mut() {
                while series.front().is_some_and(|(at, _)| *at < horizon) {
                    series.pop_front();
                }
            }
        }
        let cap = config.max_stored_outcomes;
        for series in inner.metrics.values_mut() {
            while series.len() > cap {
                series.pop_front();
            }
        }
    }

    /// Appends one outcome and prunes by count and age.
    pub fn record(&self, outcome: CommunicationOutcome) {
        self.inner.lock().unwrap().outcomes.push_back(outcome);
        self.prune(self.time.now_system());
    }

    /// Convenience wrapper mirroring the manager's outcome shape.
    pub fn add_result(
        &self,
        success: bool,
        latency: Duration,
        bytes_transferred: u32,
        retry_count: u32,
        error_count: u32,
        error_type: Option<&str>,
    ) {
        self.record(CommunicationOutcome {
            success,
            latency,
            bytes_transferred,
            retry_count,
            error_count,
            error_type: error_type.map(str::to_string),
            timestamp: self.time.now_system(),
        });
    }

    /// Appends a point to a named metric series.
    pub fn record_metric(&self, name: &str, value: f64) {
        let now = self.time.now_system();
        self.inner
            .lock()
            .unwrap()
            .metrics
            .entry(name.to_string())
            .or_default()
            .push_back((now, value));
        self.prune(now);
    }

    pub fn outcome_count(&self) -> usize {
        self.inner.lock().unwrap().outcomes.len()
    }

    pub fn recent_outcomes(&self, limit: usize) -> Vec<CommunicationOutcome> {
        let inner = self.inner.lock().unwrap();
        inner
            .outcomes
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn outcomes_in_range(
        &self,
        start: SystemTime,
        end: SystemTime,
    ) -> Vec<CommunicationOutcome> {
        let inner = self.inner.lock().unwrap();
        inner
            .outcomes
            .iter()
            .filter(|outcome| outcome.timestamp >= start && outcome.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Latest value of a named metric.
    pub fn metric_value(&self, name: &str) -> Result<f64, FeedbackError> {
        let inner = self.inner.lock().unwrap();
        inner
            .metrics
            .get(name)
            .and_then(|series| series.back())
            .map(|(_, value)| *value)
            .ok_or_else(|| FeedbackError::UnknownMetric(name.to_string()))
    }

    pub fn metric_history(
        &self,
        name: &str,
        start: SystemTime,
        end: SystemTime,
    ) -> Vec<(SystemTime, f64)> {
        let inner = self.inner.lock().unwrap();
        inner
            .metrics
            .get(name)
            .map(|series| {
                series
                    .iter()
                    .filter(|(at, _)| *at >= start && *at <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn current_metrics(&self) -> Result<MetricsSummary, FeedbackError> {
        self.prune(self.time.now_system());
        let inner = self.inner.lock().unwrap();
        Self::summarize(&inner.outcomes)
    }

    fn summarize(
        outcomes: &VecDeque<CommunicationOutcome>,
    ) -> Result<MetricsSummary, FeedbackError> {
        if outcomes.is_empty() {
            return Err(FeedbackError::NoData);
        }
        let total = outcomes.len() as u32;
        let successes = outcomes.iter().filter(|o| o.success).count() as f64;
        let total_latency: Duration = outcomes.iter().map(|o| o.latency).sum();
        let total_bytes: u64 = outcomes.iter().map(|o| o.bytes_transferred as u64).sum();
        let window_start = outcomes
            .iter()
            .map(|o| o.timestamp)
            .min()
            .expect("non-empty");
        let window_end = outcomes
            .iter()
            .map(|o| o.timestamp)
            .max()
            .expect("non-empty");
        let span_secs = window_end
            .duration_since(window_start)
            .unwrap_or_default()
            .as_secs_f64()
            .max(1.0);
        Ok(MetricsSummary {
            success_rate: successes / total as f64,
            average_latency: total_latency / total,
            throughput_bps: total_bytes as f64 / span_secs,
            error_rate: (total as f64 - successes) / total as f64,
            total_transactions: total,
            window_start,
            window_end,
        })
    }

    fn latencies_ms(outcomes: &VecDeque<CommunicationOutcome>) -> Vec<f64> {
        outcomes
            .iter()
            .map(|o| o.latency.as_secs_f64() * 1000.0)
            .collect()
    }

    fn throughputs_bps(outcomes: &VecDeque<CommunicationOutcome>) -> Vec<f64> {
        outcomes
            .iter()
            .map(|o| {
                let secs = o.latency.as_secs_f64();
                if secs > 0.0 {
                    o.bytes_transferred as f64 / secs
                } else {
                    o.bytes_transferred as f64
                }
            })
            .collect()
    }

    pub fn latency_distribution(&self) -> Result<DistributionStats, FeedbackError> {
        let inner = self.inner.lock().unwrap();
        DistributionStats::from_values(&Self::latencies_ms(&inner.outcomes))
            .ok_or(FeedbackError::NoData)
    }

    pub fn throughput_distribution(&self) -> Result<DistributionStats, FeedbackError> {
        let inner = self.inner.lock().unwrap();
        DistributionStats::from_values(&Self::throughputs_bps(&inner.outcomes))
            .ok_or(FeedbackError::NoData)
    }

    pub fn latency_trend(&self) -> Result<TimeSeriesAnalysis, FeedbackError> {
        let config = self.config();
        let inner = self.inner.lock().unwrap();
        TimeSeriesAnalysis::analyze(
            &Self::latencies_ms(&inner.outcomes),
            config.forecast_horizon,
        )
        .ok_or(FeedbackError::NoData)
    }

    pub fn error_type_distribution(&self) -> BTreeMap<String, u32> {
        let inner = self.inner.lock().unwrap();
        let mut table = BTreeMap::new();
        for outcome in &inner.outcomes {
            if let Some(error_type) = &outcome.error_type {
                *table.entry(error_type.clone()).or_insert(0) += 1;
            }
        }
        table
    }

    /// Outcomes whose latency z-score exceeds the configured threshold.
    pub fn outliers(&self) -> Vec<CommunicationOutcome> {
        let config = self.config();
        let inner = self.inner.lock().unwrap();
        let latencies = Self::latencies_ms(&inner.outcomes);
        let stats = match DistributionStats::from_values(&latencies) {
            Some(stats) if stats.std_dev > 0.0 => stats,
            _ => return Vec::new(),
        };
        inner
            .outcomes
            .iter()
            .zip(latencies.iter())
            .filter(|(_, latency)| {
                ((**latency - stats.mean) / stats.std_dev).abs() > config.outlier_threshold
            })
            .map(|(outcome, _)| outcome.clone())
            .collect()
    }

    pub fn detailed_metrics(&self) -> Result<DetailedMetrics, FeedbackError> {
        self.prune(self.time.now_system());
        let config = self.config();
        let inner = self.inner.lock().unwrap();
        let summary = Self::summarize(&inner.outcomes)?;

        let latencies = Self::latencies_ms(&inner.outcomes);
        let throughputs = Self::throughputs_bps(&inner.outcomes);
        let retries: Vec<f64> = inner
            .outcomes
            .iter()
            .map(|o| o.retry_count as f64)
            .collect();
        let error_indicator: Vec<f64> = inner
            .outcomes
            .iter()
            .map(|o| if o.success { 0.0 } else { 1.0 })
            .collect();

        let throughput_stats = DistributionStats::from_values(&throughputs);
        let peak_throughput = throughputs.iter().copied().fold(0.0, f64::max);
        let sustained_throughput = throughput_stats
            .as_ref()
            .map(|stats| stats.median)
            .unwrap_or_default();

        let mut error_type_frequency = BTreeMap::new();
        for outcome in &inner.outcomes {
            if let Some(error_type) = &outcome.error_type {
                *error_type_frequency.entry(error_type.clone()).or_insert(0) += 1;
            }
        }

        Ok(DetailedMetrics {
            summary,
            latency_stats: DistributionStats::from_values(&latencies),
            throughput_stats,
            peak_throughput,
            sustained_throughput,
            error_type_frequency,
            retry_stats: DistributionStats::from_values(&retries),
            latency_trend: TimeSeriesAnalysis::analyze(&latencies, config.forecast_horizon),
            throughput_trend: TimeSeriesAnalysis::analyze(&throughputs, config.forecast_horizon),
            error_rate_trend: TimeSeriesAnalysis::analyze(
                &error_indicator,
                config.forecast_horizon,
            ),
            generated_at: self.time.now_system(),
        })
    }

    // Persistence operations live in `persist`; these wrappers expose
    // them on the store with its locked state.

    pub fn save(&self) -> Result<(), FeedbackError> {
        let config = self.config();
        if !config.enable_persistence {
            return Err(FeedbackError::PersistenceDisabled);
        }
        let snapshot = {
            let inner = self.inner.lock().unwrap();
            persist::encode_snapshot(&inner.outcomes, &inner.metrics, self.time.now_system())
        };
        persist::write_snapshot(&config.persistence, &snapshot)
    }

    pub fn load(&self) -> Result<(), FeedbackError> {
        let config = self.config();
        if !config.enable_persistence {
            return Err(FeedbackError::PersistenceDisabled);
        }
        let (outcomes, metrics, _last_update) = persist::read_snapshot(&config.persistence)?;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.outcomes = outcomes.into();
            inner.metrics = metrics
                .into_iter()
                .map(|(name, series)| (name, series.into()))
                .collect();
        }
        self.prune(self.time.now_system());
        Ok(())
    }

    pub fn create_backup(&self) -> Result<String, FeedbackError> {
        let config = self.config();
        persist::create_backup(&config.persistence, self.time.now_system())
    }

    pub fn list_backups(&self) -> Result<Vec<String>, FeedbackError> {
        persist::list_backups(&self.config().persistence)
    }

    pub fn restore_from_backup(&self, name: &str) -> Result<(), FeedbackError> {
        let config = self.config();
        let (outcomes, metrics, _last_update) =
            persist::read_backup(&config.persistence, name)?;
        let mut inner = self.inner.lock().unwrap();
        inner.outcomes = outcomes.into();
        inner.metrics = metrics
            .into_iter()
            .map(|(name, series)| (name, series.into()))
            .collect();
        Ok(())
    }

    pub fn prune_old_backups(&self) -> Result<usize, FeedbackError> {
        persist::prune_backups(&self.config().persistence)
    }

    pub fn storage_size(&self) -> Result<u64, FeedbackError> {
        persist::storage_size(&self.config().persistence)
    }

    /// Drops in-memory outcomes older than the retention period.
    pub fn prune_retention(&self) -> usize {
        let config = self.config();
        let horizon = match self.time.now_system().checked_sub(config.persistence.retention) {
            Some(horizon) => horizon,
            None => return 0,
        };
        let mut inner = self.inner.lock().unwrap();
        let before = inner.outcomes.len();
        inner.outcomes.retain(|outcome| outcome.timestamp >= horizon);
        before - inner.outcomes.len()
    }

    pub fn oldest_data_time(&self) -> Option<SystemTime> {
        let inner = self.inner.lock().unwrap();
        inner.outcomes.front().map(|outcome| outcome.timestamp)
    }
}

impl OutcomeSink for FeedbackStore {
    fn record_outcome(&self, outcome: CommunicationOutcome) {
        self.record(outcome);
    }
}
