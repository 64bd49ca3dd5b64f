use crate::abtest::{AbTest, AbTestResult};
use crate::analysis::DetailedMetrics;
use crate::error::FeedbackError;
use crate::store::FeedbackStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use xeno_transport::{CommunicationOutcome, ConfigSink, ErrorCorrectionMode, TransmissionConfig};
use xeno_wire::TimeProvider;

/// Fragment-size bounds the adapter may move within.
const MIN_ADAPTED_FRAGMENT: u32 = 512;
const MAX_ADAPTED_FRAGMENT: u32 = 16384;
/// Maximum single-step reductions and raises, scaled by sensitivity.
const FRAGMENT_SHRINK_LIMIT: f64 = 0.20;
const RETRY_TIMEOUT_RAISE_LIMIT: f64 = 0.10;
const WINDOW_SHRINK_LIMIT: f64 = 0.15;
const CONGESTION_RAISE_LIMIT: f64 = 0.10;

/// Performance thresholds gating strategy adaptation.
#[derive(Debug, Clone)]
pub struct AdaptationThresholds {
    pub min_success_rate: f64,
    pub max_latency: Duration,
    pub min_throughput_bps: f64,
    pub max_error_rate: f64,
    pub min_samples: u32,
    pub evaluation_window: Duration,
}

impl Default for AdaptationThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 0.95,
            max_latency: Duration::from_millis(200),
            min_throughput_bps: 1024.0,
            max_error_rate: 0.05,
            min_samples: 100,
            evaluation_window: Duration::from_secs(300),
        }
    }
}

type AdaptListener = Box<dyn Fn(&TransmissionConfig, &str) + Send + Sync>;

/// Maps observed metrics to transmission-configuration changes and runs
/// A/B tests between named strategies.
///
/// Reads the feedback store through snapshots and pushes configurations
/// through a [`ConfigSink`]; it holds neither the store nor the manager
/// as a parent.
pub struct StrategyAdapter {
    store: Arc<FeedbackStore>,
    thresholds: Mutex<AdaptationThresholds>,
    latency_sensitivity: Mutex<f64>,
    listener: Mutex<Option<AdaptListener>>,
    ab_test: Mutex<Option<AbTest>>,
    time: Arc<dyn TimeProvider>,
}

impl StrategyAdapter {
    pub fn new(store: Arc<FeedbackStore>, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            thresholds: Mutex::new(AdaptationThresholds::default()),
            latency_sensitivity: Mutex::new(1.0),
            listener: Mutex::new(None),
            ab_test: Mutex::new(None),
            time,
        }
    }

    pub fn thresholds(&self) -> AdaptationThresholds {
        self.thresholds.lock().unwrap().clone()
    }

    pub fn set_thresholds(&self, thresholds: AdaptationThresholds) {
        *self.thresholds.lock().unwrap() = thresholds;
    }

    /// Scales how aggressively latency pressure shrinks fragments,
    /// clamped to [0, 1].
    pub fn set_latency_sensitivity(&self, sensitivity: f64) {
        *self.latency_sensitivity.lock().unwrap() = sensitivity.clamp(0.0, 1.0);
    }

    pub fn set_listener(&self, listener: Option<AdaptListener>) {
        *self.listener.lock().unwrap() = listener;
    }

    /// Whether the observed metrics warrant a configuration change.
    pub fn should_adapt(&self, metrics: &DetailedMetrics) -> bool {
        let thresholds = self.thresholds();
        if metrics.summary.total_transactions < thresholds.min_samples {
            return false;
        }
        metrics.summary.success_rate < thresholds.min_success_rate
            || metrics.summary.average_latency > thresholds.max_latency
            || metrics.summary.throughput_bps < thresholds.min_throughput_bps
            || metrics.summary.error_rate > thresholds.max_error_rate
    }

    /// Computes the configuration the metrics call for, with one
    /// explanation per change. Returns the current config unchanged when
    /// nothing triggers.
    pub fn optimal_config(
        &self,
        metrics: &DetailedMetrics,
        current: &TransmissionConfig,
    ) -> (TransmissionConfig, Vec<String>) {
        let thresholds = self.thresholds();
        let sensitivity = *self.latency_sensitivity.lock().unwrap();
        let mut config = current.clone();
        let mut reasons = Vec::new();

        if metrics.summary.error_rate > thresholds.max_error_rate {
            match config.error_correction {
                ErrorCorrectionMode::None => {
                    config.error_correction = ErrorCorrectionMode::ChecksumOnly;
                    reasons.push(format!(
                        "error rate {:.1}% above {:.1}%: enabling CRC32 detection",
                        metrics.summary.error_rate * 100.0,
                        thresholds.max_error_rate * 100.0
                    ));
                }
                ErrorCorrectionMode::ChecksumOnly => {
                    config.error_correction = ErrorCorrectionMode::ReedSolomon;
                    reasons.push(format!(
                        "error rate {:.1}% above {:.1}%: escalating to Reed-Solomon correction",
                        metrics.summary.error_rate * 100.0,
                        thresholds.max_error_rate * 100.0
                    ));
                }
                ErrorCorrectionMode::ReedSolomon => {
                    if !config.reed_solomon.interleave {
                        config.reed_solomon.interleave = true;
                        reasons.push(
                            "error rate still high under Reed-Solomon: enabling interleaving"
                                .to_string(),
                        );
                    }
                }
            }
        }

        let latency_rising = metrics
            .latency_trend
            .as_ref()
            .is_some_and(|trend| trend.trend_slope > 0.0);
        if latency_rising && metrics.summary.average_latency > thresholds.max_latency {
            let shrink = 1.0 - FRAGMENT_SHRINK_LIMIT * sensitivity;
            let shrunk = ((current.fragment.max_fragment_size as f64 * shrink) as u32)
                .clamp(MIN_ADAPTED_FRAGMENT, MAX_ADAPTED_FRAGMENT);
            if shrunk != config.fragment.max_fragment_size {
                config.fragment.max_fragment_size = shrunk;
                reasons.push(format!(
                    "latency rising with mean {:?}: shrinking fragments to {shrunk} bytes",
                    metrics.summary.average_latency
                ));
            }
            let raised = current
                .retransmission
                .retry_timeout
                .mul_f64(1.0 + RETRY_TIMEOUT_RAISE_LIMIT * sensitivity);
            if raised != config.retransmission.retry_timeout {
                config.retransmission.retry_timeout = raised;
                reasons.push(format!(
                    "latency rising: raising retry timeout to {raised:?}"
                ));
            }
        }

        let throughput_falling = metrics
            .throughput_trend
            .as_ref()
            .is_some_and(|trend| trend.trend_slope < 0.0);
        if throughput_falling && metrics.summary.throughput_bps < thresholds.min_throughput_bps {
            let shrunk_window = ((current.flow.initial_window_size as f64
                * (1.0 - WINDOW_SHRINK_LIMIT)) as u32)
                .max(current.flow.min_window_size);
            if shrunk_window != config.flow.initial_window_size {
                config.flow.initial_window_size = shrunk_window;
                reasons.push(format!(
                    "throughput degrading at {:.0} B/s: shrinking initial window to {shrunk_window}",
                    metrics.summary.throughput_bps
                ));
            }
            let raised_threshold = ((current.flow.congestion_threshold as f64
                * (1.0 + CONGESTION_RAISE_LIMIT)) as u32)
                .max(current.flow.congestion_threshold + 1);
            if raised_threshold != config.flow.congestion_threshold {
                config.flow.congestion_threshold = raised_threshold;
                reasons.push(format!(
                    "throughput degrading: raising congestion threshold to {raised_threshold}%"
                ));
            }
        }

        (config, reasons)
    }

    /// One adaptation pass: read metrics, compute a candidate, and if it
    /// differs from the current configuration, push it to the sink and
    /// notify the listener.
    pub fn tick(
        &self,
        current: &TransmissionConfig,
        sink: &dyn ConfigSink,
    ) -> Result<Option<TransmissionConfig>, FeedbackError> {
        let metrics = self.store.detailed_metrics()?;
        if !self.should_adapt(&metrics) {
            return Ok(None);
        }
        let (candidate, reasons) = self.optimal_config(&metrics, current);
        if &candidate == current || reasons.is_empty() {
            return Ok(None);
        }
        let explanation = reasons.join("; ");
        tracing::info!("strategy adaptation: {explanation}");
        sink.apply_config(candidate.clone());
        if let Some(listener) = self.listener.lock().unwrap().as_ref() {
            listener(&candidate, &explanation);
        }
        Ok(Some(candidate))
    }

    /// Human-readable observations about the current window.
    pub fn insights(&self, metrics: &DetailedMetrics) -> Vec<String> {
        let thresholds = self.thresholds();
        let mut insights = Vec::new();
        if metrics.summary.success_rate < thresholds.min_success_rate {
            insights.push(format!(
                "success rate {:.1}% below the {:.1}% target",
                metrics.summary.success_rate * 100.0,
                thresholds.min_success_rate * 100.0
            ));
        }
        if let Some(trend) = &metrics.latency_trend {
            if trend.trend_slope > 0.0 {
                insights.push(format!(
                    "latency trending upward ({:.3} ms per transaction)",
                    trend.trend_slope
                ));
            } else if !trend.is_stationary {
                insights.push("latency trending downward".to_string());
            }
        }
        if let Some((error_type, count)) = metrics
            .error_type_frequency
            .iter()
            .max_by_key(|(_, count)| **count)
        {
            insights.push(format!(
                "dominant error type: {error_type} ({count} occurrences)"
            ));
        }
        if let Some(retry_stats) = &metrics.retry_stats {
            if retry_stats.mean > 1.0 {
                insights.push(format!(
                    "retry pressure high (mean {:.1} retries per transaction)",
                    retry_stats.mean
                ));
            }
        }
        insights
    }

    // A/B testing

    /// Starts a time-bounded comparison between two named strategies.
    pub fn start_ab_test(
        &self,
        strategy_a: &str,
        strategy_b: &str,
        duration: Duration,
    ) -> Result<(), FeedbackError> {
        let mut active = self.ab_test.lock().unwrap();
        *active = Some(AbTest::new(
            strategy_a,
            strategy_b,
            self.time.now_system(),
            duration,
        ));
        tracing::info!("A/B test started: {strategy_a} vs {strategy_b} for {duration:?}");
        Ok(())
    }

    /// Routes an outcome to one arm of the active test.
    pub fn record_ab_outcome(
        &self,
        strategy: &str,
        outcome: CommunicationOutcome,
    ) -> Result<(), FeedbackError> {
        let mut active = self.ab_test.lock().unwrap();
        let test = active.as_mut().ok_or(FeedbackError::NoActiveTest)?;
        test.record(strategy, outcome)
    }

    pub fn ab_test_results(&self) -> Result<AbTestResult, FeedbackError> {
        let active = self.ab_test.lock().unwrap();
        let test = active.as_ref().ok_or(FeedbackError::NoActiveTest)?;
        Ok(test.results(self.time.now_system()))
    }
}
