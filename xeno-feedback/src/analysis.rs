use crate::store::MetricsSummary;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Slope magnitude below which a series counts as stationary.
const STATIONARY_SLOPE: f64 = 0.1;

/// Distribution statistics over a set of samples. Percentiles use the
/// sorted-index rule `floor(n · q)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl DistributionStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let percentile = |q: f64| {
            let index = ((n as f64 * q).floor() as usize).min(n - 1);
            sorted[index]
        };
        Some(Self {
            min: sorted[0],
            max: sorted[n - 1],
            mean,
            median,
            std_dev: variance.sqrt(),
            p90: percentile(0.90),
            p95: percentile(0.95),
            p99: percentile(0.99),
        })
    }
}

/// Trend analysis over an evenly-indexed series: least-squares slope,
/// lag-1 autocorrelation, stationarity, and a linear forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesAnalysis {
    pub trend_slope: f64,
    pub autocorrelation: f64,
    pub is_stationary: bool,
    pub forecast: Vec<f64>,
}

impl TimeSeriesAnalysis {
    pub fn analyze(values: &[f64], forecast_horizon: usize) -> Option<Self> {
        if values.len() < 2 {
            return None;
        }
        let n = values.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = values.iter().sum::<f64>() / n;

        let mut covariance = 0.0;
        let mut variance_x = 0.0;
        for (i, value) in values.iter().enumerate() {
            let dx = i as f64 - mean_x;
            covariance += dx * (value - mean_y);
            variance_x += dx * dx;
        }
        let trend_slope = if variance_x == 0.0 {
            0.0
        } else {
            covariance / variance_x
        };

        let variance_y: f64 = values.iter().map(|v| (v - mean_y).powi(2)).sum();
        let autocorrelation = if variance_y == 0.0 {
            0.0
        } else {
            let lagged: f64 = values
                .windows(2)
                .map(|pair| (pair[0] - mean_y) * (pair[1] - mean_y))
                .sum();
            lagged / variance_y
        };

        let last = *values.last().expect("non-empty checked above");
        let forecast = (1..=forecast_horizon)
            .map(|step| last + trend_slope * step as f64)
            .collect();

        Some(Self {
            trend_slope,
            autocorrelation,
            is_stationary: trend_slope.abs() < STATIONARY_SLOPE,
            forecast,
        })
    }
}

/// Full analytical view over the current metrics window.
#[derive(Debug, Clone)]
pub struct DetailedMetrics {
    pub summary: MetricsSummary,
    pub latency_stats: Option<DistributionStats>,
    pub throughput_stats: Option<DistributionStats>,
    pub peak_throughput: f64,
    pub sustained_throughput: f64,
    pub error_type_frequency: BTreeMap<String, u32>,
    pub retry_stats: Option<DistributionStats>,
    pub latency_trend: Option<TimeSeriesAnalysis>,
    pub throughput_trend: Option<TimeSeriesAnalysis>,
    pub error_rate_trend: Option<TimeSeriesAnalysis>,
    pub generated_at: SystemTime,
}
