use rand::Rng;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Hard ceiling on the exponential term: ten times the base delay.
const BACKOFF_CAP_FACTOR: u64 = 10;

/// Exponential-backoff retry schedule with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self { base, max_retries }
    }

    /// Delay before retry number `attempt` (0-based):
    /// `base · 2^attempt` capped at `10 · base`, then ±25% uniform jitter.
    pub fn delay(&self, attempt: u32, rng: &mut dyn rand::RngCore) -> Duration {
        let base_ms = self.base.as_millis().max(1) as u64;
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let capped = base_ms
            .saturating_mul(factor)
            .min(base_ms * BACKOFF_CAP_FACTOR);
        let span = capped / 4;
        let jittered = if span == 0 {
            capped
        } else {
            capped - span + rng.gen_range(0..=2 * span)
        };
        Duration::from_millis(jittered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEventKind {
    /// A retry attempt is about to be made.
    Attempt,
    /// A retried fragment was acknowledged.
    Success,
    /// An attempt failed and will be retried.
    Failure,
    /// The retry budget is exhausted.
    MaxRetriesReached,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub kind: RetryEventKind,
    pub transmission_id: u32,
    pub fragment_index: u16,
    pub attempt: u32,
    pub error: Option<String>,
    /// Attempt-to-acknowledgment latency, present on `Success`.
    pub latency: Option<Duration>,
    pub timestamp: SystemTime,
}

pub type RetryCallback = Arc<dyn Fn(&RetryEvent) + Send + Sync>;

/// Aggregated retry statistics.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub max_retries_reached: u64,
    pub avg_retry_latency: Option<Duration>,
    pub last_retry: Option<SystemTime>,
    /// attempt number -> how often a retry reached it.
    pub retry_distribution: BTreeMap<u32, u32>,
}

/// Collects retry statistics and fans events out to a listener.
pub struct RetryTracker {
    stats: Mutex<RetryStats>,
    latency_sum: Mutex<(Duration, u64)>,
    callback: Mutex<Option<RetryCallback>>,
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryTracker {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(RetryStats::default()),
            latency_sum: Mutex::new((Duration::ZERO, 0)),
            callback: Mutex::new(None),
        }
    }

    pub fn set_callback(&self, callback: Option<RetryCallback>) {
        *self.callback.lock().unwrap() = callback;
    }

    pub fn record(&self, event: RetryEvent) {
        {
            let mut stats = self.stats.lock().unwrap();
            stats.last_retry = Some(event.timestamp);
            match event.kind {
                RetryEventKind::Attempt => {
                    stats.total_retries += 1;
                    *stats.retry_distribution.entry(event.attempt).or_insert(0) += 1;
                }
                RetryEventKind::Success => {
                    stats.successful_retries += 1;
                    if let Some(latency) = event.latency {
                        let mut sum = self.latency_sum.lock().unwrap();
                        sum.0 += latency;
                        sum.1 += 1;
                        stats.avg_retry_latency = Some(sum.0 / sum.1 as u32);
                    }
                }
                RetryEventKind::Failure => stats.failed_retries += 1,
                RetryEventKind::MaxRetriesReached => stats.max_retries_reached += 1,
            }
        }

        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(&event);
        }
    }

    pub fn stats(&self) -> RetryStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        *self.stats.lock().unwrap() = RetryStats::default();
        *self.latency_sum.lock().unwrap() = (Duration::ZERO, 0);
    }
}
