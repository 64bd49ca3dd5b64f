use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bound on retained RTT samples.
const MAX_SAMPLES: usize = 100;
/// Average-to-baseline ratio below which the record size grows.
const GROW_RATIO: f64 = 1.1;
/// Average-to-baseline ratio above which the record size shrinks.
const SHRINK_RATIO: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct AdaptiveRecordConfig {
    pub enabled: bool,
    pub min_size: usize,
    pub max_size: usize,
    pub initial_size: usize,
    /// Minimum interval between adjustments; also the sample window.
    pub rtt_window: Duration,
    pub growth_factor: f64,
    pub shrink_factor: f64,
}

impl Default for AdaptiveRecordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_size: 1024,
            max_size: 16 * 1024,
            initial_size: 4 * 1024,
            rtt_window: Duration::from_secs(1),
            growth_factor: 1.25,
            shrink_factor: 0.75,
        }
    }
}

/// Chooses the next record size from the RTT trend of recent record sends:
/// a flat trend grows the record, a rising trend shrinks it.
#[derive(Debug)]
pub struct AdaptiveRecordSizer {
    config: AdaptiveRecordConfig,
    samples: VecDeque<(Instant, Duration)>,
    current: usize,
    last_adjustment: Instant,
}

impl AdaptiveRecordSizer {
    pub fn new(config: AdaptiveRecordConfig, now: Instant) -> Self {
        let current = config.initial_size.clamp(config.min_size, config.max_size);
        Self {
            config,
            samples: VecDeque::new(),
            current,
            last_adjustment: now,
        }
    }

    pub fn current_size(&self) -> usize {
        self.current
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn add_sample(&mut self, rtt: Duration, now: Instant) {
        self.samples.push_back((now, rtt));
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Re-evaluates the record size; at most once per `rtt_window`.
    /// Returns the new size when it changed.
    pub fn maybe_adjust(&mut self, now: Instant) -> Option<usize> {
        if !self.config.enabled {
            return None;
        }
        if now.duration_since(self.last_adjustment) < self.config.rtt_window {
            return None;
        }
        let cutoff = now.checked_sub(self.config.rtt_window)?;
        let windowed: Vec<Duration> = self
            .samples
            .iter()
            .filter(|(at, _)| *at >= cutoff)
            .map(|(_, rtt)| *rtt)
            .collect();
        if windowed.len() < 2 {
            return None;
        }

        let baseline = windowed.iter().min().copied().unwrap_or_default();
        if baseline.is_zero() {
            return None;
        }
        let avg_us: f64 =
            windowed.iter().map(|d| d.as_micros() as f64).sum::<f64>() / windowed.len() as f64;
        let ratio = avg_us / baseline.as_micros() as f64;

        let previous = self.current;
        if ratio < GROW_RATIO {
            self.current = ((self.current as f64 * self.config.growth_factor) as usize)
                .clamp(self.config.min_size, self.config.max_size);
        } else if ratio > SHRINK_RATIO {
            self.current = ((self.current as f64 * self.config.shrink_factor) as usize)
                .clamp(self.config.min_size, self.config.max_size);
        }
        self.last_adjustment = now;

        if self.current != previous {
            tracing::debug!(
                "adaptive record size {} -> {} (rtt ratio {:.2})",
                previous,
                self.current,
                ratio
            );
            Some(self.current)
        } else {
            None
        }
    }
}
