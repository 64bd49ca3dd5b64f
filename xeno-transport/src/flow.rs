use crate::config::FlowControlConfig;
use crate::error::TransmitError;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// RTT assumed before the first sample, for adjustment pacing.
const DEFAULT_ADJUST_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct WindowState {
    current_size: u32,
    available_credits: u32,
    in_congestion_avoidance: bool,
    rtt_samples: VecDeque<Duration>,
    smoothed_rtt: Option<Duration>,
    last_rtt: Option<Duration>,
    min_rtt: Option<Duration>,
    max_rtt: Option<Duration>,
    last_adjustment: Option<Instant>,
    config: FlowControlConfig,
    /// Additive-increase step (one maximum fragment).
    additive_step: u32,
}

/// Read-only view of the window state.
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    pub current_window_size: u32,
    pub available_credits: u32,
    pub in_congestion_avoidance: bool,
    pub last_rtt: Option<Duration>,
    pub smoothed_rtt: Option<Duration>,
    pub min_rtt: Option<Duration>,
    pub max_rtt: Option<Duration>,
    pub sample_count: usize,
}

/// Sliding-window flow controller with AIMD congestion response.
///
/// Credits are acquired before a fragment is admitted to the link and
/// released when its acknowledgment arrives. RTT samples feed an EMA and
/// a windowed-minimum congestion detector.
pub struct FlowController {
    state: Mutex<WindowState>,
    credits_available: Condvar,
}

impl FlowController {
    pub fn new(config: FlowControlConfig, additive_step: u32) -> Self {
        let state = WindowState {
            current_size: config.initial_window_size,
            available_credits: config.initial_window_size,
            in_congestion_avoidance: false,
            rtt_samples: VecDeque::new(),
            smoothed_rtt: None,
            last_rtt: None,
            min_rtt: None,
            max_rtt: None,
            last_adjustment: None,
            config,
            additive_step,
        };
        Self {
            state: Mutex::new(state),
            credits_available: Condvar::new(),
        }
    }

    /// Applies a new configuration, clamping the live window into the new
    /// bounds while preserving RTT history.
    pub fn reconfigure(&self, config: FlowControlConfig, additive_step: u32) {
        let mut state = self.state.lock().unwrap();
        let old_size = state.current_size;
        state.current_size = old_size.clamp(config.min_window_size, config.max_window_size);
        if state.current_size > old_size {
            state.available_credits += state.current_size - old_size;
        }
        state.available_credits = state.available_credits.min(state.current_size);
        state.config = config;
        state.additive_step = additive_step;
        drop(state);
        self.credits_available.notify_all();
    }

    /// Blocks until `bytes` of window credit are available, or the
    /// deadline passes.
    pub fn acquire(&self, bytes: u32, timeout: Duration) -> Result<(), TransmitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        while state.available_credits < bytes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransmitError::WindowTimeout(timeout));
            }
            let (guard, _) = self
                .credits_available
                .wait_timeout(state, remaining)
                .unwrap();
            state = guard;
        }
        state.available_credits -= bytes;
        Ok(())
    }

    /// Returns credits, clamped so they never exceed the current window.
    pub fn release(&self, bytes: u32) {
        let mut state = self.state.lock().unwrap();
        state.available_credits = (state.available_credits + bytes).min(state.current_size);
        drop(state);
        self.credits_available.notify_all();
    }

    /// Feeds an RTT sample from an acknowledged fragment, updating the
    /// estimator and possibly the window.
    pub fn on_ack(&self, rtt: Duration) {
        let mut state = self.state.lock().unwrap();
        let alpha = 1.0 / state.config.rtt_smoothing_factor as f64;
        state.smoothed_rtt = Some(match state.smoothed_rtt {
            Some(prev) => prev.mul_f64(1.0 - alpha) + rtt.mul_f64(alpha),
            None => rtt,
        });
        state.last_rtt = Some(rtt);
        state.min_rtt = Some(state.min_rtt.map_or(rtt, |m| m.min(rtt)));
        state.max_rtt = Some(state.max_rtt.map_or(rtt, |m| m.max(rtt)));

        state.rtt_samples.push_back(rtt);
        let cap = state.config.min_rtt_samples + 1;
        while state.rtt_samples.len() > cap {
            state.rtt_samples.pop_front();
        }

        let congested = Self::congestion_detected(&state);
        Self::maybe_adjust(&mut state, congested);
        drop(state);
        self.credits_available.notify_all();
    }

    /// Signals fragment loss (NACK or acknowledgment timeout).
    pub fn on_loss(&self) {
        let mut state = self.state.lock().unwrap();
        Self::maybe_adjust(&mut state, true);
        drop(state);
        self.credits_available.notify_all();
    }

    fn congestion_detected(state: &WindowState) -> bool {
        if state.rtt_samples.len() < state.config.min_rtt_samples {
            return false;
        }
        let newest = match state.rtt_samples.back() {
            Some(d) => *d,
            None => return false,
        };
        let floor = match state.rtt_samples.iter().min() {
            Some(d) => *d,
            None => return false,
        };
        let threshold = floor.mul_f64(1.0 + state.config.congestion_threshold as f64 / 100.0);
        newest > threshold
    }

    /// Window adjustment, rate-limited to once per smoothed RTT.
    fn maybe_adjust(state: &mut WindowState, shrink: bool) {
        let interval = state.smoothed_rtt.unwrap_or(DEFAULT_ADJUST_INTERVAL);
        let now = Instant::now();
        if let Some(last) = state.last_adjustment {
            if now.duration_since(last) < interval {
                return;
            }
        }
        let old = state.current_size;
        let new = if shrink {
            (old / state.config.backoff_multiplier).max(state.config.min_window_size)
        } else if state.in_congestion_avoidance {
            old.saturating_add(state.additive_step)
                .min(state.config.max_window_size)
        } else {
            old.saturating_mul(state.config.recovery_multiplier)
                .min(state.config.max_window_size)
        };
        let new = new.clamp(state.config.min_window_size, state.config.max_window_size);
        if shrink {
            state.in_congestion_avoidance = true;
        }
        if new == old {
            state.last_adjustment = Some(now);
            return;
        }

        if new > old {
            state.available_credits += new - old;
        }
        state.available_credits = state.available_credits.min(new);
        state.current_size = new;
        state.last_adjustment = Some(now);
        tracing::debug!(
            "window {} -> {} ({})",
            old,
            new,
            if shrink { "backoff" } else { "growth" }
        );
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let state = self.state.lock().unwrap();
        FlowSnapshot {
            current_window_size: state.current_size,
            available_credits: state.available_credits,
            in_congestion_avoidance: state.in_congestion_avoidance,
            last_rtt: state.last_rtt,
            smoothed_rtt: state.smoothed_rtt,
            min_rtt: state.min_rtt,
            max_rtt: state.max_rtt,
            sample_count: state.rtt_samples.len(),
        }
    }
}
