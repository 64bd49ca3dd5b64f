use crate::error::FeedbackError;
use std::time::{Duration, SystemTime};
use xeno_transport::CommunicationOutcome;

/// Verdict of an A/B comparison.
#[derive(Debug, Clone)]
pub struct AbTestResult {
    pub strategy_a: String,
    pub strategy_b: String,
    /// A minus B, positive when A succeeds more often.
    pub success_rate_diff: f64,
    /// A minus B in milliseconds, negative when A is faster.
    pub latency_diff_ms: f64,
    pub throughput_diff_bps: f64,
    pub error_rate_diff: f64,
    pub samples_a: usize,
    pub samples_b: usize,
    pub is_significant: bool,
    pub ended: bool,
    pub recommended: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct ArmSummary {
    success_rate: f64,
    mean_latency_ms: f64,
    mean_throughput_bps: f64,
    error_rate: f64,
}

fn summarize(outcomes: &[CommunicationOutcome]) -> ArmSummary {
    if outcomes.is_empty() {
        return ArmSummary::default();
    }
    let n = outcomes.len() as f64;
    let successes = outcomes.iter().filter(|o| o.success).count() as f64;
    let latency_ms = outcomes
        .iter()
        .map(|o| o.latency.as_secs_f64() * 1000.0)
        .sum::<f64>()
        / n;
    let throughput = outcomes
        .iter()
        .map(|o| {
            let secs = o.latency.as_secs_f64();
            if secs > 0.0 {
                o.bytes_transferred as f64 / secs
            } else {
                o.bytes_transferred as f64
            }
        })
        .sum::<f64>()
        / n;
    ArmSummary {
        success_rate: successes / n,
        mean_latency_ms: latency_ms,
        mean_throughput_bps: throughput,
        error_rate: (n - successes) / n,
    }
}

/// A time-bounded comparison of two named strategies over routed
/// outcomes.
#[derive(Debug)]
pub struct AbTest {
    pub strategy_a: String,
    pub strategy_b: String,
    pub started: SystemTime,
    pub duration: Duration,
    outcomes_a: Vec<CommunicationOutcome>,
    outcomes_b: Vec<CommunicationOutcome>,
}

impl AbTest {
    pub fn new(
        strategy_a: &str,
        strategy_b: &str,
        started: SystemTime,
        duration: Duration,
    ) -> Self {
        Self {
            strategy_a: strategy_a.to_string(),
            strategy_b: strategy_b.to_string(),
            started,
            duration,
            outcomes_a: Vec::new(),
            outcomes_b: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        strategy: &str,
        outcome: CommunicationOutcome,
    ) -> Result<(), FeedbackError> {
        if strategy == self.strategy_a {
            self.outcomes_a.push(outcome);
            Ok(())
        } else if strategy == self.strategy_b {
            self.outcomes_b.push(outcome);
            Ok(())
        } else {
            Err(FeedbackError::UnknownStrategy(strategy.to_string()))
        }
    }

    /// Two-sample comparison. A difference counts as significant when it
    /// exceeds `2 * sqrt(1/nA + 1/nB)`; latency is compared on the
    /// relative difference. Without significance the verdict defaults
    /// to A.
    pub fn results(&self, now: SystemTime) -> AbTestResult {
        let a = summarize(&self.outcomes_a);
        let b = summarize(&self.outcomes_b);
        let samples_a = self.outcomes_a.len();
        let samples_b = self.outcomes_b.len();

        let success_rate_diff = a.success_rate - b.success_rate;
        let latency_diff_ms = a.mean_latency_ms - b.mean_latency_ms;

        let (is_significant, recommended, explanation) = if samples_a == 0 || samples_b == 0 {
            (
                false,
                self.strategy_a.clone(),
                "insufficient samples; defaulting to A".to_string(),
            )
        } else {
            let threshold =
                2.0 * (1.0 / samples_a as f64 + 1.0 / samples_b as f64).sqrt();
            let success_significant = success_rate_diff.abs() > threshold;
            let latency_reference = a.mean_latency_ms.max(b.mean_latency_ms);
            let latency_significant = latency_reference > 0.0
                && (latency_diff_ms.abs() / latency_reference) > threshold;

            if !(success_significant || latency_significant) {
                (
                    false,
                    self.strategy_a.clone(),
                    "no significant difference; defaulting to A".to_string(),
                )
            } else if success_rate_diff != 0.0 {
                let (winner, better, worse) = if success_rate_diff > 0.0 {
                    (&self.strategy_a, a, b)
                } else {
                    (&self.strategy_b, b, a)
                };
                (
                    true,
                    winner.clone(),
                    format!(
                        "{winner} has the better success rate ({:.1}% vs {:.1}%)",
                        better.success_rate * 100.0,
                        worse.success_rate * 100.0
                    ),
                )
            } else {
                let (winner, better, worse) = if latency_diff_ms < 0.0 {
                    (&self.strategy_a, a, b)
                } else {
                    (&self.strategy_b, b, a)
                };
                (
                    true,
                    winner.clone(),
                    format!(
                        "{winner} has the lower mean latency ({:.1} ms vs {:.1} ms)",
                        better.mean_latency_ms, worse.mean_latency_ms
                    ),
                )
            }
        };

        AbTestResult {
            strategy_a: self.strategy_a.clone(),
            strategy_b: self.strategy_b.clone(),
            success_rate_diff,
            latency_diff_ms,
            throughput_diff_bps: a.mean_throughput_bps - b.mean_throughput_bps,
            error_rate_diff: a.error_rate - b.error_rate,
            samples_a,
            samples_b,
            is_significant,
            ended: now >= self.started + self.duration,
            recommended,
            explanation,
        }
    }
}
