use std::sync::Arc;
use std::time::Duration;
use xeno_feedback::{FeedbackConfig, FeedbackError, FeedbackStore, StrategyAdapter};
use xeno_transport::CommunicationOutcome;
use xeno_wire::{ManualTimeProvider, TimeProvider};

fn adapter() -> (StrategyAdapter, Arc<ManualTimeProvider>) {
    let clock = Arc::new(ManualTimeProvider::starting_now());
    let store = Arc::new(FeedbackStore::new(
        FeedbackConfig::default(),
        Arc::clone(&clock) as Arc<dyn TimeProvider>,
    ));
    (
        StrategyAdapter::new(store, Arc::clone(&clock) as Arc<dyn TimeProvider>),
        clock,
    )
}

fn outcome(success: bool, latency_ms: u64, clock: &ManualTimeProvider) -> CommunicationOutcome {
    CommunicationOutcome {
        success,
        latency: Duration::from_millis(latency_ms),
        bytes_transferred: 1000,
        retry_count: 0,
        error_count: u32::from(!success),
        error_type: None,
        timestamp: clock.now_system(),
    }
}

#[test]
fn test_results_without_active_test_fail() {
    let (adapter, _clock) = adapter();
    assert!(matches!(
        adapter.ab_test_results(),
        Err(FeedbackError::NoActiveTest)
    ));
    let clock = ManualTimeProvider::starting_now();
    assert!(matches!(
        adapter.record_ab_outcome("A", outcome(true, 10, &clock)),
        Err(FeedbackError::NoActiveTest)
    ));
}

#[test]
fn test_unknown_strategy_is_rejected() {
    let (adapter, clock) = adapter();
    adapter
        .start_ab_test("A", "B", Duration::from_secs(60))
        .unwrap();
    assert!(matches!(
        adapter.record_ab_outcome("C", outcome(true, 10, &clock)),
        Err(FeedbackError::UnknownStrategy(_))
    ));
}

#[test]
fn test_clear_winner_by_success_rate() {
    // Strategy A: 200 outcomes, 95% success, 80 ms mean latency.
    // Strategy B: 200 outcomes, 80% success, 120 ms mean latency.
    let (adapter, clock) = adapter();
    adapter
        .start_ab_test("A", "B", Duration::from_secs(60))
        .unwrap();

    for i in 0..200 {
        adapter
            .record_ab_outcome("A", outcome(i % 20 != 0, 80, &clock))
            .unwrap();
        adapter
            .record_ab_outcome("B", outcome(i % 5 != 0, 120, &clock))
            .unwrap();
    }

    let results = adapter.ab_test_results().unwrap();
    assert_eq!(results.samples_a, 200);
    assert_eq!(results.samples_b, 200);
    assert!((results.success_rate_diff - 0.15).abs() < 1e-9);
    assert!((results.latency_diff_ms + 40.0).abs() < 1e-9);
    assert!(results.is_significant);
    assert_eq!(results.recommended, "A");
    assert!(
        results.explanation.contains("better success rate"),
        "explanation was: {}",
        results.explanation
    );
}

#[test]
fn test_latency_breaks_success_rate_ties() {
    let (adapter, clock) = adapter();
    adapter
        .start_ab_test("fast", "slow", Duration::from_secs(60))
        .unwrap();

    for _ in 0..100 {
        adapter
            .record_ab_outcome("fast", outcome(true, 30, &clock))
            .unwrap();
        adapter
            .record_ab_outcome("slow", outcome(true, 300, &clock))
            .unwrap();
    }

    let results = adapter.ab_test_results().unwrap();
    assert!(results.is_significant);
    assert_eq!(results.recommended, "fast");
    assert!(results.explanation.contains("lower mean latency"));
}

#[test]
fn test_insignificant_difference_defaults_to_a() {
    let (adapter, clock) = adapter();
    adapter
        .start_ab_test("A", "B", Duration::from_secs(60))
        .unwrap();

    // Nearly identical arms with few samples: nothing clears the
    // 2·sqrt(1/nA + 1/nB) bar.
    for i in 0..10 {
        adapter
            .record_ab_outcome("A", outcome(i % 5 != 0, 100, &clock))
            .unwrap();
        adapter
            .record_ab_outcome("B", outcome(i % 10 != 0, 101, &clock))
            .unwrap();
    }

    let results = adapter.ab_test_results().unwrap();
    assert!(!results.is_significant);
    assert_eq!(results.recommended, "A");
    assert!(results.explanation.contains("no significant difference"));
}

#[test]
fn test_one_empty_arm_defaults_to_a() {
    let (adapter, clock) = adapter();
    adapter
        .start_ab_test("A", "B", Duration::from_secs(60))
        .unwrap();
    adapter
        .record_ab_outcome("A", outcome(true, 10, &clock))
        .unwrap();

    let results = adapter.ab_test_results().unwrap();
    assert!(!results.is_significant);
    assert_eq!(results.recommended, "A");
}

#[test]
fn test_end_of_window_is_reported() {
    let (adapter, clock) = adapter();
    adapter
        .start_ab_test("A", "B", Duration::from_secs(60))
        .unwrap();
    adapter
        .record_ab_outcome("A", outcome(true, 10, &clock))
        .unwrap();
    adapter
        .record_ab_outcome("B", outcome(true, 12, &clock))
        .unwrap();

    assert!(!adapter.ab_test_results().unwrap().ended);
    clock.advance(Duration::from_secs(61));
    assert!(adapter.ab_test_results().unwrap().ended);
}
