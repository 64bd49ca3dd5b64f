use std::sync::Arc;
use std::time::{Duration, SystemTime};
use xeno_feedback::{FeedbackConfig, FeedbackError, FeedbackStore};
use xeno_transport::{CommunicationOutcome, OutcomeSink};
use xeno_wire::{ManualTimeProvider, TimeProvider};

fn store_with_clock(config: FeedbackConfig) -> (Arc<FeedbackStore>, Arc<ManualTimeProvider>) {
    let clock = Arc::new(ManualTimeProvider::starting_now());
    let store = Arc::new(FeedbackStore::new(
        config,
        Arc::clone(&clock) as Arc<dyn TimeProvider>,
    ));
    (store, clock)
}

fn outcome(success: bool, latency_ms: u64, bytes: u32, at: SystemTime) -> CommunicationOutcome {
    CommunicationOutcome {
        success,
        latency: Duration::from_millis(latency_ms),
        bytes_transferred: bytes,
        retry_count: 0,
        error_count: u32::from(!success),
        error_type: (!success).then(|| "ack_timeout".to_string()),
        timestamp: at,
    }
}

#[test]
fn test_record_and_summarize() {
    let (store, clock) = store_with_clock(FeedbackConfig::default());
    let start = clock.now_system();
    store.record(outcome(true, 50, 1000, start));
    clock.advance(Duration::from_secs(2));
    store.record(outcome(true, 100, 3000, clock.now_system()));
    clock.advance(Duration::from_secs(2));
    store.record(outcome(false, 150, 0, clock.now_system()));

    let summary = store.current_metrics().unwrap();
    assert_eq!(summary.total_transactions, 3);
    assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert!((summary.error_rate - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(summary.average_latency, Duration::from_millis(100));
    // 4000 bytes over a 4 second span.
    assert!((summary.throughput_bps - 1000.0).abs() < 1e-6);
    assert_eq!(summary.window_start, start);
}

#[test]
fn test_empty_store_has_no_data() {
    let (store, _clock) = store_with_clock(FeedbackConfig::default());
    assert!(matches!(
        store.current_metrics(),
        Err(FeedbackError::NoData)
    ));
}

#[test]
fn test_count_bound_is_enforced() {
    let config = FeedbackConfig {
        max_stored_outcomes: 5,
        ..FeedbackConfig::default()
    };
    let (store, clock) = store_with_clock(config);
    for i in 0..10 {
        store.record(outcome(true, 10 + i, 100, clock.now_system()));
    }
    assert_eq!(store.outcome_count(), 5);
    // Newest outcomes survive.
    let recent = store.recent_outcomes(5);
    assert_eq!(recent[0].latency, Duration::from_millis(19));
}

#[test]
fn test_age_bound_is_enforced() {
    let config = FeedbackConfig {
        metrics_window: Duration::from_secs(60),
        ..FeedbackConfig::default()
    };
    let (store, clock) = store_with_clock(config);
    store.record(outcome(true, 10, 100, clock.now_system()));
    clock.advance(Duration::from_secs(90));
    store.record(outcome(true, 20, 100, clock.now_system()));

    assert_eq!(store.outcome_count(), 1);
    assert_eq!(
        store.recent_outcomes(10)[0].latency,
        Duration::from_millis(20)
    );
}

#[test]
fn test_outcome_sink_feeds_the_store() {
    let (store, clock) = store_with_clock(FeedbackConfig::default());
    let sink: Arc<dyn OutcomeSink> = Arc::clone(&store) as Arc<dyn OutcomeSink>;
    sink.record_outcome(outcome(true, 5, 64, clock.now_system()));
    assert_eq!(store.outcome_count(), 1);
}

#[test]
fn test_metric_series_record_and_query() {
    let (store, clock) = store_with_clock(FeedbackConfig::default());
    let start = clock.now_system();
    store.record_metric("rtt_ms", 12.0);
    clock.advance(Duration::from_secs(1));
    store.record_metric("rtt_ms", 14.0);

    assert_eq!(store.metric_value("rtt_ms").unwrap(), 14.0);
    assert!(matches!(
        store.metric_value("missing"),
        Err(FeedbackError::UnknownMetric(_))
    ));

    let history = store.metric_history("rtt_ms", start, clock.now_system());
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].1, 12.0);
}

#[test]
fn test_outcomes_in_range() {
    let (store, clock) = store_with_clock(FeedbackConfig::default());
    let start = clock.now_system();
    store.record(outcome(true, 10, 1, start));
    clock.advance(Duration::from_secs(10));
    let mid = clock.now_system();
    store.record(outcome(true, 20, 2, mid));
    clock.advance(Duration::from_secs(10));
    store.record(outcome(true, 30, 3, clock.now_system()));

    let slice = store.outcomes_in_range(start + Duration::from_secs(5), mid);
    assert_eq!(slice.len(), 1);
    assert_eq!(slice[0].latency, Duration::from_millis(20));
}

#[test]
fn test_error_type_distribution() {
    let (store, clock) = store_with_clock(FeedbackConfig::default());
    let now = clock.now_system();
    store.record(outcome(false, 10, 0, now));
    store.record(outcome(false, 10, 0, now));
    store.record(outcome(true, 10, 10, now));
    let mut crypto_failure = outcome(false, 10, 0, now);
    crypto_failure.error_type = Some("crypto".to_string());
    store.record(crypto_failure);

    let table = store.error_type_distribution();
    assert_eq!(table.get("ack_timeout"), Some(&2));
    assert_eq!(table.get("crypto"), Some(&1));
}

#[test]
fn test_outliers_by_latency_z_score() {
    let config = FeedbackConfig {
        outlier_threshold: 2.0,
        ..FeedbackConfig::default()
    };
    let (store, clock) = store_with_clock(config);
    let now = clock.now_system();
    for _ in 0..20 {
        store.record(outcome(true, 100, 10, now));
    }
    store.record(outcome(true, 5000, 10, now));

    let outliers = store.outliers();
    assert_eq!(outliers.len(), 1);
    assert_eq!(outliers[0].latency, Duration::from_millis(5000));
}

#[test]
fn test_detailed_metrics_cover_all_sections() {
    let (store, clock) = store_with_clock(FeedbackConfig::default());
    for i in 0..50u64 {
        store.record(outcome(i % 10 != 0, 50 + i, 1000, clock.now_system()));
        clock.advance(Duration::from_millis(200));
    }

    let detailed = store.detailed_metrics().unwrap();
    assert_eq!(detailed.summary.total_transactions, 50);
    let latency_stats = detailed.latency_stats.unwrap();
    assert!(latency_stats.min >= 50.0);
    assert!(latency_stats.max <= 99.0);
    assert!(detailed.throughput_stats.is_some());
    assert!(detailed.peak_throughput >= detailed.sustained_throughput);
    assert_eq!(detailed.error_type_frequency.get("ack_timeout"), Some(&5));
    let trend = detailed.latency_trend.unwrap();
    assert!(trend.trend_slope > 0.9 && trend.trend_slope < 1.1);
    assert!(detailed.error_rate_trend.is_some());
}

#[test]
fn test_retention_pruning() {
    let mut config = FeedbackConfig::default();
    config.metrics_window = Duration::from_secs(365 * 24 * 3600);
    config.persistence.retention = Duration::from_secs(3600);
    let (store, clock) = store_with_clock(config);

    store.record(outcome(true, 10, 1, clock.now_system()));
    clock.advance(Duration::from_secs(2 * 3600));
    store.record(outcome(true, 20, 1, clock.now_system()));

    assert_eq!(store.prune_retention(), 1);
    assert_eq!(store.outcome_count(), 1);
    assert!(store.oldest_data_time().is_some());
}
