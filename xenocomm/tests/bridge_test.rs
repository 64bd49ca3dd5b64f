//! Feedback-loop and secure-channel wiring across crate boundaries.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use xenocomm::feedback::{AdaptationThresholds, FeedbackConfig, FeedbackStore, StrategyAdapter};
use xenocomm::secure::{KeyStore, SecureChannel, SecureChannelConfig, SecureContext, XenoContext};
use xenocomm::transport::{
    ConfigSink, ErrorCorrectionMode, OutcomeSink, SecurityPolicy, TransmissionConfig,
    TransmissionManager,
};
use xenocomm::wire::testing::MemoryLink;
use xenocomm::wire::{SystemTimeProvider, TimeProvider, Transport};

fn fast_config() -> TransmissionConfig {
    let mut config = TransmissionConfig::default();
    config.retransmission.ack_timeout = Duration::from_millis(100);
    config.retransmission.retry_timeout = Duration::from_millis(20);
    config
}

/// Outcomes published by the manager land in the store, and the adapter
/// pushes the adapted configuration back into the manager.
#[test]
fn test_feedback_loop_closes_back_into_the_manager() {
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(FeedbackStore::new(
        FeedbackConfig::default(),
        Arc::clone(&time),
    ));
    let adapter = StrategyAdapter::new(Arc::clone(&store), Arc::clone(&time));
    adapter.set_thresholds(AdaptationThresholds {
        min_samples: 3,
        ..AdaptationThresholds::default()
    });

    let mut config = fast_config();
    config.error_correction = ErrorCorrectionMode::None;
    config.retransmission.max_retries = 0;
    config.retransmission.ack_timeout = Duration::from_millis(40);

    let (link_a, _link_b) = MemoryLink::pair();
    let link_a = Arc::new(link_a);
    link_a.set_loss_probability(1.0);
    let manager = Arc::new(
        TransmissionManager::new(Arc::clone(&link_a) as Arc<dyn Transport>, config).unwrap(),
    );
    manager.set_outcome_sink(Arc::clone(&store) as Arc<dyn OutcomeSink>);

    // Every send fails and is observed by the store.
    for _ in 0..4 {
        assert!(manager.send(&[0u8; 64]).is_err());
    }
    assert_eq!(store.outcome_count(), 4);
    let summary = store.current_metrics().unwrap();
    assert_eq!(summary.success_rate, 0.0);
    assert_eq!(
        store.error_type_distribution().get("max_retries"),
        Some(&4)
    );

    // The adapter reads the store and pushes an escalation into the
    // manager through its ConfigSink surface.
    let current = manager.config();
    let adapted = adapter
        .tick(&current, manager.as_ref() as &dyn ConfigSink)
        .unwrap()
        .expect("error rate forces adaptation");
    assert_eq!(adapted.error_correction, ErrorCorrectionMode::ChecksumOnly);
    assert_eq!(
        manager.config().error_correction,
        ErrorCorrectionMode::ChecksumOnly
    );
}

/// Encrypted fragments flow once the channel handshake completes, and
/// the session key lands in the key store.
#[test]
fn test_secure_stack_end_to_end() {
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let keystore = Arc::new(KeyStore::new(Arc::clone(&time)));

    let (secure_a, secure_b) = MemoryLink::pair();
    let client_factory: Box<dyn Fn() -> Box<dyn SecureContext> + Send + Sync> = Box::new(|| {
        let mut rng = StdRng::seed_from_u64(77);
        Box::new(XenoContext::client("agent-b", &mut rng))
    });
    let server_factory: Box<dyn Fn() -> Box<dyn SecureContext> + Send + Sync> = Box::new(|| {
        let mut rng = StdRng::seed_from_u64(78);
        Box::new(XenoContext::server("agent-a", &mut rng))
    });
    let client = Arc::new(SecureChannel::new(
        Arc::new(secure_a),
        "agent-b",
        SecureChannelConfig::default(),
        Arc::clone(&time),
        client_factory,
    ));
    let server = Arc::new(SecureChannel::new(
        Arc::new(secure_b),
        "agent-a",
        SecureChannelConfig::default(),
        Arc::clone(&time),
        server_factory,
    ));
    client.set_keystore(Arc::clone(&keystore));

    let mut config = fast_config();
    config.security = SecurityPolicy {
        enable_encryption: true,
        require_encryption: true,
    };

    let (data_a, data_b) = MemoryLink::pair();
    let sender = Arc::new(
        TransmissionManager::new(Arc::new(data_a) as Arc<dyn Transport>, config.clone()).unwrap(),
    );
    let receiver = Arc::new(
        TransmissionManager::new(Arc::new(data_b) as Arc<dyn Transport>, config).unwrap(),
    );
    sender.attach_secure_channel(Arc::clone(&client));
    receiver.attach_secure_channel(Arc::clone(&server));

    // Drive both handshake sides, then move data.
    let server_side = Arc::clone(&server);
    let handshake = std::thread::spawn(move || server_side.establish());
    sender.setup_secure_channel().unwrap();
    handshake.join().unwrap().unwrap();

    let payload: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    let receiver_side = Arc::clone(&receiver);
    let handle = std::thread::spawn(move || receiver_side.receive(Duration::from_secs(5)));
    sender.send(&payload).unwrap();
    assert_eq!(handle.join().unwrap().unwrap(), payload);

    assert!(sender.get_stats().is_encrypted);
    assert_eq!(keystore.len(), 1, "session key stored after handshake");
    let key_id = client.key_id().unwrap();
    assert!(keystore.material(&key_id).is_some());
}
