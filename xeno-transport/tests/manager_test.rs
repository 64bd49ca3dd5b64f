use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use xeno_secure::{SecureChannel, SecureChannelConfig, SecureContext, XenoContext};
use xeno_transport::{
    CommunicationOutcome, ErrorCorrectionMode, FlowControlConfig, OutcomeSink, RetryEventKind,
    SecurityPolicy, TransmissionConfig, TransmissionManager, TransmitError,
};
use xeno_wire::testing::MemoryLink;
use xeno_wire::{SystemTimeProvider, TimeProvider, Transport};

fn fast_config() -> TransmissionConfig {
    let mut config = TransmissionConfig::default();
    config.retransmission.ack_timeout = Duration::from_millis(150);
    config.retransmission.retry_timeout = Duration::from_millis(30);
    config
}

fn manager_pair(
    config_a: TransmissionConfig,
    config_b: TransmissionConfig,
) -> (
    Arc<TransmissionManager>,
    Arc<TransmissionManager>,
    Arc<MemoryLink>,
    Arc<MemoryLink>,
) {
    let (link_a, link_b) = MemoryLink::pair_seeded(7);
    let link_a = Arc::new(link_a);
    let link_b = Arc::new(link_b);
    let a = Arc::new(
        TransmissionManager::new(Arc::clone(&link_a) as Arc<dyn Transport>, config_a).unwrap(),
    );
    let b = Arc::new(
        TransmissionManager::new(Arc::clone(&link_b) as Arc<dyn Transport>, config_b).unwrap(),
    );
    (a, b, link_a, link_b)
}

fn transfer(
    sender: &Arc<TransmissionManager>,
    receiver: &Arc<TransmissionManager>,
    payload: Vec<u8>,
) -> Vec<u8> {
    let receiver = Arc::clone(receiver);
    let handle = std::thread::spawn(move || receiver.receive(Duration::from_secs(5)));
    sender.send(&payload).unwrap();
    handle.join().unwrap().unwrap()
}

#[test]
fn test_fragmented_round_trip() {
    // 2000 bytes of 0x42 at max_fragment_size 500 moves as 4 fragments.
    let mut config = fast_config();
    config.fragment.max_fragment_size = 500;
    let (a, b, _, _) = manager_pair(config.clone(), config);

    let payload = vec![0x42u8; 2000];
    assert_eq!(transfer(&a, &b, payload.clone()), payload);

    let stats = a.get_stats();
    assert_eq!(stats.packets_sent, 4);
    assert!(stats.bytes_sent >= 2000 + 4 * 22);
    let stats_b = b.get_stats();
    assert_eq!(stats_b.packets_received, 4);
}

#[test]
fn test_out_of_order_fragments_reassemble() {
    // Feed hand-built fragment frames in the order [2, 0, 3, 1].
    use xeno_transport::correction::crc32;
    use xeno_transport::{Crc32Coder, ErrorCoder};
    use xeno_wire::FragmentHeader;

    let mut config = fast_config();
    config.fragment.max_fragment_size = 500;
    let (_, b, link_a, _) = manager_pair(config.clone(), config);

    let payload = vec![0x42u8; 2000];
    let coder = Crc32Coder;
    let mut frames = Vec::new();
    for (index, chunk) in payload.chunks(500).enumerate() {
        let wire_payload = coder.encode(chunk);
        let header = FragmentHeader {
            transmission_id: 99,
            fragment_index: index as u16,
            total_fragments: 4,
            fragment_size: wire_payload.len() as u32,
            original_size: payload.len() as u32,
            error_check: crc32::checksum(&wire_payload),
            is_encrypted: false,
            security_flags: 0,
        };
        frames.push(header.frame(&wire_payload));
    }
    for index in [2usize, 0, 3, 1] {
        link_a.send_frame(&frames[index]).unwrap();
    }

    assert_eq!(b.receive(Duration::from_secs(2)).unwrap(), payload);
}

#[test]
fn test_empty_payload_is_success_with_nothing_on_wire() {
    let (a, _, _, link_b) = manager_pair(fast_config(), fast_config());
    a.send(&[]).unwrap();
    assert_eq!(a.get_stats().packets_sent, 0);
    assert!(link_b.recv_frame(Duration::from_millis(50)).is_err());
}

#[test]
fn test_single_byte_payload_is_one_fragment() {
    let (a, b, _, _) = manager_pair(fast_config(), fast_config());
    assert_eq!(transfer(&a, &b, vec![0x7F]), vec![0x7F]);
    assert_eq!(a.get_stats().packets_sent, 1);
}

#[test]
fn test_exact_multiple_produces_no_trailing_fragment() {
    let mut config = fast_config();
    config.fragment.max_fragment_size = 512;
    let (a, b, _, _) = manager_pair(config.clone(), config);

    let payload = vec![9u8; 512 * 3];
    assert_eq!(transfer(&a, &b, payload.clone()), payload);
    assert_eq!(a.get_stats().packets_sent, 3);
}

#[test]
fn test_window_exhaustion_times_out_send() {
    let mut config = fast_config();
    config.fragment.max_fragment_size = 1024;
    config.flow = FlowControlConfig {
        initial_window_size: 1024,
        min_window_size: 1024,
        max_window_size: 1024,
        window_wait_timeout: Duration::from_millis(100),
        ..FlowControlConfig::default()
    };
    let (a, _, _, _) = manager_pair(config.clone(), config);

    // One fragment frame is 22 + 1024 + 4 bytes, larger than the window.
    let err = a.send(&vec![0u8; 2048]).unwrap_err();
    assert!(matches!(err, TransmitError::WindowTimeout(_)));
    assert!(err.to_string().contains("window space wait timeout"));
}

#[test]
fn test_lost_fragments_are_retransmitted() {
    let mut config = fast_config();
    config.fragment.max_fragment_size = 256;
    config.retransmission.max_retries = 8;
    let (a, b, link_a, _) = manager_pair(config.clone(), config);
    link_a.set_loss_probability(0.4);

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(transfer(&a, &b, payload.clone()), payload);

    let stats = a.get_stats();
    assert!(
        stats.retransmissions > 0,
        "40% loss must force at least one retransmission"
    );
    assert!(stats.packet_loss_count > 0);
}

#[test]
fn test_corrupted_fragment_is_nacked_and_retransmitted() {
    let mut config = fast_config();
    config.retransmission.max_retries = 3;
    let (a, b, link_a, _) = manager_pair(config.clone(), config);
    link_a.corrupt_next_frame();

    let payload = vec![0x5Au8; 600];
    assert_eq!(transfer(&a, &b, payload.clone()), payload);
    assert!(a.get_stats().retransmissions >= 1);
    assert_eq!(a.retry_stats().successful_retries, 1);
}

#[test]
fn test_retry_budget_exhaustion_fails_the_send() {
    let mut config = fast_config();
    config.retransmission.max_retries = 1;
    config.retransmission.ack_timeout = Duration::from_millis(60);
    let (a, _, link_a, _) = manager_pair(config.clone(), config);
    link_a.set_loss_probability(1.0);

    let err = a.send(&vec![1u8; 100]).unwrap_err();
    assert!(matches!(
        err,
        TransmitError::MaxRetriesReached { attempts: 2, .. }
    ));
    assert_eq!(a.retry_stats().max_retries_reached, 1);
}

#[test]
fn test_zero_retry_budget_fails_on_first_loss() {
    let mut config = fast_config();
    config.retransmission.max_retries = 0;
    config.retransmission.ack_timeout = Duration::from_millis(60);
    let (a, _, link_a, _) = manager_pair(config.clone(), config);
    link_a.set_loss_probability(1.0);

    let err = a.send(&vec![1u8; 10]).unwrap_err();
    assert!(matches!(
        err,
        TransmitError::MaxRetriesReached { attempts: 1, .. }
    ));
}

#[test]
fn test_retry_events_are_observable() {
    let mut config = fast_config();
    config.retransmission.max_retries = 3;
    let (a, b, link_a, _) = manager_pair(config.clone(), config);
    link_a.corrupt_next_frame();

    let events: Arc<Mutex<Vec<RetryEventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    a.set_retry_callback(Some(Arc::new(move |event: &xeno_transport::RetryEvent| {
        sink.lock().unwrap().push(event.kind);
    })));

    let payload = vec![3u8; 64];
    assert_eq!(transfer(&a, &b, payload.clone()), payload);

    let seen = events.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            RetryEventKind::Failure,
            RetryEventKind::Attempt,
            RetryEventKind::Success
        ]
    );
}

#[test]
fn test_receive_timeout_preserves_partial_context() {
    use xeno_transport::correction::crc32;
    use xeno_transport::{Crc32Coder, ErrorCoder};
    use xeno_wire::FragmentHeader;

    let config = fast_config();
    let (_, b, link_a, _) = manager_pair(config.clone(), config);

    let coder = Crc32Coder;
    let wire_payload = coder.encode(b"half");
    let header = FragmentHeader {
        transmission_id: 5,
        fragment_index: 0,
        total_fragments: 2,
        fragment_size: wire_payload.len() as u32,
        original_size: 8,
        error_check: crc32::checksum(&wire_payload),
        is_encrypted: false,
        security_flags: 0,
    };
    link_a.send_frame(&header.frame(&wire_payload)).unwrap();

    let err = b.receive(Duration::from_millis(200)).unwrap_err();
    assert!(matches!(err, TransmitError::ReceiveTimeout(_)));
    assert_eq!(b.pending_reassemblies(), 1);

    // The second fragment still completes the transmission later.
    let wire_payload = coder.encode(b"left");
    let header = FragmentHeader {
        fragment_index: 1,
        fragment_size: wire_payload.len() as u32,
        error_check: crc32::checksum(&wire_payload),
        ..header
    };
    link_a.send_frame(&header.frame(&wire_payload)).unwrap();
    assert_eq!(b.receive(Duration::from_secs(1)).unwrap(), b"halfleft");
}

#[test]
fn test_outcomes_are_published_to_the_sink() {
    struct Capture(Mutex<Vec<CommunicationOutcome>>);
    impl OutcomeSink for Capture {
        fn record_outcome(&self, outcome: CommunicationOutcome) {
            self.0.lock().unwrap().push(outcome);
        }
    }

    let (a, b, _, _) = manager_pair(fast_config(), fast_config());
    let capture = Arc::new(Capture(Mutex::new(Vec::new())));
    a.set_outcome_sink(Arc::clone(&capture) as Arc<dyn OutcomeSink>);

    let payload = vec![1u8; 300];
    transfer(&a, &b, payload);

    let outcomes = capture.0.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].bytes_transferred, 300);
}

#[test]
fn test_stats_track_rtt_and_window() {
    let (a, b, _, _) = manager_pair(fast_config(), fast_config());
    transfer(&a, &b, vec![8u8; 100]);

    let stats = a.get_stats();
    assert!(stats.current_rtt.is_some());
    assert!(stats.avg_rtt.is_some());
    assert!(stats.current_window_size >= 1024);
    assert!(stats.last_update.is_some());
    assert!(!stats.is_encrypted);

    a.reset_stats();
    assert_eq!(a.get_stats().packets_sent, 0);
}

#[test]
fn test_set_config_switches_error_correction() {
    let mut config = fast_config();
    let (a, b, _, _) = manager_pair(config.clone(), config.clone());

    config.error_correction = ErrorCorrectionMode::ReedSolomon;
    config.reed_solomon.data_shards = 4;
    config.reed_solomon.parity_shards = 2;
    a.set_config(config.clone()).unwrap();
    b.set_config(config).unwrap();

    let payload = vec![0xC3u8; 900];
    assert_eq!(transfer(&a, &b, payload.clone()), payload);
}

#[test]
fn test_set_config_rejects_invalid_values() {
    let (a, _, _, _) = manager_pair(fast_config(), fast_config());
    let mut bad = fast_config();
    bad.fragment.max_fragment_size = 0;
    assert!(matches!(
        a.set_config(bad),
        Err(TransmitError::InvalidConfig(_))
    ));
}

fn secure_channel_pair() -> (Arc<SecureChannel>, Arc<SecureChannel>) {
    let (link_a, link_b) = MemoryLink::pair();
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let client_factory: Box<dyn Fn() -> Box<dyn SecureContext> + Send + Sync> = Box::new(|| {
        let mut rng = StdRng::seed_from_u64(21);
        Box::new(XenoContext::client("peer-b", &mut rng))
    });
    let server_factory: Box<dyn Fn() -> Box<dyn SecureContext> + Send + Sync> = Box::new(|| {
        let mut rng = StdRng::seed_from_u64(22);
        Box::new(XenoContext::server("peer-a", &mut rng))
    });
    let client = Arc::new(SecureChannel::new(
        Arc::new(link_a),
        "peer-b",
        SecureChannelConfig::default(),
        Arc::clone(&time),
        client_factory,
    ));
    let server = Arc::new(SecureChannel::new(
        Arc::new(link_b),
        "peer-a",
        SecureChannelConfig::default(),
        time,
        server_factory,
    ));
    (client, server)
}

#[test]
fn test_encrypted_transmission_round_trip() {
    let mut config = fast_config();
    config.security = SecurityPolicy {
        enable_encryption: true,
        require_encryption: true,
    };
    config.fragment.max_fragment_size = 200;
    let (a, b, _, _) = manager_pair(config.clone(), config);

    let (client, server) = secure_channel_pair();
    let server_side = Arc::clone(&server);
    let handshake = std::thread::spawn(move || server_side.establish());
    client.establish().unwrap();
    handshake.join().unwrap().unwrap();

    a.attach_secure_channel(client);
    b.attach_secure_channel(server);

    let payload: Vec<u8> = (0..777u32).map(|i| (i * 7 % 256) as u8).collect();
    assert_eq!(transfer(&a, &b, payload.clone()), payload);

    let stats = a.get_stats();
    assert!(stats.is_encrypted);
    assert_eq!(stats.cipher_suite.as_deref(), Some("X25519-CHACHA20-BLAKE3"));
    assert!(a.security_status().starts_with("encrypted ("));
}

#[test]
fn test_require_encryption_without_channel_fails() {
    let mut config = fast_config();
    config.security.require_encryption = true;
    let (a, _, _, _) = manager_pair(config.clone(), config);
    assert!(matches!(
        a.send(b"secret"),
        Err(TransmitError::EncryptionRequired)
    ));
    assert!(matches!(
        a.setup_secure_channel(),
        Err(TransmitError::EncryptionRequired)
    ));
}

#[test]
fn test_security_status_without_channel() {
    let (a, _, _, _) = manager_pair(fast_config(), fast_config());
    assert_eq!(a.security_status(), "plaintext");
}
