use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use xeno_secure::{
    AdaptiveRecordConfig, KeyStore, RecordBatchConfig, SecureChannel, SecureChannelConfig,
    SecureContext, SecureError, XenoContext,
};
use xeno_wire::testing::MemoryLink;
use xeno_wire::{SystemTimeProvider, TimeProvider, Transport};

fn channel(
    link: Arc<dyn Transport>,
    peer: &'static str,
    client: bool,
    seed: u64,
    config: SecureChannelConfig,
) -> Arc<SecureChannel> {
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let factory: Box<dyn Fn() -> Box<dyn SecureContext> + Send + Sync> = Box::new(move || {
        let mut rng = StdRng::seed_from_u64(seed);
        if client {
            Box::new(XenoContext::client(peer, &mut rng))
        } else {
            Box::new(XenoContext::server(peer, &mut rng))
        }
    });
    Arc::new(SecureChannel::new(link, peer, config, time, factory))
}

fn established_pair(
    client_config: SecureChannelConfig,
    server_config: SecureChannelConfig,
) -> (Arc<SecureChannel>, Arc<SecureChannel>) {
    let (a, b) = MemoryLink::pair();
    let client = channel(Arc::new(a), "server", true, 11, client_config);
    let server = channel(Arc::new(b), "client", false, 12, server_config);

    let server_side = Arc::clone(&server);
    let handle = std::thread::spawn(move || server_side.establish());
    client.establish().unwrap();
    handle.join().unwrap().unwrap();
    (client, server)
}

#[test]
fn test_channel_establish_and_round_trip() {
    let (client, server) = established_pair(
        SecureChannelConfig::default(),
        SecureChannelConfig::default(),
    );
    assert!(client.is_established());
    assert!(server.is_established());

    client.send(b"over the channel").unwrap();
    assert_eq!(
        server.recv(Duration::from_secs(1)).unwrap(),
        b"over the channel"
    );

    server.send(b"and back").unwrap();
    assert_eq!(client.recv(Duration::from_secs(1)).unwrap(), b"and back");
}

#[test]
fn test_channel_metadata_after_establish() {
    let (client, _server) = established_pair(
        SecureChannelConfig::default(),
        SecureChannelConfig::default(),
    );
    let meta = client.metadata();
    assert!(meta.established);
    assert!(!meta.resumed, "first handshake is never abbreviated");
    assert_eq!(meta.cipher_suite, "X25519-CHACHA20-BLAKE3");
    assert_eq!(meta.protocol_version, "xeno/1");
    assert!(meta.peer_identity.unwrap().starts_with("server:"));
}

#[test]
fn test_hostname_verification_rejects_mismatch() {
    let (a, b) = MemoryLink::pair();
    let client = channel(
        Arc::new(a),
        "server",
        true,
        13,
        SecureChannelConfig {
            expected_hostname: Some("other-host".to_string()),
            ..SecureChannelConfig::default()
        },
    );
    let server = channel(Arc::new(b), "client", false, 14, SecureChannelConfig::default());

    let server_side = Arc::clone(&server);
    let handle = std::thread::spawn(move || server_side.establish());
    let err = client.establish().unwrap_err();
    assert!(matches!(err, SecureError::Handshake(_)));
    let _ = handle.join().unwrap();
}

#[test]
fn test_send_before_establish_fails() {
    let (a, _b) = MemoryLink::pair();
    let client = channel(Arc::new(a), "server", true, 15, SecureChannelConfig::default());
    assert!(matches!(
        client.send(b"early"),
        Err(SecureError::NotEstablished)
    ));
}

#[test]
fn test_close_notify_reaches_peer() {
    let (client, server) = established_pair(
        SecureChannelConfig::default(),
        SecureChannelConfig::default(),
    );
    client.shutdown();
    assert!(!client.is_established());
    assert!(matches!(
        server.recv(Duration::from_secs(1)),
        Err(SecureError::Closed)
    ));
}

#[test]
fn test_shutdown_caches_resumption_data() {
    let (client, _server) = established_pair(
        SecureChannelConfig::default(),
        SecureChannelConfig::default(),
    );
    assert_eq!(client.resumption_cache_len(), 0);
    client.shutdown();
    assert_eq!(client.resumption_cache_len(), 1);
    assert!(client.resumption_secret("server").is_some());
}

#[test]
fn test_keystore_receives_session_key() {
    let (a, b) = MemoryLink::pair();
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(KeyStore::new(time));

    let client = channel(Arc::new(a), "server", true, 16, SecureChannelConfig::default());
    let server = channel(Arc::new(b), "client", false, 17, SecureChannelConfig::default());
    client.set_keystore(Arc::clone(&store));

    let server_side = Arc::clone(&server);
    let handle = std::thread::spawn(move || server_side.establish());
    client.establish().unwrap();
    handle.join().unwrap().unwrap();

    let key_id = client.key_id().expect("session key stored");
    assert!(store.material(&key_id).is_some());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_batched_records_drain_to_peer() {
    let batching = RecordBatchConfig {
        enabled: true,
        min_message_size: 1,
        max_batch_size: 64 * 1024,
        max_messages_per_batch: 100,
        max_delay: Duration::from_millis(10),
    };
    let (client, server) = established_pair(
        SecureChannelConfig {
            batching,
            ..SecureChannelConfig::default()
        },
        SecureChannelConfig::default(),
    );

    client.send(b"one").unwrap();
    client.send(b"two").unwrap();
    client.send(b"three").unwrap();

    // The age trigger drains the queue even though size and count
    // thresholds were never reached.
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), b"one");
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), b"two");
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), b"three");
}

#[test]
fn test_count_threshold_drains_batch_immediately() {
    let batching = RecordBatchConfig {
        enabled: true,
        min_message_size: 1,
        max_batch_size: 64 * 1024,
        max_messages_per_batch: 2,
        max_delay: Duration::from_secs(60),
    };
    let (client, server) = established_pair(
        SecureChannelConfig {
            batching,
            ..SecureChannelConfig::default()
        },
        SecureChannelConfig::default(),
    );

    client.send(b"alpha").unwrap();
    client.send(b"beta").unwrap();
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), b"alpha");
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), b"beta");
}

#[test]
fn test_shutdown_flushes_pending_batch() {
    let batching = RecordBatchConfig {
        enabled: true,
        min_message_size: 1,
        max_batch_size: 64 * 1024,
        max_messages_per_batch: 100,
        max_delay: Duration::from_secs(60),
    };
    let (client, server) = established_pair(
        SecureChannelConfig {
            batching,
            ..SecureChannelConfig::default()
        },
        SecureChannelConfig::default(),
    );

    client.send(b"queued").unwrap();
    client.shutdown();
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), b"queued");
}

#[test]
fn test_vectored_send_above_threshold() {
    let (client, server) = established_pair(
        SecureChannelConfig::default(),
        SecureChannelConfig::default(),
    );
    let buffers = vec![vec![0xAAu8; 4096], vec![0xBBu8; 4096], vec![0xCCu8; 4096]];
    client.sendv(&buffers).unwrap();
    for expected in &buffers {
        assert_eq!(&server.recv(Duration::from_secs(1)).unwrap(), expected);
    }
}

#[test]
fn test_vectored_send_below_threshold_falls_back() {
    let (client, server) = established_pair(
        SecureChannelConfig::default(),
        SecureChannelConfig::default(),
    );
    let buffers = vec![vec![1u8; 16], vec![2u8; 16]];
    client.sendv(&buffers).unwrap();
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), vec![1u8; 16]);
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), vec![2u8; 16]);
}

#[test]
fn test_adaptive_sizing_splits_large_sends() {
    let adaptive = AdaptiveRecordConfig {
        enabled: true,
        min_size: 256,
        max_size: 1024,
        initial_size: 256,
        ..AdaptiveRecordConfig::default()
    };
    let (client, server) = established_pair(
        SecureChannelConfig {
            adaptive,
            ..SecureChannelConfig::default()
        },
        SecureChannelConfig::default(),
    );
    assert_eq!(client.current_record_size(), 256);

    client.send(&[7u8; 700]).unwrap();
    let first = server.recv(Duration::from_secs(1)).unwrap();
    let second = server.recv(Duration::from_secs(1)).unwrap();
    let third = server.recv(Duration::from_secs(1)).unwrap();
    assert_eq!(first.len(), 256);
    assert_eq!(second.len(), 256);
    assert_eq!(third.len(), 188);
    let mut joined = first;
    joined.extend(second);
    joined.extend(third);
    assert_eq!(joined, vec![7u8; 700]);
}

#[test]
fn test_renegotiate_resumes_from_the_session_cache() {
    let (client, server) = established_pair(
        SecureChannelConfig::default(),
        SecureChannelConfig::default(),
    );
    assert!(!client.metadata().resumed);
    client.send(b"before").unwrap();
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), b"before");

    // Renegotiation caches the session on teardown and consults it for
    // the next handshake, which runs abbreviated on both sides.
    let server_side = Arc::clone(&server);
    let handle = std::thread::spawn(move || server_side.renegotiate());
    client.renegotiate().unwrap();
    handle.join().unwrap().unwrap();

    assert!(client.metadata().resumed);
    assert!(server.metadata().resumed);

    client.send(b"after").unwrap();
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), b"after");
}

#[test]
fn test_renegotiate_without_cache_runs_a_full_handshake() {
    let no_resumption = SecureChannelConfig {
        enable_session_resumption: false,
        ..SecureChannelConfig::default()
    };
    let (client, server) = established_pair(no_resumption.clone(), no_resumption);

    let server_side = Arc::clone(&server);
    let handle = std::thread::spawn(move || server_side.renegotiate());
    client.renegotiate().unwrap();
    handle.join().unwrap().unwrap();

    assert!(!client.metadata().resumed);
    assert!(!server.metadata().resumed);
    client.send(b"fresh").unwrap();
    assert_eq!(server.recv(Duration::from_secs(1)).unwrap(), b"fresh");
}
