use xeno_wire::{
    CapabilitySet, Cipher, Compression, DataFormat, KeyExchange, KeySize, MessageKind,
    NegotiableParams, NegotiationFrame, NegotiationPayload, WireError,
};

fn caps() -> CapabilitySet {
    CapabilitySet {
        data_formats: DataFormat::ALL.to_vec(),
        compressions: Compression::ALL.to_vec(),
        error_corrections: xeno_wire::ErrorCorrectionScheme::ALL.to_vec(),
        ciphers: Cipher::ALL.to_vec(),
        key_exchanges: KeyExchange::ALL.to_vec(),
        auth_methods: xeno_wire::AuthMethod::ALL.to_vec(),
        key_sizes: KeySize::ALL.to_vec(),
    }
}

fn round_trip(frame: NegotiationFrame) {
    let bytes = frame.encode();
    let decoded = NegotiationFrame::decode(&bytes).unwrap();
    assert_eq!(decoded, frame);
}

#[test]
fn test_propose_round_trip() {
    round_trip(NegotiationFrame {
        session_id: 42,
        sequence: 1,
        payload: NegotiationPayload::Propose {
            params: NegotiableParams::default(),
            capabilities: caps(),
        },
    });
}

#[test]
fn test_accept_round_trip_with_and_without_echo() {
    round_trip(NegotiationFrame {
        session_id: 7,
        sequence: 2,
        payload: NegotiationPayload::Accept {
            params: Some(NegotiableParams::default()),
        },
    });
    round_trip(NegotiationFrame {
        session_id: 7,
        sequence: 3,
        payload: NegotiationPayload::Accept { params: None },
    });
}

#[test]
fn test_counter_reject_finalize_close_round_trips() {
    round_trip(NegotiationFrame {
        session_id: 9,
        sequence: 4,
        payload: NegotiationPayload::Counter {
            params: NegotiableParams::default(),
            capabilities: caps(),
        },
    });
    round_trip(NegotiationFrame {
        session_id: 9,
        sequence: 5,
        payload: NegotiationPayload::Reject {
            reason: "no shared compression".to_string(),
        },
    });
    round_trip(NegotiationFrame {
        session_id: 9,
        sequence: 6,
        payload: NegotiationPayload::Finalize {
            params: NegotiableParams::default(),
        },
    });
    round_trip(NegotiationFrame {
        session_id: 9,
        sequence: 7,
        payload: NegotiationPayload::Close,
    });
}

#[test]
fn test_frame_kind_byte_is_first() {
    let frame = NegotiationFrame {
        session_id: 1,
        sequence: 0,
        payload: NegotiationPayload::Close,
    };
    let bytes = frame.encode();
    assert_eq!(bytes[0], MessageKind::Close as u8);
    // session_id little-endian at offset 1
    assert_eq!(&bytes[1..9], &[1, 0, 0, 0, 0, 0, 0, 0]);
    // empty payload
    assert_eq!(&bytes[13..17], &[0, 0, 0, 0]);
    assert_eq!(bytes.len(), 17);
}

#[test]
fn test_decode_rejects_bad_kind() {
    let mut bytes = NegotiationFrame {
        session_id: 1,
        sequence: 0,
        payload: NegotiationPayload::Close,
    }
    .encode();
    bytes[0] = 0xFF;
    assert!(matches!(
        NegotiationFrame::decode(&bytes),
        Err(WireError::InvalidDiscriminant { .. })
    ));
}

#[test]
fn test_decode_rejects_payload_length_mismatch() {
    let mut bytes = NegotiationFrame {
        session_id: 1,
        sequence: 0,
        payload: NegotiationPayload::Reject {
            reason: "nope".to_string(),
        },
    }
    .encode();
    // Declare one byte more than is present.
    let declared = u32::from_le_bytes([bytes[13], bytes[14], bytes[15], bytes[16]]) + 1;
    bytes[13..17].copy_from_slice(&declared.to_le_bytes());
    assert!(matches!(
        NegotiationFrame::decode(&bytes),
        Err(WireError::LengthMismatch { .. })
    ));
}

#[test]
fn test_decode_rejects_trailing_garbage_in_payload() {
    let inner = NegotiationFrame {
        session_id: 3,
        sequence: 1,
        payload: NegotiationPayload::Reject {
            reason: "x".to_string(),
        },
    };
    let mut bytes = inner.encode();
    // Append a byte inside the payload and fix up the declared length.
    bytes.push(0xAB);
    let declared = u32::from_le_bytes([bytes[13], bytes[14], bytes[15], bytes[16]]) + 1;
    bytes[13..17].copy_from_slice(&declared.to_le_bytes());
    assert!(matches!(
        NegotiationFrame::decode(&bytes),
        Err(WireError::TrailingBytes(1))
    ));
}
