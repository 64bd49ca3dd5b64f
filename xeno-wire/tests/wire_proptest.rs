use proptest::prelude::*;
use xeno_wire::{FragmentAck, FragmentHeader, NegotiationFrame, NegotiationPayload, Reader, Writer};

proptest! {
    #[test]
    fn test_header_round_trip(
        transmission_id in any::<u32>(),
        fragment_index in any::<u16>(),
        total_fragments in any::<u16>(),
        original_size in any::<u32>(),
        error_check in any::<u32>(),
        is_encrypted in any::<bool>(),
        security_flags in any::<u8>(),
        payload in prop::collection::vec(any::<u8>(), 0..600),
    ) {
        let header = FragmentHeader {
            transmission_id,
            fragment_index,
            total_fragments,
            fragment_size: payload.len() as u32,
            original_size,
            error_check,
            is_encrypted,
            security_flags,
        };
        let frame = header.frame(&payload);
        let (decoded, body) = FragmentHeader::split_frame(&frame).unwrap();
        prop_assert_eq!(decoded, header);
        prop_assert_eq!(body, &payload[..]);
    }

    #[test]
    fn test_ack_round_trip(
        transmission_id in any::<u32>(),
        fragment_index in any::<u16>(),
        success in any::<bool>(),
        error_code in any::<u32>(),
    ) {
        let ack = FragmentAck { transmission_id, fragment_index, success, error_code };
        prop_assert_eq!(FragmentAck::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn test_reject_frame_round_trip(
        session_id in any::<u64>(),
        sequence in any::<u32>(),
        reason in "[ -~]{0,120}",
    ) {
        let frame = NegotiationFrame {
            session_id,
            sequence,
            payload: NegotiationPayload::Reject { reason },
        };
        prop_assert_eq!(NegotiationFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_string_codec_round_trip(s in "\\PC{0,200}") {
        let mut w = Writer::new();
        w.put_string(&s);
        let bytes = w.into_inner();
        let mut r = Reader::new(&bytes);
        prop_assert_eq!(r.read_string("s").unwrap(), s);
        r.expect_end().unwrap();
    }
}
