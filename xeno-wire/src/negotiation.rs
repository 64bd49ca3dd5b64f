use crate::bytes::{Reader, WireError, Writer};
use crate::params::{CapabilitySet, NegotiableParams};

/// Size of the fixed negotiation frame header:
/// type (1) + session_id (8) + sequence (4) + payload_len (4).
pub const NEGOTIATION_FRAME_HEADER_SIZE: usize = 17;

/// Upper bound on a negotiation payload; anything larger is malformed.
pub const MAX_NEGOTIATION_PAYLOAD: usize = 64 * 1024;

/// Wire discriminants for negotiation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Propose = 1,
    Accept = 2,
    Counter = 3,
    Reject = 4,
    Finalize = 5,
    Close = 6,
}

impl MessageKind {
    pub fn from_wire(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(MessageKind::Propose),
            2 => Ok(MessageKind::Accept),
            3 => Ok(MessageKind::Counter),
            4 => Ok(MessageKind::Reject),
            5 => Ok(MessageKind::Finalize),
            6 => Ok(MessageKind::Close),
            _ => Err(WireError::InvalidDiscriminant {
                what: "MessageKind",
                value,
            }),
        }
    }
}

/// Typed payload of a negotiation frame.
///
/// PROPOSE and COUNTER carry the sender's capability lists after the
/// parameter set so the peer can compute an honest intersection when
/// generating a counter-proposal.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationPayload {
    Propose {
        params: NegotiableParams,
        capabilities: CapabilitySet,
    },
    Accept {
        /// Optionally echoes the accepted parameter set.
        params: Option<NegotiableParams>,
    },
    Counter {
        params: NegotiableParams,
        capabilities: CapabilitySet,
    },
    Reject {
        reason: String,
    },
    Finalize {
        params: NegotiableParams,
    },
    Close,
}

impl NegotiationPayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            NegotiationPayload::Propose { .. } => MessageKind::Propose,
            NegotiationPayload::Accept { .. } => MessageKind::Accept,
            NegotiationPayload::Counter { .. } => MessageKind::Counter,
            NegotiationPayload::Reject { .. } => MessageKind::Reject,
            NegotiationPayload::Finalize { .. } => MessageKind::Finalize,
            NegotiationPayload::Close => MessageKind::Close,
        }
    }

    fn write_to(&self, w: &mut Writer) {
        match self {
            NegotiationPayload::Propose {
                params,
                capabilities,
            }
            | NegotiationPayload::Counter {
                params,
                capabilities,
            } => {
                params.write_to(w);
                capabilities.write_to(w);
            }
            NegotiationPayload::Accept { params } => match params {
                Some(p) => {
                    w.put_u8(1);
                    p.write_to(w);
                }
                None => w.put_u8(0),
            },
            NegotiationPayload::Reject { reason } => w.put_string(reason),
            NegotiationPayload::Finalize { params } => params.write_to(w),
            NegotiationPayload::Close => {}
        }
    }

    fn read_from(kind: MessageKind, r: &mut Reader<'_>) -> Result<Self, WireError> {
        let payload = match kind {
            MessageKind::Propose => NegotiationPayload::Propose {
                params: NegotiableParams::read_from(r)?,
                capabilities: CapabilitySet::read_from(r)?,
            },
            MessageKind::Counter => NegotiationPayload::Counter {
                params: NegotiableParams::read_from(r)?,
                capabilities: CapabilitySet::read_from(r)?,
            },
            MessageKind::Accept => {
                let has_params = r.read_u8()? != 0;
                NegotiationPayload::Accept {
                    params: if has_params {
                        Some(NegotiableParams::read_from(r)?)
                    } else {
                        None
                    },
                }
            }
            MessageKind::Reject => NegotiationPayload::Reject {
                reason: r.read_string("reject reason")?,
            },
            MessageKind::Finalize => NegotiationPayload::Finalize {
                params: NegotiableParams::read_from(r)?,
            },
            MessageKind::Close => NegotiationPayload::Close,
        };
        r.expect_end()?;
        Ok(payload)
    }
}

/// One framed negotiation message.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationFrame {
    pub session_id: u64,
    pub sequence: u32,
    pub payload: NegotiationPayload,
}

impl NegotiationFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Writer::new();
        self.payload.write_to(&mut body);
        let body = body.into_inner();

        let mut w = Writer::with_capacity(NEGOTIATION_FRAME_HEADER_SIZE + body.len());
        w.put_u8(self.payload.kind() as u8);
        w.put_u64(self.session_id);
        w.put_u32(self.sequence);
        w.put_u32(body.len() as u32);
        w.put_bytes(&body);
        w.into_inner()
    }

    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(frame);
        let kind = MessageKind::from_wire(r.read_u8()?)?;
        let session_id = r.read_u64()?;
        let sequence = r.read_u32()?;
        let payload_len = r.read_u32()? as usize;
        if payload_len > MAX_NEGOTIATION_PAYLOAD {
            return Err(WireError::LengthMismatch {
                declared: payload_len,
                actual: MAX_NEGOTIATION_PAYLOAD,
            });
        }
        if r.remaining() != payload_len {
            return Err(WireError::LengthMismatch {
                declared: payload_len,
                actual: r.remaining(),
            });
        }
        let body = r.read_bytes(payload_len)?;
        let mut body_reader = Reader::new(body);
        let payload = NegotiationPayload::read_from(kind, &mut body_reader)?;
        Ok(Self {
            session_id,
            sequence,
            payload,
        })
    }
}
