//! # Xeno Wire
//!
//! Byte-exact wire formats and link abstractions shared by the XenoComm
//! stack: the fragment header and ACK frames used by the reliable
//! transport, the negotiation message framing, and the parameter-set
//! model agents negotiate over.
//!
//! All multi-byte integers are little-endian on the wire. Strings are
//! `u16` length-prefixed UTF-8.

pub mod bytes;
pub mod fragment;
pub mod negotiation;
pub mod params;
pub mod testing;
pub mod time;
pub mod transport;

pub use bytes::{Reader, WireError, Writer};
pub use fragment::{FragmentAck, FragmentHeader, FRAGMENT_ACK_SIZE, FRAGMENT_HEADER_SIZE};
pub use negotiation::{MessageKind, NegotiationFrame, NegotiationPayload};
pub use params::{
    AuthMethod, CapabilitySet, Cipher, Compression, DataFormat, ErrorCorrectionScheme,
    KeyExchange, KeySize, NegotiableParams, ParamsError,
};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
pub use transport::{LinkError, Transport};
