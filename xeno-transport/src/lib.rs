//! # Xeno Transport
//!
//! The reliable transmission engine of the XenoComm stack: payloads are
//! optionally encrypted, protected by a configurable error coder,
//! fragmented under a sliding-window flow controller, and retransmitted
//! with exponential backoff until acknowledged.
//!
//! ## Architecture
//!
//! - **Error coding**: CRC32 detection or Reed–Solomon shard correction,
//!   behind the [`ErrorCoder`] trait.
//! - **Fragmentation**: numbered fragments with byte-exact headers,
//!   reassembled per transmission with expiry and a memory budget.
//! - **Flow control**: credit admission with EMA RTT tracking and
//!   AIMD window adjustment.
//! - **Orchestration**: [`TransmissionManager`] wires the pieces into
//!   blocking `send`/`receive` with retry events and stats.

pub mod config;
pub mod correction;
pub mod error;
pub mod flow;
pub mod fragment;
pub mod manager;
pub mod outcome;
pub mod retry;
pub mod stats;

pub use config::{
    FlowControlConfig, FragmentConfig, RetransmissionConfig, SecurityPolicy, TransmissionConfig,
};
pub use correction::{
    build_coder, CorrectionError, Crc32Coder, ErrorCoder, ErrorCorrectionMode, PassthroughCoder,
    ReedSolomonCoder, ReedSolomonConfig,
};
pub use error::TransmitError;
pub use flow::{FlowController, FlowSnapshot};
pub use fragment::{Fragmenter, InsertOutcome};
pub use manager::TransmissionManager;
pub use outcome::{CommunicationOutcome, ConfigSink, OutcomeSink};
pub use retry::{RetryCallback, RetryEvent, RetryEventKind, RetryPolicy, RetryStats};
pub use stats::TransmissionStats;
