use crate::config::TransmissionConfig;
use std::time::{Duration, SystemTime};

/// One observed communication transaction, as fed to the feedback layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicationOutcome {
    pub success: bool,
    pub latency: Duration,
    pub bytes_transferred: u32,
    pub retry_count: u32,
    pub error_count: u32,
    pub error_type: Option<String>,
    pub timestamp: SystemTime,
}

/// Where the transmission manager publishes outcomes. The feedback store
/// implements this; the manager never holds the store as a parent.
pub trait OutcomeSink: Send + Sync {
    fn record_outcome(&self, outcome: CommunicationOutcome);
}

/// Receiver of configuration pushes from the strategy layer.
pub trait ConfigSink: Send + Sync {
    fn apply_config(&self, config: TransmissionConfig);
}
