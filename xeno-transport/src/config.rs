use crate::correction::{ErrorCorrectionMode, ReedSolomonConfig};
use crate::error::TransmitError;
use std::time::Duration;

/// Fragmentation and reassembly options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentConfig {
    pub max_fragment_size: u32,
    pub reassembly_timeout: Duration,
    pub max_fragments: u32,
    /// Byte budget across all in-progress reassemblies.
    pub fragment_buffer_size: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: 1024,
            reassembly_timeout: Duration::from_secs(5),
            max_fragments: 65535,
            fragment_buffer_size: 1024 * 1024,
        }
    }
}

/// Retransmission options shared by the fragment send path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmissionConfig {
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_timeout: Duration,
    /// How long to wait for a fragment acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for RetransmissionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_timeout: Duration::from_millis(1000),
            ack_timeout: Duration::from_millis(500),
        }
    }
}

/// Sliding-window flow control options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControlConfig {
    pub initial_window_size: u32,
    pub min_window_size: u32,
    pub max_window_size: u32,
    /// EMA divisor: smoothing factor is `1 / rtt_smoothing_factor`.
    pub rtt_smoothing_factor: u32,
    /// RTT increase over the windowed minimum, in percent, that signals
    /// congestion.
    pub congestion_threshold: u32,
    pub backoff_multiplier: u32,
    pub recovery_multiplier: u32,
    pub min_rtt_samples: usize,
    /// Bound on blocking waits for window space.
    pub window_wait_timeout: Duration,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            initial_window_size: 65535,
            min_window_size: 1024,
            max_window_size: 1024 * 1024,
            rtt_smoothing_factor: 8,
            congestion_threshold: 100,
            backoff_multiplier: 2,
            recovery_multiplier: 2,
            min_rtt_samples: 10,
            window_wait_timeout: Duration::from_secs(1),
        }
    }
}

/// Security posture of the transmission manager. The channel-level options
/// (hostnames, ALPN, batching, adaptive records) live in
/// `xeno_secure::SecureChannelConfig`; together the two form the single
/// recognized security configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub enable_encryption: bool,
    pub require_encryption: bool,
}

/// Complete transmission configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionConfig {
    pub error_correction: ErrorCorrectionMode,
    pub reed_solomon: ReedSolomonConfig,
    pub fragment: FragmentConfig,
    pub retransmission: RetransmissionConfig,
    pub flow: FlowControlConfig,
    pub security: SecurityPolicy,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            error_correction: ErrorCorrectionMode::ChecksumOnly,
            reed_solomon: ReedSolomonConfig::default(),
            fragment: FragmentConfig::default(),
            retransmission: RetransmissionConfig::default(),
            flow: FlowControlConfig::default(),
            security: SecurityPolicy::default(),
        }
    }
}

impl TransmissionConfig {
    pub fn validate(&self) -> Result<(), TransmitError> {
        if self.fragment.max_fragment_size == 0 {
            return Err(TransmitError::InvalidConfig(
                "max_fragment_size must be non-zero".to_string(),
            ));
        }
        if self.fragment.max_fragments == 0 {
            return Err(TransmitError::InvalidConfig(
                "max_fragments must be non-zero".to_string(),
            ));
        }
        if self.flow.min_window_size > self.flow.max_window_size {
            return Err(TransmitError::InvalidConfig(format!(
                "min_window_size {} exceeds max_window_size {}",
                self.flow.min_window_size, self.flow.max_window_size
            )));
        }
        if self.flow.initial_window_size < self.flow.min_window_size
            || self.flow.initial_window_size > self.flow.max_window_size
        {
            return Err(TransmitError::InvalidConfig(format!(
                "initial_window_size {} outside [{}, {}]",
                self.flow.initial_window_size,
                self.flow.min_window_size,
                self.flow.max_window_size
            )));
        }
        if self.flow.rtt_smoothing_factor == 0 {
            return Err(TransmitError::InvalidConfig(
                "rtt_smoothing_factor must be non-zero".to_string(),
            ));
        }
        if self.flow.backoff_multiplier == 0 || self.flow.recovery_multiplier == 0 {
            return Err(TransmitError::InvalidConfig(
                "window multipliers must be non-zero".to_string(),
            ));
        }
        if self.error_correction == ErrorCorrectionMode::ReedSolomon {
            if self.reed_solomon.data_shards == 0
                || self.reed_solomon.parity_shards == 0
                || self.reed_solomon.data_shards + self.reed_solomon.parity_shards > 255
            {
                return Err(TransmitError::InvalidConfig(format!(
                    "reed-solomon shard layout {}+{} invalid",
                    self.reed_solomon.data_shards, self.reed_solomon.parity_shards
                )));
            }
        }
        Ok(())
    }
}
