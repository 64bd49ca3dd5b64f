use std::time::{Duration, SystemTime};

/// Consistent snapshot of transmission statistics.
#[derive(Debug, Clone, Default)]
pub struct TransmissionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub retransmissions: u64,
    pub packet_loss_count: u64,
    pub current_rtt: Option<Duration>,
    pub avg_rtt: Option<Duration>,
    pub min_rtt: Option<Duration>,
    pub max_rtt: Option<Duration>,
    pub current_window_size: u32,
    pub in_congestion_avoidance: bool,
    pub is_encrypted: bool,
    pub cipher_suite: Option<String>,
    pub protocol_version: Option<String>,
    pub peer_identity: Option<String>,
    pub last_update: Option<SystemTime>,
}

/// Raw counters maintained under the manager lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub retransmissions: u64,
    pub packet_loss_count: u64,
    pub last_update: Option<SystemTime>,
}
