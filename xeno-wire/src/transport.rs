use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the link layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),
    #[error("link closed by peer")]
    Closed,
    #[error("IO error: {0}")]
    Io(String),
}

/// A frame-oriented point-to-point link.
///
/// The stack treats socket syscalls as an external collaborator behind this
/// boundary: implementations deliver whole frames, possibly reordered or
/// dropped, and never split them.
pub trait Transport: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> Result<(), LinkError>;

    fn recv_frame(&self, timeout: Duration) -> Result<Vec<u8>, LinkError>;

    /// Vectored write. Implementations that cannot coalesce fall back to
    /// sequential sends.
    fn send_frames(&self, frames: &[Vec<u8>]) -> Result<(), LinkError> {
        for frame in frames {
            self.send_frame(frame)?;
        }
        Ok(())
    }

    /// Liveness probe consulted before reporting link-level failures.
    fn check_health(&self) -> bool {
        true
    }
}
