//! In-memory links for tests and simulations.

use crate::transport::{LinkError, Transport};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One end of an in-memory frame pipe with simple impairment knobs:
/// independent frame loss, one-shot corruption, and a health switch.
pub struct MemoryLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    loss_probability: Mutex<f64>,
    corrupt_next: AtomicBool,
    healthy: AtomicBool,
    rng: Mutex<StdRng>,
}

impl MemoryLink {
    /// Cross-connected pair with deterministic impairment randomness.
    pub fn pair_seeded(seed: u64) -> (MemoryLink, MemoryLink) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        let a = MemoryLink::new(a_tx, a_rx, StdRng::seed_from_u64(seed));
        let b = MemoryLink::new(b_tx, b_rx, StdRng::seed_from_u64(seed.wrapping_add(1)));
        (a, b)
    }

    pub fn pair() -> (MemoryLink, MemoryLink) {
        Self::pair_seeded(0)
    }

    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>, rng: StdRng) -> Self {
        Self {
            tx,
            rx,
            loss_probability: Mutex::new(0.0),
            corrupt_next: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            rng: Mutex::new(rng),
        }
    }

    /// Probability that an outgoing frame is silently dropped.
    pub fn set_loss_probability(&self, probability: f64) {
        *self.loss_probability.lock().unwrap() = probability.clamp(0.0, 1.0);
    }

    /// Flips one bit in the final byte of the next outgoing frame.
    pub fn corrupt_next_frame(&self) {
        self.corrupt_next.store(true, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl Transport for MemoryLink {
    fn send_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(LinkError::Io("link down".to_string()));
        }
        let loss = *self.loss_probability.lock().unwrap();
        if loss > 0.0 && self.rng.lock().unwrap().gen_bool(loss) {
            return Ok(());
        }
        let mut frame = frame.to_vec();
        if self.corrupt_next.swap(false, Ordering::SeqCst) && !frame.is_empty() {
            let last = frame.len() - 1;
            frame[last] ^= 0x01;
        }
        self.tx.send(frame).map_err(|_| LinkError::Closed)
    }

    fn recv_frame(&self, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(LinkError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }

    fn check_health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
