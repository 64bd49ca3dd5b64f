use crate::config::FragmentConfig;
use crate::error::TransmitError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use xeno_wire::FragmentHeader;

#[derive(Debug)]
struct FragmentSlot {
    data: Vec<u8>,
    first_seen: Instant,
}

#[derive(Debug)]
struct ReassemblyContext {
    total_fragments: u16,
    original_size: u32,
    fragments: HashMap<u16, FragmentSlot>,
    started_at: Instant,
}

impl ReassemblyContext {
    fn buffered_bytes(&self) -> usize {
        self.fragments.values().map(|slot| slot.data.len()).sum()
    }
}

#[derive(Debug)]
struct ReassemblyState {
    contexts: HashMap<u32, ReassemblyContext>,
    buffered_bytes: usize,
}

/// Result of feeding one fragment into reassembly.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Fragment stored; the transmission is still incomplete.
    Stored,
    /// The fragment index was already present.
    Duplicate,
    /// All fragments arrived; the reassembled payload is returned.
    Complete(Vec<u8>),
}

/// Splits outgoing payloads and reassembles incoming fragments.
///
/// Each outgoing payload gets a monotonic transmission id. Reassembly
/// contexts are keyed by that id and expire after the configured timeout.
pub struct Fragmenter {
    next_transmission_id: AtomicU32,
    state: Mutex<ReassemblyState>,
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Fragmenter {
    pub fn new() -> Self {
        Self {
            next_transmission_id: AtomicU32::new(0),
            state: Mutex::new(ReassemblyState {
                contexts: HashMap::new(),
                buffered_bytes: 0,
            }),
        }
    }

    pub fn next_transmission_id(&self) -> u32 {
        self.next_transmission_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of fragments a payload will occupy at the given size.
    pub fn fragment_count(payload_len: usize, max_fragment_size: usize) -> usize {
        if payload_len == 0 {
            0
        } else {
            payload_len.div_ceil(max_fragment_size)
        }
    }

    /// True when the fragment index is already buffered for reassembly.
    pub fn is_duplicate(&self, transmission_id: u32, fragment_index: u16) -> bool {
        let state = self.state.lock().unwrap();
        state
            .contexts
            .get(&transmission_id)
            .is_some_and(|ctx| ctx.fragments.contains_key(&fragment_index))
    }

    /// Feeds a decoded (and decrypted) fragment into its context.
    pub fn insert_fragment(
        &self,
        header: &FragmentHeader,
        data: Vec<u8>,
        now: Instant,
        config: &FragmentConfig,
    ) -> Result<InsertOutcome, TransmitError> {
        if header.total_fragments == 0 {
            return Err(TransmitError::Protocol(format!(
                "transmission {} declares zero fragments",
                header.transmission_id
            )));
        }
        if header.fragment_index >= header.total_fragments {
            return Err(TransmitError::Protocol(format!(
                "fragment index {} out of range 0..{}",
                header.fragment_index, header.total_fragments
            )));
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let context = state
            .contexts
            .entry(header.transmission_id)
            .or_insert_with(|| ReassemblyContext {
                total_fragments: header.total_fragments,
                original_size: header.original_size,
                fragments: HashMap::new(),
                started_at: now,
            });

        if context.total_fragments != header.total_fragments
            || context.original_size != header.original_size
        {
            return Err(TransmitError::Protocol(format!(
                "transmission {} header disagrees with its reassembly context",
                header.transmission_id
            )));
        }
        if context.fragments.contains_key(&header.fragment_index) {
            return Ok(InsertOutcome::Duplicate);
        }

        let incoming = data.len();
        if state.buffered_bytes + incoming > config.fragment_buffer_size {
            return Err(TransmitError::BufferExhausted);
        }
        context.fragments.insert(
            header.fragment_index,
            FragmentSlot {
                data,
                first_seen: now,
            },
        );
        let complete = context.fragments.len() == context.total_fragments as usize;
        state.buffered_bytes += incoming;
        if !complete {
            return Ok(InsertOutcome::Stored);
        }

        let context = match state.contexts.remove(&header.transmission_id) {
            Some(ctx) => ctx,
            None => {
                return Err(TransmitError::Protocol(format!(
                    "transmission {} context vanished at completion",
                    header.transmission_id
                )))
            }
        };
        state.buffered_bytes -= context.buffered_bytes();
        drop(guard);

        let mut payload = Vec::with_capacity(context.original_size as usize);
        for index in 0..context.total_fragments {
            let slot = context.fragments.get(&index).ok_or_else(|| {
                TransmitError::Protocol(format!(
                    "transmission {} missing fragment {index} at completion",
                    header.transmission_id
                ))
            })?;
            payload.extend_from_slice(&slot.data);
        }
        if payload.len() != context.original_size as usize {
            return Err(TransmitError::Protocol(format!(
                "transmission {} reassembled to {} bytes, header declared {}",
                header.transmission_id,
                payload.len(),
                context.original_size
            )));
        }
        Ok(InsertOutcome::Complete(payload))
    }

    /// Drops contexts older than the reassembly timeout. Returns how many
    /// were expired.
    pub fn expire_stale(&self, now: Instant, config: &FragmentConfig) -> usize {
        let mut state = self.state.lock().unwrap();
        let timeout = config.reassembly_timeout;
        let expired: Vec<u32> = state
            .contexts
            .iter()
            .filter(|(_, ctx)| now.duration_since(ctx.started_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(ctx) = state.contexts.remove(id) {
                state.buffered_bytes -= ctx.buffered_bytes();
                tracing::warn!(
                    "reassembly context {id} expired with {}/{} fragments",
                    ctx.fragments.len(),
                    ctx.total_fragments
                );
            }
        }
        expired.len()
    }

    pub fn pending_contexts(&self) -> usize {
        self.state.lock().unwrap().contexts.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.state.lock().unwrap().buffered_bytes
    }

    /// Earliest arrival time of any buffered fragment, for diagnostics.
    pub fn oldest_fragment_at(&self) -> Option<Instant> {
        let state = self.state.lock().unwrap();
        state
            .contexts
            .values()
            .flat_map(|ctx| ctx.fragments.values().map(|slot| slot.first_seen))
            .min()
    }
}
