use crate::handshake::frame_type;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use xeno_wire::Transport;

#[derive(Debug, Clone)]
pub struct RecordBatchConfig {
    pub enabled: bool,
    /// Drain once this many queued bytes accumulate.
    pub max_batch_size: usize,
    /// Records smaller than this bypass the batcher.
    pub min_message_size: usize,
    pub max_messages_per_batch: usize,
    /// Drain once the oldest queued record is this old.
    pub max_delay: Duration,
}

impl Default for RecordBatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: 16 * 1024,
            min_message_size: 512,
            max_messages_per_batch: 32,
            max_delay: Duration::from_millis(20),
        }
    }
}

struct BatchQueue {
    records: VecDeque<(Vec<u8>, Instant)>,
    queued_bytes: usize,
}

struct Shared {
    queue: Mutex<BatchQueue>,
    cond: Condvar,
    stop: AtomicBool,
}

/// Wraps one or more raw records into a single RECORD frame, each entry
/// length-prefixed so the receiver can split a drained batch.
pub(crate) fn record_frame(records: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = records.iter().map(|r| 4 + r.len()).sum();
    let mut frame = Vec::with_capacity(1 + total);
    frame.push(frame_type::RECORD);
    for record in records {
        frame.extend_from_slice(&(record.len() as u32).to_le_bytes());
        frame.extend_from_slice(record);
    }
    frame
}

/// Background batcher draining queued records to the link whenever byte,
/// count, or age thresholds trip.
pub(crate) struct RecordBatcher {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    config: RecordBatchConfig,
}

impl RecordBatcher {
    pub fn start(config: RecordBatchConfig, link: Arc<dyn Transport>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BatchQueue {
                records: VecDeque::new(),
                queued_bytes: 0,
            }),
            cond: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_config = config.clone();
        let worker = std::thread::Builder::new()
            .name("xeno-record-batch".to_string())
            .spawn(move || run_worker(worker_shared, worker_config, link))
            .expect("spawn batch worker");

        Self {
            shared,
            worker: Some(worker),
            config,
        }
    }

    pub fn enqueue(&self, record: Vec<u8>) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.queued_bytes += record.len();
        queue.records.push_back((record, Instant::now()));
        let should_wake = queue.queued_bytes >= self.config.max_batch_size
            || queue.records.len() >= self.config.max_messages_per_batch;
        drop(queue);
        if should_wake {
            self.shared.cond.notify_one();
        }
    }

    pub fn queued_records(&self) -> usize {
        self.shared.queue.lock().unwrap().records.len()
    }

    /// Stops the worker and flushes anything still queued.
    pub fn shutdown(&mut self, link: &dyn Transport) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let mut queue = self.shared.queue.lock().unwrap();
        let leftover: Vec<Vec<u8>> = queue.records.drain(..).map(|(r, _)| r).collect();
        queue.queued_bytes = 0;
        drop(queue);
        if !leftover.is_empty() {
            if let Err(e) = link.send_frame(&record_frame(&leftover)) {
                tracing::warn!("failed to flush {} batched records: {e}", leftover.len());
            }
        }
    }
}

impl Drop for RecordBatcher {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: Arc<Shared>, config: RecordBatchConfig, link: Arc<dyn Transport>) {
    loop {
        let batch: Vec<Vec<u8>> = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.stop.load(Ordering::SeqCst) {
                    return;
                }
                let now = Instant::now();
                let oldest_age = queue
                    .records
                    .front()
                    .map(|(_, at)| now.duration_since(*at));
                let ready = queue.queued_bytes >= config.max_batch_size
                    || queue.records.len() >= config.max_messages_per_batch
                    || oldest_age.is_some_and(|age| age >= config.max_delay);
                if ready {
                    break;
                }
                let wait = match oldest_age {
                    Some(age) => config.max_delay.saturating_sub(age),
                    None => config.max_delay,
                };
                let (guard, _) = shared.cond.wait_timeout(queue, wait).unwrap();
                queue = guard;
            }
            queue.queued_bytes = 0;
            queue.records.drain(..).map(|(r, _)| r).collect()
        };

        if batch.is_empty() {
            continue;
        }
        tracing::debug!("draining record batch of {} records", batch.len());
        if let Err(e) = link.send_frame(&record_frame(&batch)) {
            tracing::warn!("batch drain failed: {e}");
        }
    }
}
