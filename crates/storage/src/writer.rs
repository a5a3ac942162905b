//! CDC writer: buffers change events and flushes them as L0 chunks
//!
//! One writer serves one namespace. Events accumulate in an in-memory
//! buffer and are flushed when either the buffer reaches
//! `max_batch_size` or the periodic flush interval elapses, whichever
//! comes first.
//!
//! # Failure handling
//!
//! A flush uploads one encoded chunk, retrying transient blob-store errors
//! with exponential backoff. On terminal failure the buffer is preserved
//! intact for a later retry and an error event is emitted to the registered
//! listener. Explicit [`CdcWriter::flush`] calls surface terminal errors;
//! interval-driven flushes never propagate them.
//!
//! # Concurrency
//!
//! `write` and `flush` may be called from any thread. Flushes serialize
//! through a guard, so at most one flush is in flight per writer, and the
//! buffer prefix is only consumed after its chunk is durably stored. Events
//! are never reordered.
//!
//! `close` stops the flush timer and does **not** implicitly flush; callers
//! that want the tail persisted flush first.

use crate::blob::BlobStore;
use crate::chunk::encode_chunk;
use crate::error::{Result, StorageError};
use crate::paths::{chunk_path, Level};
use lattice_core::{now_millis, CdcEvent, Namespace};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for a CDC writer
#[derive(Debug, Clone)]
pub struct CdcWriterConfig {
    /// Flush when the buffer reaches this many events
    pub max_batch_size: usize,
    /// Periodic flush interval; zero disables the background timer
    pub flush_interval: Duration,
    /// Total upload attempts per flush, including the first
    pub max_retries: u32,
    /// Base backoff; attempt `n` waits `retry_backoff * 2^(n-1)`
    pub retry_backoff: Duration,
}

impl Default for CdcWriterConfig {
    fn default() -> Self {
        CdcWriterConfig {
            max_batch_size: 1000,
            flush_interval: Duration::from_millis(100),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Counters describing a writer's lifetime activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Events currently buffered
    pub pending_events: usize,
    /// Events persisted across all flushes
    pub events_written: u64,
    /// Chunks uploaded
    pub chunks_written: u64,
    /// Flushes that exhausted their retry budget
    pub flush_failures: u64,
    /// Upload retries performed
    pub retries: u64,
    /// Completion time of the last successful flush
    pub last_flush_ms: Option<u64>,
    /// Message of the most recent terminal flush error
    pub last_error: Option<String>,
}

/// Emitted when a flush exhausts its retry budget
#[derive(Debug, Clone)]
pub struct WriterErrorEvent {
    /// Terminal error message
    pub error: String,
    /// Events that remain buffered
    pub event_count: usize,
    /// Upload attempts made
    pub attempts: u32,
    /// The writer's namespace
    pub namespace: String,
    /// When the failure was recorded
    pub timestamp_ms: u64,
}

type ErrorListener = Box<dyn Fn(WriterErrorEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct FlushSequence {
    /// Millisecond of the most recent chunk path
    last_ms: u64,
    /// Suffix used within that millisecond
    seq: u32,
}

struct WriterShared {
    namespace: Namespace,
    ns_path: String,
    config: CdcWriterConfig,
    blob: Arc<dyn BlobStore>,
    buffer: Mutex<VecDeque<CdcEvent>>,
    /// Serializes flushes and owns the path sequence state
    flush_guard: Mutex<FlushSequence>,
    stats: Mutex<WriterStats>,
    listener: Mutex<Option<ErrorListener>>,
    closed: AtomicBool,
}

impl WriterShared {
    fn flush(&self) -> Result<usize> {
        let mut sequence = self.flush_guard.lock();

        let batch: Vec<CdcEvent> = {
            let buffer = self.buffer.lock();
            buffer.iter().cloned().collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        // Paths derive from the batch's maximum timestamp; a monotonic
        // suffix disambiguates two flushes inside the same millisecond.
        let max_ts = batch
            .iter()
            .map(CdcEvent::timestamp_ms)
            .max()
            .unwrap_or_else(now_millis);
        let seq = if max_ts == sequence.last_ms {
            sequence.seq + 1
        } else {
            0
        };
        let path = chunk_path(&self.ns_path, Level::L0, max_ts, seq);
        let bytes = encode_chunk(&batch);

        let mut attempt = 0u32;
        let terminal = loop {
            attempt += 1;
            match self.blob.put(&path, &bytes) {
                Ok(_) => break None,
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    self.stats.lock().retries += 1;
                    let backoff = self.config.retry_backoff * 2u32.pow(attempt - 1);
                    warn!(
                        namespace = %self.namespace,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "chunk upload failed, backing off"
                    );
                    std::thread::sleep(backoff);
                }
                Err(e) => break Some(e),
            }
        };

        if let Some(error) = terminal {
            let message = error.to_string();
            let pending = self.buffer.lock().len();
            {
                let mut stats = self.stats.lock();
                stats.flush_failures += 1;
                stats.last_error = Some(message.clone());
                stats.pending_events = pending;
            }
            let event = WriterErrorEvent {
                error: message.clone(),
                event_count: batch.len(),
                attempts: attempt,
                namespace: self.namespace.to_string(),
                timestamp_ms: now_millis(),
            };
            if let Some(listener) = self.listener.lock().as_ref() {
                listener(event);
            }
            return Err(StorageError::FlushFailed {
                attempts: attempt,
                event_count: batch.len(),
                message,
            });
        }

        sequence.last_ms = max_ts;
        sequence.seq = seq;

        // Consume exactly the flushed prefix; later writes stay queued.
        {
            let mut buffer = self.buffer.lock();
            for _ in 0..batch.len() {
                buffer.pop_front();
            }
            let mut stats = self.stats.lock();
            stats.events_written += batch.len() as u64;
            stats.chunks_written += 1;
            stats.last_flush_ms = Some(now_millis());
            stats.pending_events = buffer.len();
        }

        info!(
            namespace = %self.namespace,
            chunk = %path,
            events = batch.len(),
            "flushed CDC batch"
        );
        Ok(batch.len())
    }

    fn interval_flush(&self) {
        if self.buffer.lock().is_empty() {
            return;
        }
        // Interval flushes preserve the buffer silently on failure; the
        // error event has already been emitted.
        if let Err(e) = self.flush() {
            debug!(namespace = %self.namespace, error = %e, "interval flush failed");
        }
    }
}

struct Ticker {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

/// A per-namespace CDC writer
pub struct CdcWriter {
    shared: Arc<WriterShared>,
    ticker: Option<Ticker>,
}

impl CdcWriter {
    /// Create a writer for a namespace
    ///
    /// Spawns the periodic flush timer unless `flush_interval` is zero.
    pub fn new(namespace: Namespace, blob: Arc<dyn BlobStore>, config: CdcWriterConfig) -> Self {
        let ns_path = namespace.storage_path();
        let shared = Arc::new(WriterShared {
            namespace,
            ns_path,
            config: config.clone(),
            blob,
            buffer: Mutex::new(VecDeque::new()),
            flush_guard: Mutex::new(FlushSequence::default()),
            stats: Mutex::new(WriterStats::default()),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let ticker = if config.flush_interval > Duration::ZERO {
            Some(Self::spawn_ticker(Arc::clone(&shared), config.flush_interval))
        } else {
            None
        };

        CdcWriter { shared, ticker }
    }

    fn spawn_ticker(shared: Arc<WriterShared>, interval: Duration) -> Ticker {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_for_thread = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("lattice-cdc-flush".to_string())
            .spawn(move || loop {
                let (lock, cvar) = &*stop_for_thread;
                let mut stopped = lock.lock();
                if *stopped {
                    break;
                }
                cvar.wait_for(&mut stopped, interval);
                if *stopped {
                    break;
                }
                drop(stopped);
                shared.interval_flush();
            })
            .expect("failed to spawn flush timer thread");
        Ticker {
            stop,
            handle: Some(handle),
        }
    }

    /// Register a listener for terminal flush failures
    pub fn set_error_listener<F>(&self, listener: F)
    where
        F: Fn(WriterErrorEvent) + Send + Sync + 'static,
    {
        *self.shared.listener.lock() = Some(Box::new(listener));
    }

    /// Accept a CDC event
    ///
    /// Triggers a flush when the buffer reaches `max_batch_size`; errors
    /// from that flush surface here while the buffer stays intact.
    pub fn write(&self, event: CdcEvent) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(StorageError::WriterClosed);
        }
        let should_flush = {
            let mut buffer = self.shared.buffer.lock();
            buffer.push_back(event);
            self.shared.stats.lock().pending_events = buffer.len();
            buffer.len() >= self.shared.config.max_batch_size
        };
        if should_flush {
            self.shared.flush()?;
        }
        Ok(())
    }

    /// Flush the buffer now, surfacing terminal failures
    ///
    /// Returns the number of events persisted.
    pub fn flush(&self) -> Result<usize> {
        self.shared.flush()
    }

    /// Number of events currently buffered
    pub fn pending_event_count(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    /// Snapshot of the writer's counters
    pub fn stats(&self) -> WriterStats {
        let mut stats = self.shared.stats.lock().clone();
        stats.pending_events = self.shared.buffer.lock().len();
        stats
    }

    /// Stop the flush timer
    ///
    /// Does not flush; buffered events stay in memory until the caller
    /// flushes explicitly or drops the writer.
    pub fn close(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(mut ticker) = self.ticker.take() {
            {
                let (lock, cvar) = &*ticker.stop;
                *lock.lock() = true;
                cvar.notify_all();
            }
            if let Some(handle) = ticker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for CdcWriter {
    fn drop(&mut self) {
        self.close();
    }
}
