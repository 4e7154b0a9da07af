//! Request audit trail.
//!
//! Every gated request produces one [`AuditRecord`]. Records go through a
//! bounded queue to a background task that writes them to an [`AuditSink`],
//! so a slow or broken sink never delays a response. When the queue is full
//! the record is dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::store::StoreError;

/// Default queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default per-write timeout.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Audit queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    /// Records buffered before new ones are dropped
    pub queue_capacity: usize,
    /// Longest a single sink write may take
    pub write_timeout: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// One handled request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub method: String,
    pub path: String,
    /// Token subject; `None` when authentication failed
    pub subject: Option<String>,
    pub status: u16,
    pub duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Duration in whole milliseconds, saturating.
    pub fn duration_ms(&self) -> i32 {
        i32::try_from(self.duration.as_millis()).unwrap_or(i32::MAX)
    }
}

/// Durable destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: &AuditRecord) -> Result<(), StoreError>;
}

enum Command {
    Record(AuditRecord),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    sender: mpsc::Sender<Command>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Record(record) => f.debug_tuple("Record").field(record).finish(),
            Command::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl AuditLogger {
    /// Start the background writer. Must be called inside a Tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, config: &AuditConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let write_timeout = config.write_timeout;

        tokio::spawn(async move {
            run_writer(receiver, sink, write_timeout).await;
        });

        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a record without waiting.
    pub fn record(&self, record: AuditRecord) {
        match self.sender.try_send(Command::Record(record)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Command::Record(record))) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    method = %record.method,
                    path = %record.path,
                    status = record.status,
                    dropped_total = total,
                    "audit queue full, dropping record"
                );
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("audit writer stopped, dropping record");
            }
        }
    }

    /// Wait until every record queued before this call has been handled.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Command::Flush(done)).await.is_err() {
            return;
        }
        let _ = wait.await;
    }

    /// Records dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_writer(
    mut receiver: mpsc::Receiver<Command>,
    sink: Arc<dyn AuditSink>,
    write_timeout: Duration,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Record(record) => {
                match tokio::time::timeout(write_timeout, sink.write(&record)).await {
                    Ok(Ok(())) => {
                        debug!(path = %record.path, status = record.status, "audit record written");
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, path = %record.path, "audit write failed");
                    }
                    Err(_) => {
                        warn!(
                            timeout_ms = write_timeout.as_millis() as u64,
                            path = %record.path,
                            "audit write timed out"
                        );
                    }
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    info!("audit writer shut down");
}

/// In-memory sink, for tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    failing: bool,
    delay: Duration,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writes always fail.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Make every write take this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Records written so far.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), StoreError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing {
            return Err(StoreError::Unavailable("sink is down".to_string()));
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
