//! Audit capture pipeline
//!
//! Records flow through a bounded in-process queue to a background
//! persister. The request path only ever takes a short lock to enqueue;
//! it never waits on persistence. When the queue is full the oldest
//! record is dropped and counted.

use crate::model::AuditRecord;
use crate::storage::AuditRepo;
use crate::telemetry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Bounded FIFO between request handlers and the persister
#[derive(Clone)]
pub struct AuditQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    queue: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
    notify: Notify,
}

impl AuditQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity: capacity.max(1),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue a record without ever blocking
    ///
    /// On overflow the oldest queued record is dropped and
    /// `mcpgw_audit_dropped_total` is incremented.
    pub fn enqueue(&self, record: AuditRecord) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                telemetry::record_audit_dropped();
                tracing::warn!("audit queue full, dropped oldest record");
            }
            queue.push_back(record);
        }
        self.inner.notify.notify_one();
    }

    /// Records currently waiting (used by tests and readiness probes)
    pub fn depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    fn pop(&self) -> Option<AuditRecord> {
        self.inner.queue.lock().pop_front()
    }

    async fn wait(&self) {
        self.inner.notify.notified().await;
    }
}

/// Start the background persister for a queue
///
/// The persister runs on a detached task with its own root context; the
/// requests that produced the records are long gone by the time they are
/// written.
pub fn spawn_persister(queue: AuditQueue, repo: Arc<dyn AuditRepo>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            while let Some(record) = queue.pop() {
                persist_with_retry(repo.as_ref(), &record).await;
            }
            queue.wait().await;
        }
    })
}

/// Write one record, retrying transient failures with doubling backoff
async fn persist_with_retry(repo: &dyn AuditRepo, record: &AuditRecord) {
    let mut backoff = Duration::from_millis(100);
    for attempt in 0..3 {
        match repo.create(record).await {
            Ok(()) => return,
            Err(e) if attempt < 2 => {
                tracing::debug!(
                    request_id = %record.request_id,
                    "audit persist attempt {} failed, retrying: {}",
                    attempt + 1,
                    e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %record.request_id,
                    "dropping audit record after retries: {}",
                    e
                );
            }
        }
    }
}
