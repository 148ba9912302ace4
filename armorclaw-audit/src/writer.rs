//! Optional buffered write mode.
//!
//! Appends are synchronous by default. When throughput matters more than
//! the small loss window, [`BufferedAuditWriter`] queues events on a
//! bounded channel and a background task drains them into the log;
//! [`BufferedAuditWriter::shutdown`] flushes whatever is still queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::{AuditError, AuditEvent, AuditLog};

/// Bounded-queue front end for an [`AuditLog`].
pub struct BufferedAuditWriter {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl BufferedAuditWriter {
    /// Start the drain task with the given queue capacity.
    pub fn start(log: Arc<AuditLog>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = log.log_entry(event).await {
                    error!(error = %e, "buffered audit append failed");
                }
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            task,
        }
    }

    /// Queue an event. When the queue is full the event is dropped and
    /// counted; this is the loss window the buffered mode trades for
    /// throughput.
    pub fn enqueue(&self, event: AuditEvent) -> Result<(), AuditError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(total, "audit write queue full, event dropped");
                Err(AuditError::Append("write queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(AuditError::Append("writer shut down".to_string()))
            }
        }
    }

    /// Events dropped so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue and wait for the drain task to flush it.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armorclaw_crypto::SymmetricKey;
    use armorclaw_types::{Actor, ComplianceInfo, Resource, Severity};
    use tempfile::tempdir;

    fn event(tag: &str) -> AuditEvent {
        AuditEvent::new(
            tag,
            Actor::system(),
            "act",
            Resource::new("credential", "c"),
            ComplianceInfo::security(Severity::Low),
        )
    }

    #[tokio::test]
    async fn shutdown_flushes_queued_events() {
        let dir = tempdir().unwrap();
        let log = Arc::new(
            AuditLog::open(
                dir.path().join("audit.jsonl"),
                SymmetricKey::from_bytes(&[1u8; 32]).unwrap(),
            )
            .await
            .unwrap(),
        );
        let writer = BufferedAuditWriter::start(log.clone(), 16);
        for i in 0..5 {
            writer.enqueue(event(&format!("e{i}"))).unwrap();
        }
        writer.shutdown().await;
        assert_eq!(log.len().await, 5);
        assert!(log.verify().await.valid);
    }
}
