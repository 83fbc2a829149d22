//! Access-log sinks.
//!
//! The engine emits one [`AccessRecord`] per decision through a
//! [`AccessLogSink`]. Sinks must never block the authorize critical path;
//! [`BufferedSink`] wraps any sink with an unbounded channel drained by a
//! background task. Delivery failure is logged and never alters a decision.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::warn;

use crate::engine::record::AccessRecord;

/// A write-only destination for access records.
pub trait AccessLogSink: Send + Sync {
    fn send(&self, record: AccessRecord);
}

/// Writes each record as a JSON line on stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl AccessLogSink for StdoutSink {
    fn send(&self, record: AccessRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to serialize access record: {e}"),
        }
    }
}

/// Captures records in memory; used by tests and probes of the audit trail.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AccessRecord>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<AccessRecord> {
        self.records.lock().expect("access log poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("access log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccessLogSink for MemorySink {
    fn send(&self, record: AccessRecord) {
        self.records.lock().expect("access log poisoned").push(record);
    }
}

/// Decouples record delivery from the authorize path: records are queued on
/// an unbounded channel and written by a background task. Records queued
/// after the task stops are dropped with a warning.
pub struct BufferedSink {
    tx: mpsc::UnboundedSender<AccessRecord>,
}

impl BufferedSink {
    /// Spawn the writer task on the current runtime.
    pub fn spawn(inner: Arc<dyn AccessLogSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AccessRecord>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                inner.send(record);
            }
        });
        BufferedSink { tx }
    }
}

impl AccessLogSink for BufferedSink {
    fn send(&self, record: AccessRecord) {
        if self.tx.send(record).is_err() {
            warn!("access log writer stopped; dropping record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::AccessRecord;

    fn record() -> AccessRecord {
        AccessRecord::skeleton(
            "alice".into(),
            "realm".into(),
            "op".into(),
            "mrn:fs:/x".into(),
            None,
        )
    }

    #[test]
    fn memory_sink_captures_in_order() {
        let sink = MemorySink::new();
        sink.send(record());
        sink.send(record());
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn buffered_sink_drains_to_inner() {
        let inner = MemorySink::new();
        let buffered = BufferedSink::spawn(inner.clone() as Arc<dyn AccessLogSink>);
        buffered.send(record());
        // Let the writer task run.
        for _ in 0..100 {
            if !inner.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(inner.len(), 1);
    }
}
