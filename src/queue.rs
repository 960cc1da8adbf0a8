// CLASSIFICATION: COMMUNITY
// Filename: queue.rs v0.4
// Author: Lukas Bower
// Date Modified: 2029-04-02

//! Shared FIFO queue between dial-out handlers and the output dispatcher.
//!
//! Every listener's handler pushes into one process-wide queue, so all
//! telemetry from all connected devices interleaves into a single logical
//! stream. FIFO order is guaranteed per handler; the cross-handler order is
//! whatever interleaving actually occurred.

use crate::decode::FlattenedRecord;
use log::warn;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Queue depth at which an operator warning is emitted. The queue itself is
/// unbounded; nothing forces a drain.
const DEPTH_WARN_INTERVAL: usize = 10_000;

/// One decoded telemetry group from an inbound chunk.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryMessage {
    /// Human-readable wall clock derived from the device epoch-millis.
    pub timestamp: String,
    pub subscription: String,
    pub node: String,
    pub subscribe_path: String,
    pub fields: Vec<FlattenedRecord>,
}

/// A queued record: a structured message, or the raw envelope dump text
/// produced in raw output mode.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueueRecord {
    Message(TelemetryMessage),
    Raw { raw: String },
}

/// Mutex-guarded deque shared via `Arc` between handler tasks and the
/// dispatcher. Push and drain never block on network or disk.
#[derive(Debug, Default)]
pub struct RecordQueue {
    inner: Mutex<VecDeque<QueueRecord>>,
}

impl RecordQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record at the tail.
    pub fn push(&self, record: QueueRecord) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.push_back(record);
        if inner.len() % DEPTH_WARN_INTERVAL == 0 {
            warn!(
                "record queue holds {} entries and nothing is draining it",
                inner.len()
            );
        }
    }

    /// Pop every record currently queued, oldest first. Records pushed
    /// concurrently during the drain may or may not be included.
    pub fn drain_all(&self) -> Vec<QueueRecord> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn raw(text: &str) -> QueueRecord {
        QueueRecord::Raw { raw: text.into() }
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let queue = RecordQueue::new();
        queue.push(raw("a"));
        queue.push(raw("b"));
        queue.push(raw("c"));
        let drained = queue.drain_all();
        assert_eq!(drained, vec![raw("a"), raw("b"), raw("c")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_pushes_all_drain_exactly_once() {
        let queue = Arc::new(RecordQueue::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    queue.push(raw(&format!("{t}-{i}")));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let drained = queue.drain_all();
        assert_eq!(drained.len(), 8 * 250);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn per_thread_order_is_preserved() {
        let queue = Arc::new(RecordQueue::new());
        let writer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    queue.push(raw(&format!("{i}")));
                }
            })
        };
        writer.join().unwrap();
        let drained = queue.drain_all();
        let expected: Vec<_> = (0..100).map(|i| raw(&format!("{i}"))).collect();
        assert_eq!(drained, expected);
    }
}
