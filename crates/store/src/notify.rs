//! Notification sinks
//!
//! A sink is the write end of one client's notification channel. The store
//! fans mutations out through sinks while holding bucket locks, so a send
//! must never block: it is one fixed-width write attempt, and a sink that
//! cannot accept the record right now (full pipe) fails the attempt and the
//! record is dropped by the caller with a warning.
//!
//! The server implements this trait over a named pipe opened with
//! `O_NONBLOCK`; tests use [`CollectingSink`].

use std::io;

use parking_lot::Mutex;
use pipekvs_core::protocol::decode_notification;
use pipekvs_core::NOTIFICATION_LEN;

/// Write end of a client's notification channel.
///
/// `send` must perform at most one non-blocking write of the whole record.
/// Records are fixed-width ([`NOTIFICATION_LEN`] bytes), which keeps each
/// delivery a single atomic pipe write.
pub trait NotificationSink: Send + Sync {
    /// Attempt to deliver one notification record.
    fn send(&self, record: &[u8; NOTIFICATION_LEN]) -> io::Result<()>;
}

/// In-memory sink that stores every delivered record, for tests.
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<[u8; NOTIFICATION_LEN]>>,
}

impl CollectingSink {
    /// Create an empty collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw records in delivery order.
    pub fn raw(&self) -> Vec<[u8; NOTIFICATION_LEN]> {
        self.records.lock().clone()
    }

    /// Decoded `(key, value)` pairs in delivery order.
    pub fn decoded(&self) -> Vec<(String, String)> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| decode_notification(r).ok())
            .collect()
    }

    /// Number of records delivered so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no record has been delivered.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl NotificationSink for CollectingSink {
    fn send(&self, record: &[u8; NOTIFICATION_LEN]) -> io::Result<()> {
        self.records.lock().push(*record);
        Ok(())
    }
}
