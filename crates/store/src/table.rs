//! Bucketed hash table
//!
//! 26 fixed buckets selected by the first byte of the key. Each bucket owns
//! a reader/writer-locked list of entries; the table additionally owns a
//! table-level lock (`trw`) that whole-table operations take in write mode
//! to exclude every batch (batches hold it in read mode for their whole
//! lifetime).
//!
//! Entry-level operations here assume the caller already holds the
//! appropriate bucket guard; the batch layer in [`crate::ops`] is
//! responsible for acquiring guards in the canonical order.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use pipekvs_core::{NOTIFICATION_LEN, TABLE_SIZE};
use tracing::warn;

use crate::notify::NotificationSink;
use crate::session::SessionId;

/// Outcome of writing a pair into a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The key was absent; a new entry was created.
    Inserted,
    /// The key existed; its value was replaced.
    Updated,
}

/// One key's record: the pair itself plus its subscription index.
///
/// The subscriber map is ordered by session id so notification fan-out is
/// deterministic. It sits behind its own mutex (taken only under this
/// entry's bucket guard) so that SUBSCRIBE can attach under a bucket *read*
/// lock without blocking concurrent readers of the bucket.
pub struct KeyEntry {
    key: String,
    value: String,
    subs: Mutex<BTreeMap<SessionId, Arc<dyn NotificationSink>>>,
}

impl KeyEntry {
    fn new(key: &str, value: &str) -> Self {
        KeyEntry {
            key: key.to_string(),
            value: value.to_string(),
            subs: Mutex::new(BTreeMap::new()),
        }
    }

    /// The entry's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The entry's current value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Attach a session's sink. Returns false if the session was already
    /// subscribed.
    pub fn subscribe(&self, session: SessionId, sink: Arc<dyn NotificationSink>) -> bool {
        self.subs.lock().insert(session, sink).is_none()
    }

    /// Detach a session's sink. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, session: SessionId) -> bool {
        self.subs.lock().remove(&session).is_some()
    }

    /// Session ids currently subscribed, in ascending order.
    pub fn subscriber_ids(&self) -> Vec<SessionId> {
        self.subs.lock().keys().copied().collect()
    }

    /// Deliver one record to every subscriber in ascending session order.
    ///
    /// Sends are non-blocking attempts; a sink that cannot accept the
    /// record loses it, with a warning.
    pub fn notify(&self, record: &[u8; NOTIFICATION_LEN]) {
        for (&session, sink) in self.subs.lock().iter() {
            if let Err(e) = sink.send(record) {
                warn!(session, key = %self.key, error = %e, "dropped notification");
            }
        }
    }
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("subscribers", &self.subs.lock().len())
            .finish()
    }
}

/// Entry list of one bucket, behind the bucket's reader/writer lock.
pub type BucketEntries = Vec<KeyEntry>;

/// One of the 26 table buckets.
pub struct Bucket {
    entries: RwLock<BucketEntries>,
}

impl Bucket {
    fn new() -> Self {
        Bucket {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Acquire this bucket's read guard.
    pub fn read(&self) -> RwLockReadGuard<'_, BucketEntries> {
        self.entries.read()
    }

    /// Acquire this bucket's write guard.
    pub fn write(&self) -> RwLockWriteGuard<'_, BucketEntries> {
        self.entries.write()
    }
}

/// Find an entry by key (byte-equal) in a locked bucket.
pub fn find_entry<'a>(entries: &'a BucketEntries, key: &str) -> Option<&'a KeyEntry> {
    entries.iter().find(|e| e.key == key)
}

/// Insert or update a pair in a locked bucket.
///
/// Keys are byte-compared, so `"A"` and `"a"` are distinct entries that
/// happen to share a bucket. At most one entry per key ever exists.
pub fn write_entry(entries: &mut BucketEntries, key: &str, value: &str) -> WriteOutcome {
    if let Some(entry) = entries.iter_mut().find(|e| e.key == key) {
        entry.value = value.to_string();
        return WriteOutcome::Updated;
    }
    entries.push(KeyEntry::new(key, value));
    WriteOutcome::Inserted
}

/// Detach and return the entry for `key`, if present, from a locked bucket.
///
/// The caller owns the teardown: notifying subscribers and removing the
/// key from each subscribed session before dropping the entry.
pub fn take_entry(entries: &mut BucketEntries, key: &str) -> Option<KeyEntry> {
    let pos = entries.iter().position(|e| e.key == key)?;
    Some(entries.remove(pos))
}

/// The bucketed map plus the table-level lock.
pub struct Table {
    buckets: [Bucket; TABLE_SIZE],
    trw: RwLock<()>,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Table {
            buckets: std::array::from_fn(|_| Bucket::new()),
            trw: RwLock::new(()),
        }
    }

    /// Bucket by index. Panics on an out-of-range index, which the hash
    /// function cannot produce.
    pub fn bucket(&self, index: usize) -> &Bucket {
        &self.buckets[index]
    }

    /// Hold the table lock in read mode for the duration of a batch.
    pub fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.trw.read()
    }

    /// Hold the table lock in write mode, excluding every batch.
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.trw.write()
    }

    /// Total number of live entries, for diagnostics.
    pub fn entry_count(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("buckets", &TABLE_SIZE)
            .field("entries", &self.entry_count())
            .finish()
    }
}
