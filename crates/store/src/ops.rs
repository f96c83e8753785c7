//! Batch operations layer
//!
//! Every batch runs the same sequence:
//!
//! 1. Validate the keys and build the canonical permutation: indices sorted
//!    by case-insensitive byte comparison (stable, so equal keys keep their
//!    input order).
//! 2. Acquire the table lock in read mode.
//! 3. Acquire each touched bucket's lock exactly once, in ascending bucket
//!    index (write for WRITE/DELETE, read for READ).
//! 4. Do the per-key work in canonical order.
//! 5. Release everything (RAII).
//!
//! The canonical ordering is what makes concurrent multi-bucket batches
//! deadlock-free; the table lock is what lets SHOW, BACKUP and the backup
//! fork exclude all of them at once.
//!
//! Notifications are emitted while the mutated bucket is still locked, so a
//! subscriber never observes a notification for a value that a subsequent
//! read cannot see. Sinks are non-blocking, so holding the bucket guard
//! across the send cannot stall the batch.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;

use parking_lot::RwLockWriteGuard;
use pipekvs_core::protocol::{encode_notification, DELETED_VALUE};
use pipekvs_core::{bucket_index, validate_key, Error, Result, TABLE_SIZE};
use tracing::warn;

use crate::session::{AddKey, SessionId, SessionRegistry};
use crate::table::{find_entry, take_entry, write_entry, Table};

/// Case-insensitive byte comparison, the batch sort order.
fn caseless_cmp(a: &str, b: &str) -> Ordering {
    let left = a.bytes().map(|b| b.to_ascii_lowercase());
    let right = b.bytes().map(|b| b.to_ascii_lowercase());
    left.cmp(right)
}

/// Canonical permutation of `keys`: indices in case-insensitive sorted
/// order. The sort is stable, so byte-equal duplicates keep input order.
fn canonical_order<T, F>(items: &[T], key_of: F) -> Vec<usize>
where
    F: Fn(&T) -> &str,
{
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&i, &j| caseless_cmp(key_of(&items[i]), key_of(&items[j])));
    order
}

/// Guard over the table lock held in write mode.
///
/// Holding this excludes every batch; it is the frozen state the backup
/// protocol forks under. Dropping it thaws the table.
pub struct FreezeGuard<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

/// The key/value engine: the bucketed table plus the session registry.
///
/// All batch and subscription operations go through this type so that the
/// key→session and session→key cross-links always change together.
pub struct Kvs {
    table: Table,
    sessions: SessionRegistry,
}

impl Kvs {
    /// Create an empty engine.
    pub fn new() -> Self {
        Kvs {
            table: Table::new(),
            sessions: SessionRegistry::new(),
        }
    }

    /// The session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Number of live keys, for diagnostics and tests.
    pub fn entry_count(&self) -> usize {
        self.table.entry_count()
    }

    /// Read a single value without batch framing. Test and tooling helper.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let Some(index) = bucket_index(key) else {
            return Ok(None);
        };
        let _table = self.table.shared();
        let entries = self.table.bucket(index).read();
        Ok(find_entry(&entries, key).map(|e| e.value().to_string()))
    }

    /// Sessions currently subscribed to `key`, in ascending id order.
    /// Returns an empty list for an absent key.
    pub fn subscribers_of(&self, key: &str) -> Result<Vec<SessionId>> {
        validate_key(key)?;
        let Some(index) = bucket_index(key) else {
            return Ok(Vec::new());
        };
        let _table = self.table.shared();
        let entries = self.table.bucket(index).read();
        Ok(find_entry(&entries, key)
            .map(|e| e.subscriber_ids())
            .unwrap_or_default())
    }

    /// WRITE batch: insert or update every pair.
    ///
    /// Duplicate keys within one batch collapse to the earliest-indexed
    /// occurrence, so each key is written once and its subscribers receive
    /// exactly one notification for the batch.
    pub fn write(&self, pairs: &[(String, String)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        for (key, _) in pairs {
            validate_key(key)?;
        }
        let order = canonical_order(pairs, |p| p.0.as_str());

        let mut first_occurrence: HashMap<&str, usize> = HashMap::new();
        for (i, (key, _)) in pairs.iter().enumerate() {
            first_occurrence.entry(key.as_str()).or_insert(i);
        }

        let _table = self.table.shared();
        let mut guards = self.lock_write(pairs.iter().map(|p| p.0.as_str()));

        for &i in &order {
            let (key, value) = &pairs[i];
            if first_occurrence.get(key.as_str()) != Some(&i) {
                continue; // duplicate; the earliest-indexed occurrence wins
            }
            let Some(index) = bucket_index(key) else {
                continue;
            };
            let Some(entries) = guards[index].as_deref_mut() else {
                continue;
            };
            write_entry(entries, key, value);
            if let Some(entry) = find_entry(entries, key) {
                match encode_notification(key, value) {
                    Ok(record) => entry.notify(&record),
                    Err(e) => warn!(key = %key, error = %e, "notification not encodable"),
                }
            }
        }
        Ok(())
    }

    /// READ batch: one `[(k,v)(k2,KVSERROR)…]\n` line in canonical order.
    ///
    /// The framing brackets are emitted even for an empty batch; missing
    /// keys read as `KVSERROR`. An output failure aborts the batch.
    pub fn read<W: Write>(&self, keys: &[String], out: &mut W) -> Result<()> {
        for key in keys {
            validate_key(key)?;
        }
        let order = canonical_order(keys, |k| k.as_str());

        let _table = self.table.shared();
        let guards = self.lock_read(keys.iter().map(|k| k.as_str()));

        out.write_all(b"[")?;
        for &i in &order {
            let key = &keys[i];
            let Some(index) = bucket_index(key) else {
                continue;
            };
            let Some(entries) = guards[index].as_deref() else {
                continue;
            };
            match find_entry(entries, key) {
                Some(entry) => write!(out, "({},{})", key, entry.value())?,
                None => write!(out, "({key},KVSERROR)")?,
            }
        }
        out.write_all(b"]\n")?;
        Ok(())
    }

    /// DELETE batch: remove every present key, report only the misses.
    ///
    /// The miss list is framed `[`…`]\n` and emitted only when at least one
    /// key was absent. Every removed key notifies its subscribers with the
    /// `DELETED` value and is detached from each subscribed session before
    /// the entry is dropped.
    pub fn delete<W: Write>(&self, keys: &[String], out: &mut W) -> Result<()> {
        for key in keys {
            validate_key(key)?;
        }
        let order = canonical_order(keys, |k| k.as_str());

        let _table = self.table.shared();
        let mut guards = self.lock_write(keys.iter().map(|k| k.as_str()));

        let mut missing_open = false;
        for &i in &order {
            let key = &keys[i];
            let Some(index) = bucket_index(key) else {
                continue;
            };
            let Some(entries) = guards[index].as_deref_mut() else {
                continue;
            };
            match take_entry(entries, key) {
                Some(entry) => {
                    match encode_notification(key, DELETED_VALUE) {
                        Ok(record) => entry.notify(&record),
                        Err(e) => {
                            warn!(key = %key, error = %e, "notification not encodable")
                        }
                    }
                    for session in entry.subscriber_ids() {
                        if let Err(e) = self.sessions.remove_key(session, key) {
                            warn!(session, key = %key, error = %e, "cascade failed");
                        }
                    }
                }
                None => {
                    if !missing_open {
                        out.write_all(b"[")?;
                        missing_open = true;
                    }
                    write!(out, "({key},KVSMISSING)")?;
                }
            }
        }
        if missing_open {
            out.write_all(b"]\n")?;
        }
        Ok(())
    }

    /// SHOW: every pair as `(key, value)\n`, buckets in index order.
    ///
    /// Holds the table lock in write mode, so the emitted state is a
    /// point-in-time view no batch can interleave with.
    pub fn show<W: Write>(&self, out: &mut W) -> Result<()> {
        let _excl = self.table.exclusive();
        self.emit_all(out)
    }

    /// Emit the SHOW-format snapshot without taking the table lock.
    ///
    /// This is the backup child's path: after the fork the bucket locks are
    /// free (nobody held them at fork time) while the table lock is held by
    /// the parent's copy of the state and must not be touched.
    pub fn write_snapshot<W: Write>(&self, out: &mut W) -> Result<()> {
        self.emit_all(out)
    }

    fn emit_all<W: Write>(&self, out: &mut W) -> Result<()> {
        for index in 0..TABLE_SIZE {
            let entries = self.table.bucket(index).read();
            for entry in entries.iter() {
                writeln!(out, "({}, {})", entry.key(), entry.value())?;
            }
        }
        Ok(())
    }

    /// Take the table lock in write mode for the backup fork protocol:
    /// freeze, fork, drop.
    ///
    /// While the guard lives no batch can start or finish, so the forked
    /// child inherits a state no thread was mutating.
    pub fn freeze(&self) -> FreezeGuard<'_> {
        FreezeGuard {
            _guard: self.table.exclusive(),
        }
    }

    /// SUBSCRIBE: attach the session's sink to the key.
    ///
    /// Checks run in a fixed order: the subscription ceiling rejects first,
    /// an already-held key is an idempotent success, and only then does a
    /// missing key reject. The session side is recorded only once the key
    /// is known to exist, so no rollback is ever needed.
    pub fn subscribe(&self, session: SessionId, key: &str) -> Result<()> {
        validate_key(key)?;
        let sink = self.sessions.sink(session)?;
        let Some(index) = bucket_index(key) else {
            return Err(Error::RejectedKey(key.to_string()));
        };

        let _table = self.table.shared();
        let entries = self.table.bucket(index).read();
        match self.sessions.check_add(session, key)? {
            AddKey::AtLimit => return Err(Error::SubscriptionLimit(session)),
            AddKey::AlreadySubscribed => return Ok(()),
            AddKey::Added => {}
        }
        let entry =
            find_entry(&entries, key).ok_or_else(|| Error::KeyNotFound(key.to_string()))?;

        // the session's own worker is the only thread that adds keys, and
        // the bucket guard blocks a concurrent DELETE of this key, so the
        // probe's verdict still holds here
        match self.sessions.add_key(session, key)? {
            AddKey::AtLimit => Err(Error::SubscriptionLimit(session)),
            AddKey::AlreadySubscribed => Ok(()),
            AddKey::Added => {
                entry.subscribe(session, sink);
                Ok(())
            }
        }
    }

    /// UNSUBSCRIBE: detach the session from the key.
    ///
    /// Rejects when the session is not subscribed. The key itself may
    /// already be gone (a concurrent DELETE tears subscriptions down), in
    /// which case the session side was already cleaned and this rejects.
    pub fn unsubscribe(&self, session: SessionId, key: &str) -> Result<()> {
        validate_key(key)?;
        let Some(index) = bucket_index(key) else {
            return Err(Error::RejectedKey(key.to_string()));
        };

        let _table = self.table.shared();
        let entries = self.table.bucket(index).read();
        if !self.sessions.remove_key(session, key)? {
            return Err(Error::NotSubscribed {
                session,
                key: key.to_string(),
            });
        }
        if let Some(entry) = find_entry(&entries, key) {
            entry.unsubscribe(session);
        }
        Ok(())
    }

    /// DISCONNECT: tear down every subscription of the session and free
    /// its slot.
    pub fn disconnect(&self, session: SessionId) -> Result<()> {
        self.sessions.begin_close(session)?;
        let keys = self.sessions.subscribed_keys(session)?;
        {
            let _table = self.table.shared();
            for key in &keys {
                let Some(index) = bucket_index(key) else {
                    continue;
                };
                let entries = self.table.bucket(index).write();
                if let Some(entry) = find_entry(&entries, key) {
                    entry.unsubscribe(session);
                }
                if let Err(e) = self.sessions.remove_key(session, key) {
                    warn!(session, key = %key, error = %e, "cascade failed");
                }
            }
        }
        self.sessions.release(session)
    }

    /// Acquire write guards for every bucket the keys touch, ascending.
    fn lock_write<'a, I>(
        &self,
        keys: I,
    ) -> Vec<Option<RwLockWriteGuard<'_, crate::table::BucketEntries>>>
    where
        I: Iterator<Item = &'a str>,
    {
        let touched: BTreeSet<usize> = keys.filter_map(bucket_index).collect();
        let mut guards: Vec<_> = (0..TABLE_SIZE).map(|_| None).collect();
        for index in touched {
            guards[index] = Some(self.table.bucket(index).write());
        }
        guards
    }

    /// Acquire read guards for every bucket the keys touch, ascending.
    fn lock_read<'a, I>(
        &self,
        keys: I,
    ) -> Vec<Option<parking_lot::RwLockReadGuard<'_, crate::table::BucketEntries>>>
    where
        I: Iterator<Item = &'a str>,
    {
        let touched: BTreeSet<usize> = keys.filter_map(bucket_index).collect();
        let mut guards: Vec<_> = (0..TABLE_SIZE).map(|_| None).collect();
        for index in touched {
            guards[index] = Some(self.table.bucket(index).read());
        }
        guards
    }
}

impl Default for Kvs {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Kvs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kvs")
            .field("entries", &self.entry_count())
            .field("sessions", &self.sessions)
            .finish()
    }
}
