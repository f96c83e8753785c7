//! Session registry
//!
//! Fixed array of `MAX_SESSIONS` slots; a session id is its slot index.
//! Each slot tracks the connection state machine and the session's
//! subscribed-key set.
//!
//! The key set sits behind the slot's leaf-level mutex: the owning session
//! worker mutates it on SUBSCRIBE/UNSUBSCRIBE, and the DELETE path of any
//! job worker mutates it when tearing down subscriptions to a removed key.
//! That mutex is never held while acquiring any other lock.
//!
//! State machine per slot:
//!
//! ```text
//! FREE ── CONNECT accepted ──▶ CONNECTING
//! CONNECTING ── pipes opened ──▶ ACTIVE
//! CONNECTING ── pipe open failed ──▶ CLOSING ──▶ FREE
//! ACTIVE ── DISCONNECT | EOF on request pipe ──▶ CLOSING ──▶ FREE
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use pipekvs_core::{Error, Result, MAX_SESSIONS, MAX_SUBS_PER_SESSION};

use crate::notify::NotificationSink;

/// Identifier of a session: its slot index in `[0, MAX_SESSIONS)`.
pub type SessionId = usize;

/// Connection state of a session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Slot is unused.
    Free,
    /// CONNECT accepted, pipes not yet open.
    Connecting,
    /// Session is being served.
    Active,
    /// Teardown in progress.
    Closing,
}

/// Outcome of attempting to record a subscription on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddKey {
    /// Key recorded; the caller must attach the sink on the key side.
    Added,
    /// Session was already subscribed; idempotent success.
    AlreadySubscribed,
    /// Session is at `MAX_SUBS_PER_SESSION`.
    AtLimit,
}

struct SlotInner {
    state: SessionState,
    sink: Option<Arc<dyn NotificationSink>>,
}

struct SessionSubs {
    keys: BTreeSet<String>,
    count: usize,
}

impl SessionSubs {
    fn check(&self) {
        debug_assert_eq!(self.count, self.keys.len());
    }
}

/// One session slot.
pub struct SessionSlot {
    inner: Mutex<SlotInner>,
    subs: Mutex<SessionSubs>,
}

impl SessionSlot {
    fn new() -> Self {
        SessionSlot {
            inner: Mutex::new(SlotInner {
                state: SessionState::Free,
                sink: None,
            }),
            subs: Mutex::new(SessionSubs {
                keys: BTreeSet::new(),
                count: 0,
            }),
        }
    }
}

/// The fixed-capacity registry of client sessions.
pub struct SessionRegistry {
    slots: [SessionSlot; MAX_SESSIONS],
}

impl SessionRegistry {
    /// Create a registry with every slot free.
    pub fn new() -> Self {
        SessionRegistry {
            slots: std::array::from_fn(|_| SessionSlot::new()),
        }
    }

    fn slot(&self, id: SessionId) -> Result<&SessionSlot> {
        self.slots.get(id).ok_or(Error::SessionUnavailable(id))
    }

    /// Claim a free slot for an accepted connection.
    ///
    /// Returns the slot's id, now in CONNECTING, or `None` when every slot
    /// is in use.
    pub fn allocate(&self) -> Option<SessionId> {
        for (id, slot) in self.slots.iter().enumerate() {
            let mut inner = slot.inner.lock();
            if inner.state == SessionState::Free {
                inner.state = SessionState::Connecting;
                return Some(id);
            }
        }
        None
    }

    /// Transition CONNECTING → ACTIVE, attaching the session's sink.
    pub fn activate(&self, id: SessionId, sink: Arc<dyn NotificationSink>) -> Result<()> {
        let mut inner = self.slot(id)?.inner.lock();
        if inner.state != SessionState::Connecting {
            return Err(Error::SessionUnavailable(id));
        }
        inner.state = SessionState::Active;
        inner.sink = Some(sink);
        Ok(())
    }

    /// Begin teardown of a CONNECTING or ACTIVE slot.
    pub fn begin_close(&self, id: SessionId) -> Result<()> {
        let mut inner = self.slot(id)?.inner.lock();
        match inner.state {
            SessionState::Connecting | SessionState::Active => {
                inner.state = SessionState::Closing;
                Ok(())
            }
            _ => Err(Error::SessionUnavailable(id)),
        }
    }

    /// Finish teardown: drop the sink, clear the key set, return the slot
    /// to FREE.
    pub fn release(&self, id: SessionId) -> Result<()> {
        let slot = self.slot(id)?;
        {
            let mut subs = slot.subs.lock();
            subs.keys.clear();
            subs.count = 0;
        }
        let mut inner = slot.inner.lock();
        inner.sink = None;
        inner.state = SessionState::Free;
        Ok(())
    }

    /// Current state of a slot.
    pub fn state(&self, id: SessionId) -> Result<SessionState> {
        Ok(self.slot(id)?.inner.lock().state)
    }

    /// The session's notification sink, when it is active.
    pub fn sink(&self, id: SessionId) -> Result<Arc<dyn NotificationSink>> {
        let inner = self.slot(id)?.inner.lock();
        if inner.state != SessionState::Active {
            return Err(Error::SessionUnavailable(id));
        }
        inner
            .sink
            .clone()
            .ok_or(Error::SessionUnavailable(id))
    }

    /// Classify a subscription attempt without recording it.
    ///
    /// The ceiling is checked before idempotency: a session at
    /// `MAX_SUBS_PER_SESSION` is rejected even for a key it already holds.
    pub fn check_add(&self, id: SessionId, key: &str) -> Result<AddKey> {
        let subs = self.slot(id)?.subs.lock();
        Self::classify(&subs, key)
    }

    /// Record a subscription on the session side.
    ///
    /// Checks the ceiling first, then idempotency, then inserts and bumps
    /// the counter, all under the leaf lock.
    pub fn add_key(&self, id: SessionId, key: &str) -> Result<AddKey> {
        let mut subs = self.slot(id)?.subs.lock();
        let outcome = Self::classify(&subs, key)?;
        if outcome == AddKey::Added {
            subs.keys.insert(key.to_string());
            subs.count += 1;
            subs.check();
        }
        Ok(outcome)
    }

    fn classify(subs: &SessionSubs, key: &str) -> Result<AddKey> {
        if subs.count == MAX_SUBS_PER_SESSION {
            return Ok(AddKey::AtLimit);
        }
        if subs.keys.contains(key) {
            return Ok(AddKey::AlreadySubscribed);
        }
        Ok(AddKey::Added)
    }

    /// Remove a key from the session side, decrementing the counter.
    ///
    /// Returns false when the session was not subscribed. Called both by
    /// the session's own UNSUBSCRIBE and by the DELETE cascade of other
    /// workers.
    pub fn remove_key(&self, id: SessionId, key: &str) -> Result<bool> {
        let mut subs = self.slot(id)?.subs.lock();
        let removed = subs.keys.remove(key);
        if removed {
            subs.count -= 1;
        }
        subs.check();
        Ok(removed)
    }

    /// Whether the session is subscribed to `key`.
    pub fn has_key(&self, id: SessionId, key: &str) -> Result<bool> {
        Ok(self.slot(id)?.subs.lock().keys.contains(key))
    }

    /// The session's subscribed keys in ascending order.
    pub fn subscribed_keys(&self, id: SessionId) -> Result<Vec<String>> {
        Ok(self.slot(id)?.subs.lock().keys.iter().cloned().collect())
    }

    /// The session's subscription count.
    pub fn sub_count(&self, id: SessionId) -> Result<usize> {
        Ok(self.slot(id)?.subs.lock().count)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self
            .slots
            .iter()
            .filter(|s| s.inner.lock().state == SessionState::Active)
            .count();
        f.debug_struct("SessionRegistry")
            .field("slots", &MAX_SESSIONS)
            .field("active", &active)
            .finish()
    }
}
