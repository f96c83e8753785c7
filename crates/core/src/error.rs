//! Error types for pipekvs
//!
//! One unified error enum for the whole system, using `thiserror` for the
//! `Display`/`Error` impls. Variants map one-to-one onto the propagation
//! taxonomy the store and server agree on:
//!
//! - **Missing state**: reading/deleting an absent key is reported in the
//!   output stream, not through this type; [`Error::KeyNotFound`] is only
//!   raised where absence is a rejection (subscribing to a missing key).
//! - **Limits**: a session at its subscription ceiling.
//! - **I/O**: pipe and file failures; short writes abort the current batch.
//! - **Protocol**: malformed frames or unexpected opcodes from a client.
//! - **Lifecycle**: double init / use before init of the store handle.
//!
//! The dispatcher collapses any error into the single wire result byte via
//! [`crate::protocol::response`].

use std::io;
use thiserror::Error;

/// Result type alias for pipekvs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the pipekvs store, server and client
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (pipe reads/writes, job and snapshot files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key does not exist where existence is required
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Key cannot be placed in any bucket (empty, too long, or an
    /// unhashable first byte)
    #[error("key rejected: {0:?}")]
    RejectedKey(String),

    /// Session reached `MAX_SUBS_PER_SESSION`
    #[error("subscription limit reached for session {0}")]
    SubscriptionLimit(usize),

    /// Session is not subscribed to the named key
    #[error("session {session} is not subscribed to {key:?}")]
    NotSubscribed {
        /// Session that issued the unsubscribe
        session: usize,
        /// Key it was not subscribed to
        key: String,
    },

    /// Session slot is not in the state the operation requires
    #[error("session {0} is not active")]
    SessionUnavailable(usize),

    /// No free session slot for an incoming connection
    #[error("all session slots are in use")]
    SessionsExhausted,

    /// Malformed frame or unexpected opcode
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Lock acquisition failure; kept for the propagation taxonomy even
    /// though parking_lot acquisition itself cannot fail
    #[error("lock error: {0}")]
    Lock(String),

    /// `init` called on an already-initialized store
    #[error("store has already been initialized")]
    AlreadyInitialized,

    /// Store handle requested before `init`
    #[error("store must be initialized")]
    NotInitialized,
}

impl Error {
    /// Check whether this error is a missing-key rejection.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound(_))
    }

    /// Check whether this error is a capacity rejection.
    ///
    /// Capacity rejections leave the session fully usable; the dispatcher
    /// answers `'1'` and keeps serving requests.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Error::SubscriptionLimit(_) | Error::SessionsExhausted
        )
    }
}
