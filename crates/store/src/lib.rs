//! Storage layer for pipekvs
//!
//! This crate implements the concurrent key/value engine:
//! - `Table`: 26 fixed buckets, each a reader/writer-locked entry list,
//!   plus the table-level lock that serializes whole-table operations
//!   (SHOW, BACKUP, fork) against per-bucket mutation
//! - `SessionRegistry`: fixed slots for connected clients, each carrying
//!   its subscribed-key set behind a leaf-level lock
//! - `Kvs`: the batch operations layer (WRITE/READ/DELETE/SHOW/BACKUP)
//!   with canonical multi-bucket lock ordering, and the subscription
//!   operations that keep the key↔session cross-links consistent
//! - `engine`: the process-wide handle with init/terminate lifecycle
//!
//! # Locking discipline
//!
//! 1. Table lock before any bucket lock.
//! 2. Multiple bucket locks are acquired in ascending bucket index.
//! 3. A key entry's subscriber mutex is taken only under that key's bucket
//!    guard.
//! 4. A session's subscription mutex is leaf-level: never held while
//!    acquiring any other lock.
//! 5. No bucket lock is held across a pipe write that can block; sinks are
//!    non-blocking attempts and a full pipe drops the record.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod notify;
pub mod ops;
pub mod session;
pub mod table;

pub use notify::{CollectingSink, NotificationSink};
pub use ops::{FreezeGuard, Kvs};
pub use session::{SessionId, SessionRegistry, SessionState};
pub use table::Table;
