//! # pipekvs
//!
//! An in-memory key/value store served over named pipes: batch job
//! ingestion, subscribing client sessions, and fork-based snapshots.
//!
//! The store is a fixed 26-bucket hash table keyed on the first byte of each
//! key, with per-bucket reader/writer locks and a table-level lock that
//! serializes whole-table operations (SHOW, BACKUP, fork) against mutation.
//! Each key carries a subscription index; every WRITE or DELETE fans a
//! fixed-width notification record out to the subscribed client sessions.
//!
//! # Quick Start
//!
//! ```no_run
//! use pipekvs::engine;
//!
//! fn main() -> pipekvs::Result<()> {
//!     let kvs = engine::init()?;
//!
//!     kvs.write(&[("user".into(), "alice".into())])?;
//!
//!     let mut out = Vec::new();
//!     kvs.read(&["user".into()], &mut out)?;
//!     assert_eq!(out, b"[(user,alice)]\n");
//!
//!     engine::terminate()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `pipekvs-core` | constants, error type, key hashing, wire protocol |
//! | `pipekvs-store` | bucket map, session registry, batch operations |
//! | `pipekvs-server` | FIFO dispatcher, session workers, job runner, backups |
//! | `pipekvs-client` | client connection API and interactive binary |
//!
//! The server and client crates are binaries; only the store surface
//! re-exported here is meant for embedding.

pub use pipekvs_core::{Error, OpCode, Result};
pub use pipekvs_store::{engine, Kvs, NotificationSink, SessionId};
