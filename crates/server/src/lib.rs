//! pipekvs server internals
//!
//! The binary wires four pieces around the shared store:
//! - `jobs`: a pool of workers draining a directory of `.job` scripts
//! - `dispatcher`: the listener on the well-known server FIFO
//! - `queue` + `session`: the bounded connect queue and the session worker
//!   pool serving subscribing clients
//! - `backup`: admission-controlled fork-based snapshots

#![warn(clippy::all)]

pub mod backup;
pub mod dispatcher;
pub mod jobs;
pub mod parse;
pub mod queue;
pub mod session;
