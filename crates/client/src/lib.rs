//! pipekvs client library
//!
//! [`Connection`] owns the client side of the pipe protocol: it creates the
//! three client FIFOs, performs the CONNECT handshake, and exposes the
//! request/response operations. The notification pipe's read end is handed
//! back to the caller so a dedicated thread can drain it.

#![warn(clippy::all)]

pub mod api;

pub use api::Connection;
