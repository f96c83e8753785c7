//! Core types for pipekvs
//!
//! This crate holds everything the store, server and client crates share:
//! the frozen protocol constants, the unified error type, the first-byte
//! bucket hash, and the fixed-width wire codec for the named-pipe protocol.
//!
//! Nothing here does I/O or holds locks; the crate is deliberately leaf-level
//! so that every other crate can depend on it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod limits;
pub mod protocol;

pub use error::{Error, Result};
pub use key::{bucket_index, validate_key};
pub use limits::{
    CONNECT_REQUEST_LEN, KEY_FIELD_LEN, MAX_PIPE_PATH_LENGTH, MAX_SESSIONS,
    MAX_SUBS_PER_SESSION, MAX_STRING_SIZE, NOTIFICATION_LEN, PATH_FIELD_LEN, RESPONSE_LEN,
    TABLE_SIZE,
};
pub use protocol::{ConnectRequest, OpCode, DELETED_VALUE, RESULT_ERR, RESULT_OK};
