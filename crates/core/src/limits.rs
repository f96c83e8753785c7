//! Protocol constants
//!
//! These values are frozen: the wire protocol encodes every field at a fixed
//! width derived from them, so changing any of them is a breaking protocol
//! change for every client. The derived lengths below exist so that frame
//! sizes are written once, here, and nowhere else.

/// Maximum length in bytes of a key or a value.
pub const MAX_STRING_SIZE: usize = 40;

/// Maximum length in bytes of a client pipe path.
pub const MAX_PIPE_PATH_LENGTH: usize = 40;

/// Number of concurrently connected client sessions.
pub const MAX_SESSIONS: usize = 8;

/// Maximum number of keys a single session may be subscribed to.
pub const MAX_SUBS_PER_SESSION: usize = 16;

/// Number of buckets in the hash table, one per letter of the alphabet.
/// Digit-initial keys share the first ten buckets.
pub const TABLE_SIZE: usize = 26;

/// Width of a NUL-padded key or value field on the wire.
pub const KEY_FIELD_LEN: usize = MAX_STRING_SIZE + 1;

/// Width of a NUL-padded pipe-path field on the wire.
pub const PATH_FIELD_LEN: usize = MAX_PIPE_PATH_LENGTH + 1;

/// Width of a CONNECT request frame: opcode plus the three pipe paths.
pub const CONNECT_REQUEST_LEN: usize = 1 + 3 * PATH_FIELD_LEN;

/// Width of a notification record: NUL-padded key followed by NUL-padded value.
pub const NOTIFICATION_LEN: usize = 2 * KEY_FIELD_LEN;

/// Width of every response: opcode byte plus a result byte.
pub const RESPONSE_LEN: usize = 2;
