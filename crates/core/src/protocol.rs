//! Wire protocol for the named-pipe interface
//!
//! Every frame has a fixed width so that both sides can issue exact-size
//! reads and a single write syscall per message. String fields are
//! NUL-padded to `MAX+1` bytes; decoding stops at the first NUL.
//!
//! | Frame | Layout | Width |
//! |-------|--------|-------|
//! | CONNECT request | opcode, req path, resp path, notif path | 124 |
//! | SUBSCRIBE/UNSUBSCRIBE request | opcode, key | 42 |
//! | DISCONNECT request | opcode | 1 |
//! | response | opcode, `'0'` or `'1'` | 2 |
//! | notification | key, value | 82 |
//!
//! The notification value is the literal `DELETED` when the key was removed,
//! NUL-padded to the fixed width like any other value.

use crate::error::{Error, Result};
use crate::limits::{
    CONNECT_REQUEST_LEN, KEY_FIELD_LEN, NOTIFICATION_LEN, PATH_FIELD_LEN, RESPONSE_LEN,
};

/// Value carried by a deletion notification.
pub const DELETED_VALUE: &str = "DELETED";

/// Response byte for success.
pub const RESULT_OK: u8 = b'0';

/// Response byte for failure.
pub const RESULT_ERR: u8 = b'1';

/// Width of a SUBSCRIBE/UNSUBSCRIBE request frame.
pub const KEY_REQUEST_LEN: usize = 1 + KEY_FIELD_LEN;

/// Operation codes of the client protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Session establishment; carries the three client pipe paths.
    Connect = 1,
    /// Session teardown.
    Disconnect = 2,
    /// Subscribe the session to a key.
    Subscribe = 3,
    /// Remove the session's subscription to a key.
    Unsubscribe = 4,
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(OpCode::Connect),
            2 => Ok(OpCode::Disconnect),
            3 => Ok(OpCode::Subscribe),
            4 => Ok(OpCode::Unsubscribe),
            other => Err(Error::Protocol(format!("unknown opcode {other}"))),
        }
    }
}

/// Write `value` into `field` NUL-padded to the field width.
///
/// Fails when `value` does not leave room for at least one NUL terminator.
fn write_padded(field: &mut [u8], value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() >= field.len() {
        return Err(Error::Protocol(format!(
            "field value {value:?} exceeds {} bytes",
            field.len() - 1
        )));
    }
    field[..bytes.len()].copy_from_slice(bytes);
    field[bytes.len()..].fill(0);
    Ok(())
}

/// Read a NUL-padded field back into a string.
///
/// Decoding stops at the first NUL; a field with no NUL or invalid UTF-8 is
/// a protocol violation.
fn read_padded(field: &[u8]) -> Result<String> {
    let end = field
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::Protocol("unterminated field".to_string()))?;
    std::str::from_utf8(&field[..end])
        .map(str::to_string)
        .map_err(|_| Error::Protocol("non-UTF-8 field".to_string()))
}

/// A decoded CONNECT request: the three pipe paths chosen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Path of the request pipe (client writes, server reads).
    pub req_path: String,
    /// Path of the response pipe (server writes, client reads).
    pub resp_path: String,
    /// Path of the notification pipe (server writes, client reads).
    pub notif_path: String,
}

impl ConnectRequest {
    /// Encode into a fixed-width CONNECT frame.
    pub fn encode(&self) -> Result<[u8; CONNECT_REQUEST_LEN]> {
        let mut frame = [0u8; CONNECT_REQUEST_LEN];
        frame[0] = OpCode::Connect as u8;
        let mut offset = 1;
        for path in [&self.req_path, &self.resp_path, &self.notif_path] {
            write_padded(&mut frame[offset..offset + PATH_FIELD_LEN], path)?;
            offset += PATH_FIELD_LEN;
        }
        Ok(frame)
    }

    /// Decode a CONNECT frame, checking the opcode.
    pub fn decode(frame: &[u8; CONNECT_REQUEST_LEN]) -> Result<Self> {
        let op = OpCode::try_from(frame[0])?;
        if op != OpCode::Connect {
            return Err(Error::Protocol(format!(
                "expected CONNECT, got {op:?}"
            )));
        }
        let mut offset = 1;
        let mut paths = Vec::with_capacity(3);
        for _ in 0..3 {
            paths.push(read_padded(&frame[offset..offset + PATH_FIELD_LEN])?);
            offset += PATH_FIELD_LEN;
        }
        let notif_path = paths.pop().unwrap_or_default();
        let resp_path = paths.pop().unwrap_or_default();
        let req_path = paths.pop().unwrap_or_default();
        Ok(ConnectRequest {
            req_path,
            resp_path,
            notif_path,
        })
    }
}

/// Encode a SUBSCRIBE or UNSUBSCRIBE request frame.
pub fn encode_key_request(op: OpCode, key: &str) -> Result<[u8; KEY_REQUEST_LEN]> {
    let mut frame = [0u8; KEY_REQUEST_LEN];
    frame[0] = op as u8;
    write_padded(&mut frame[1..], key)?;
    Ok(frame)
}

/// Decode the key payload of a SUBSCRIBE/UNSUBSCRIBE request.
pub fn decode_key_field(field: &[u8; KEY_FIELD_LEN]) -> Result<String> {
    read_padded(field)
}

/// Encode a notification record: NUL-padded key followed by NUL-padded value.
pub fn encode_notification(key: &str, value: &str) -> Result<[u8; NOTIFICATION_LEN]> {
    let mut record = [0u8; NOTIFICATION_LEN];
    write_padded(&mut record[..KEY_FIELD_LEN], key)?;
    write_padded(&mut record[KEY_FIELD_LEN..], value)?;
    Ok(record)
}

/// Decode a notification record into `(key, value)`.
pub fn decode_notification(record: &[u8; NOTIFICATION_LEN]) -> Result<(String, String)> {
    let key = read_padded(&record[..KEY_FIELD_LEN])?;
    let value = read_padded(&record[KEY_FIELD_LEN..])?;
    Ok((key, value))
}

/// Build the two-byte response for an operation.
pub fn response(op: OpCode, ok: bool) -> [u8; RESPONSE_LEN] {
    [op as u8, if ok { RESULT_OK } else { RESULT_ERR }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::MAX_STRING_SIZE;

    #[test]
    fn test_opcode_round_trip() {
        for op in [
            OpCode::Connect,
            OpCode::Disconnect,
            OpCode::Subscribe,
            OpCode::Unsubscribe,
        ] {
            assert_eq!(OpCode::try_from(op as u8).unwrap(), op);
        }
        assert!(OpCode::try_from(0).is_err());
        assert!(OpCode::try_from(5).is_err());
    }

    #[test]
    fn test_connect_frame_round_trip() {
        let req = ConnectRequest {
            req_path: "/tmp/req7".to_string(),
            resp_path: "/tmp/resp7".to_string(),
            notif_path: "/tmp/notif7".to_string(),
        };
        let frame = req.encode().unwrap();
        assert_eq!(frame.len(), CONNECT_REQUEST_LEN);
        assert_eq!(frame[0], OpCode::Connect as u8);
        assert_eq!(ConnectRequest::decode(&frame).unwrap(), req);
    }

    #[test]
    fn test_connect_frame_rejects_wrong_opcode() {
        let req = ConnectRequest {
            req_path: "/tmp/req1".to_string(),
            resp_path: "/tmp/resp1".to_string(),
            notif_path: "/tmp/notif1".to_string(),
        };
        let mut frame = req.encode().unwrap();
        frame[0] = OpCode::Subscribe as u8;
        assert!(ConnectRequest::decode(&frame).is_err());
    }

    #[test]
    fn test_oversized_path_rejected() {
        let req = ConnectRequest {
            req_path: "x".repeat(PATH_FIELD_LEN),
            resp_path: "/tmp/resp".to_string(),
            notif_path: "/tmp/notif".to_string(),
        };
        assert!(req.encode().is_err());
    }

    #[test]
    fn test_notification_record_layout() {
        let record = encode_notification("x", "hello").unwrap();
        assert_eq!(record.len(), 2 * (MAX_STRING_SIZE + 1));
        // key at the front, NUL-padded
        assert_eq!(&record[..1], b"x");
        assert!(record[1..KEY_FIELD_LEN].iter().all(|&b| b == 0));
        // value in the second field
        assert_eq!(&record[KEY_FIELD_LEN..KEY_FIELD_LEN + 5], b"hello");
        assert_eq!(
            decode_notification(&record).unwrap(),
            ("x".to_string(), "hello".to_string())
        );
    }

    #[test]
    fn test_deleted_value_is_padded_like_any_other() {
        let record = encode_notification("y", DELETED_VALUE).unwrap();
        let (key, value) = decode_notification(&record).unwrap();
        assert_eq!(key, "y");
        assert_eq!(value, "DELETED");
        // padding fills the remainder of the fixed-width field
        assert!(record[KEY_FIELD_LEN + DELETED_VALUE.len()..]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn test_key_request_round_trip() {
        let frame = encode_key_request(OpCode::Subscribe, "fruit").unwrap();
        assert_eq!(frame[0], OpCode::Subscribe as u8);
        let mut field = [0u8; KEY_FIELD_LEN];
        field.copy_from_slice(&frame[1..]);
        assert_eq!(decode_key_field(&field).unwrap(), "fruit");
    }

    #[test]
    fn test_max_length_strings_fit() {
        let key = "k".repeat(MAX_STRING_SIZE);
        let value = "v".repeat(MAX_STRING_SIZE);
        let record = encode_notification(&key, &value).unwrap();
        assert_eq!(decode_notification(&record).unwrap(), (key, value));
    }

    #[test]
    fn test_response_bytes() {
        assert_eq!(response(OpCode::Connect, true), [1, b'0']);
        assert_eq!(response(OpCode::Subscribe, false), [3, b'1']);
    }
}
