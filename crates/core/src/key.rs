//! Key validation and bucket placement
//!
//! The table is a fixed array of 26 buckets selected by the first byte of
//! the key: letters map case-insensitively to `0..26`, digits to `0..10`
//! and share buckets with `a..j`. Any other first byte makes the key
//! unplaceable and it is rejected before it reaches the store.

use crate::error::{Error, Result};
use crate::limits::{MAX_STRING_SIZE, TABLE_SIZE};

/// Compute the bucket index for a key.
///
/// Returns `None` when the key is empty or its first byte is neither an
/// ASCII letter nor a digit.
pub fn bucket_index(key: &str) -> Option<usize> {
    let first = key.as_bytes().first()?.to_ascii_lowercase();
    let index = match first {
        b'a'..=b'z' => (first - b'a') as usize,
        b'0'..=b'9' => (first - b'0') as usize,
        _ => return None,
    };
    debug_assert!(index < TABLE_SIZE);
    Some(index)
}

/// Validate that a key can live in the table.
///
/// A valid key is non-empty, at most [`MAX_STRING_SIZE`] bytes, and has a
/// hashable first byte.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_STRING_SIZE || bucket_index(key).is_none() {
        return Err(Error::RejectedKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_map_to_alphabet_positions() {
        assert_eq!(bucket_index("apple"), Some(0));
        assert_eq!(bucket_index("zebra"), Some(25));
        assert_eq!(bucket_index("Apple"), Some(0));
        assert_eq!(bucket_index("Z"), Some(25));
    }

    #[test]
    fn test_digits_collide_with_leading_letters() {
        assert_eq!(bucket_index("0conf"), Some(0));
        assert_eq!(bucket_index("9lives"), Some(9));
        // digit buckets are shared with a..j
        assert_eq!(bucket_index("0conf"), bucket_index("abc"));
        assert_eq!(bucket_index("9lives"), bucket_index("jam"));
    }

    #[test]
    fn test_unhashable_first_bytes_rejected() {
        assert_eq!(bucket_index(""), None);
        assert_eq!(bucket_index("_key"), None);
        assert_eq!(bucket_index(" key"), None);
        assert_eq!(bucket_index("ãkey"), None);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("apple").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("-dash").is_err());
        let long = "a".repeat(MAX_STRING_SIZE + 1);
        assert!(validate_key(&long).is_err());
        let max = "a".repeat(MAX_STRING_SIZE);
        assert!(validate_key(&max).is_ok());
    }
}
