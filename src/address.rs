//! Opaque identity keys for pointer-graph records.
//!
//! An [`AddressString`] correlates repeated references to the same logical
//! object across a stream. It is *not* a memory address: the writer derives
//! it from pointer identity at save time, but a parser treats it as an
//! opaque token. Equality and hashing are structural.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Maximum token length. A 64-bit pointer in hex needs 16 bytes; the rest
/// is headroom for hand-written streams.
pub const ADDRESS_CAPACITY: usize = 23;

/// A small fixed-capacity byte buffer used as an object identity key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AddressString {
    len: u8,
    buf: [u8; ADDRESS_CAPACITY],
}

impl AddressString {
    /// Build an identity key from a pointer value (lowercase hex).
    pub fn from_ptr(ptr: usize) -> Self {
        let text = format!("{ptr:x}");
        // A usize in hex always fits the buffer.
        Self::from_token(&text).expect("pointer token exceeds address capacity")
    }

    /// Build an identity key from a stream token.
    ///
    /// Fails on empty tokens and tokens longer than [`ADDRESS_CAPACITY`].
    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = token.as_bytes();
        if bytes.is_empty() {
            return Err(Error::protocol("empty address token"));
        }
        if bytes.len() > ADDRESS_CAPACITY {
            return Err(Error::protocol(format!(
                "address token '{token}' exceeds {ADDRESS_CAPACITY} bytes"
            )));
        }
        let mut buf = [0u8; ADDRESS_CAPACITY];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            len: bytes.len() as u8,
            buf,
        })
    }

    /// The token as a string slice.
    pub fn as_str(&self) -> &str {
        // Tokens are only built from &str, so this slice is valid UTF-8.
        std::str::from_utf8(&self.buf[..self.len as usize]).expect("address token is UTF-8")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for AddressString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for AddressString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddressString({})", self.as_str())
    }
}

impl FromStr for AddressString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_token(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ptr_round_trips_through_token() {
        let a = AddressString::from_ptr(0xdead_beef);
        let b = AddressString::from_token(a.as_str()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "deadbeef");
    }

    #[test]
    fn distinct_pointers_are_distinct_keys() {
        let a = AddressString::from_ptr(1);
        let b = AddressString::from_ptr(2);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_oversized_token() {
        let long = "x".repeat(ADDRESS_CAPACITY + 1);
        assert!(AddressString::from_token(&long).is_err());
    }

    #[test]
    fn rejects_empty_token() {
        assert!(AddressString::from_token("").is_err());
    }

    #[test]
    fn hash_is_structural() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(AddressString::from_ptr(42));
        assert!(set.contains(&AddressString::from_token("2a").unwrap()));
    }
}
