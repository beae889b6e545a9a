//! Opaque binary keys.

use std::fmt;

use bytes::Bytes;

/// The key type of an fsdb store.
///
/// Keys are opaque byte sequences; equality is byte-wise and no ordering is
/// exposed. Cloning is cheap (`Bytes`-backed).
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Key(Bytes);

impl Key {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Key(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(Bytes::from(s.into_bytes()))
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key(Bytes::from(b))
    }
}

impl From<Bytes> for Key {
    fn from(b: Bytes) -> Self {
        Key(b)
    }
}

/// Valid UTF-8 keys render as their literal text; anything else renders as a
/// hex dump so log lines stay printable.
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "[0x{}]", hex::encode(&self.0)),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "[0x{}]", hex::encode(&self.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_utf8() {
        let key = Key::from("foo/bar");
        assert_eq!(key.to_string(), "foo/bar");
    }

    #[test]
    fn display_binary() {
        let key = Key::from(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(key.to_string(), "[0xdeadbeef]");
    }

    #[test]
    fn equality_is_bytewise() {
        assert_eq!(Key::from("foo"), Key::from(b"foo".to_vec()));
        assert_ne!(Key::from("foo"), Key::from("bar"));
    }

    #[test]
    fn empty_key() {
        let key = Key::default();
        assert!(key.is_empty());
        assert_eq!(key.to_string(), "");
    }
}
