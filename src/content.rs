//! Resource content and content hashing.
//!
//! Text is kept as `String` so transform hooks can scan and rewrite it;
//! everything else is an immutable shared byte buffer. Hashes use blake3
//! and feed both dev-server etags and build versions.

use std::fmt;
use std::sync::Arc;

/// Bytes of a resource at some stage of cooking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(Arc<[u8]>),
}

impl Content {
    /// Decode bytes as text when `as_text` and they are valid UTF-8.
    pub fn from_bytes(bytes: Vec<u8>, as_text: bool) -> Self {
        if as_text {
            match String::from_utf8(bytes) {
                Ok(text) => Self::Text(text),
                Err(err) => Self::Binary(err.into_bytes().into()),
            }
        } else {
            Self::Binary(bytes.into())
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hash(&self) -> ContentHash {
        ContentHash::of(self.as_bytes())
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes.into())
    }
}

/// A 256-bit content hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// First `len` hex characters, used for versions and etags.
    pub fn fingerprint(self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len.clamp(1, 64));
        hex
    }

    /// Etag form of this hash (16 hex chars, unquoted).
    pub fn etag(self) -> String {
        self.fingerprint(16)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_binary_hash_alike() {
        let text = Content::from("console.log(1)");
        let bytes = Content::from(b"console.log(1)".to_vec());
        assert_eq!(text.hash(), bytes.hash());
        assert_ne!(text, bytes);
    }

    #[test]
    fn test_from_bytes_invalid_utf8_stays_binary() {
        let content = Content::from_bytes(vec![0xff, 0xfe, 0x00], true);
        assert!(content.as_text().is_none());
        assert_eq!(content.len(), 3);
    }

    #[test]
    fn test_short_and_display() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(hash.fingerprint(8).len(), 8);
        assert!(hash.to_hex().starts_with(&hash.fingerprint(8)));
        assert_eq!(format!("{hash}"), hash.etag());
        assert_eq!(hash.fingerprint(0).len(), 1);
        assert_eq!(hash.fingerprint(100).len(), 64);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(ContentHash::of(b"same"), ContentHash::of(b"same"));
        assert_ne!(ContentHash::of(b"same"), ContentHash::of(b"other"));
    }
}
