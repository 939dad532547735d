use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const DOCUMENT_HASH_DOMAIN: &[u8] = b"oulipo/document/v0";

/// Opaque hierarchical address of a document, element, or overlay tag.
///
/// The core never interprets the structure of an identifier; it only compares, hashes, and
/// pools them.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Identifier(pub String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content hash of an invariant media object (image, audio, ...).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct MediaHash(pub String);

impl MediaHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a compiled document file in a content-addressed store.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DocumentHash(pub String);

impl DocumentHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Hex-encoded, domain-separated blake3 hash of a compiled document string.
    pub fn of(compiled: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOCUMENT_HASH_DOMAIN);
        hasher.update(compiled.as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
