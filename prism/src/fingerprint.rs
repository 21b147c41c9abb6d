//! Content fingerprints: the stable identity of an uploaded image.

use std::fmt;

use serde::{Deserialize, Serialize};

/// In-memory payloads are hashed and staged in chunks of this size.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Width of a fingerprint in hex characters (128-bit digest).
pub const FINGERPRINT_HEX_LEN: usize = 32;

/// Lowercase hex MD5 digest of an image's raw bytes.
///
/// Values received from clients are not validated: an arbitrary string is a
/// legal lookup key and simply never matches a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fingerprint an in-memory payload.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = FingerprintHasher::new();
        for chunk in bytes.chunks(CHUNK_SIZE) {
            hasher.update(chunk);
        }
        hasher.finish()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the value has the shape of a digest this crate produces.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == FINGERPRINT_HEX_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

/// Incremental fingerprint over a payload that arrives in pieces.
#[derive(Clone)]
pub struct FingerprintHasher {
    context: md5::Context,
    len: u64,
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self {
            context: md5::Context::new(),
            len: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.context.consume(chunk);
        self.len += chunk.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(format!("{:x}", self.context.compute()))
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FingerprintHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintHasher")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
