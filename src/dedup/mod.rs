//! Content fingerprinting and canonicalization.
//!
//! A [`Fingerprint`] is a SHA-256 digest over canonicalized content and is
//! the sole deduplication key in the system - two inputs with the same
//! fingerprint are treated as identical for storage purposes. No URI-based
//! deduplication is performed anywhere, since the same content may appear at
//! different sources.
//!
//! Canonicalization rules:
//! - **Records**: the field mapping is hashed in sorted-key order with
//!   length-prefixed framing, followed by the sorted asset reference list,
//!   so field-order instability never changes the fingerprint.
//! - **Assets**: the decoded pixel buffer (post-normalization) is hashed
//!   together with the image dimensions, not the original compressed bytes,
//!   so re-encodings of the same image collapse to one fingerprint.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Width of a fingerprint in bytes (SHA-256).
pub const FINGERPRINT_LEN: usize = 32;

/// Domain-separation prefix for record fingerprints.
const RECORD_TAG: &[u8] = b"raito:record:v1\0";

/// Domain-separation prefix for pixel-buffer fingerprints.
const PIXELS_TAG: &[u8] = b"raito:pixels:v1\0";

/// A fixed-width content digest used as the dedup and primary-key identity
/// for records and assets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

/// Error returned when parsing a fingerprint from its hex form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintParseError {
    /// Input was not valid hexadecimal.
    #[error("invalid hex in fingerprint: {0}")]
    InvalidHex(String),

    /// Input decoded to the wrong number of bytes.
    #[error("fingerprint must be {FINGERPRINT_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

impl Fingerprint {
    /// Computes the fingerprint of a raw byte slice.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Computes the canonical fingerprint of a record.
    ///
    /// The field mapping is consumed in `BTreeMap` (sorted-key) order with
    /// length-prefixed framing so that no key/value concatenation is
    /// ambiguous. Asset references are sorted before hashing: they identify
    /// content the record points at, and their order in the source markup is
    /// presentation, not identity. The fingerprint is therefore fully
    /// determined at extraction time, before any asset is fetched.
    #[must_use]
    pub fn of_record(fields: &BTreeMap<String, String>, asset_refs: &[String]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(RECORD_TAG);

        for (key, value) in fields {
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }

        let mut refs: Vec<&String> = asset_refs.iter().collect();
        refs.sort();
        hasher.update(b"\0assets\0");
        for uri in refs {
            hasher.update((uri.len() as u64).to_le_bytes());
            hasher.update(uri.as_bytes());
        }

        Self(hasher.finalize().into())
    }

    /// Computes the fingerprint of a decoded RGBA pixel buffer.
    ///
    /// Dimensions are part of the digest: a 2x8 and a 4x4 image with the
    /// same raw bytes are different content.
    #[must_use]
    pub fn of_pixels(width: u32, height: u32, rgba: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(PIXELS_TAG);
        hasher.update(width.to_le_bytes());
        hasher.update(height.to_le_bytes());
        hasher.update(rgba);
        Self(hasher.finalize().into())
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Returns the lowercase hex encoding (the form stored in the database).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines
        write!(f, "Fingerprint({}..)", &self.to_hex()[..12])
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            hex::decode(s).map_err(|e| FingerprintParseError::InvalidHex(e.to_string()))?;
        let array: [u8; FINGERPRINT_LEN] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| FingerprintParseError::InvalidLength(v.len()))?;
        Ok(Self(array))
    }
}
