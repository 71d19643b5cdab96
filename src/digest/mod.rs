//! Resumable message digests.
//!
//! Every supported algorithm is a plain value type implementing
//! [`ResumableDigest`]. The intermediate state can be turned into a portable
//! string between invocations and picked up again later, so a single object
//! can be hashed across many short-lived step executions.

mod block;
pub mod md5;
pub mod sha1;
pub mod sha256;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use block::{BLOCK_LEN, BlockCompress, BlockDigest};

/// MD5 continuation.
pub type Md5 = BlockDigest<md5::Md5Compress>;
/// SHA-1 continuation.
pub type Sha1 = BlockDigest<sha1::Sha1Compress>;
/// SHA-256 continuation.
pub type Sha256 = BlockDigest<sha256::Sha256Compress>;

/// Checksum algorithms understood by the fixity steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    #[serde(alias = "MD5")]
    Md5,
    #[serde(alias = "SHA1")]
    Sha1,
    #[serde(alias = "SHA256")]
    Sha256,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
        }
    }

    /// Length of the hex-encoded digest.
    pub fn hex_len(self) -> usize {
        match self {
            Algorithm::Md5 => 32,
            Algorithm::Sha1 => 40,
            Algorithm::Sha256 => 64,
        }
    }

    /// True when `value` looks like a digest of this algorithm (hex, either case).
    pub fn is_hex_digest(self, value: &str) -> bool {
        value.len() == self.hex_len() && value.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Leading byte of a serialized continuation.
    pub(crate) fn state_tag(self) -> u8 {
        match self {
            Algorithm::Md5 => 1,
            Algorithm::Sha1 => 2,
            Algorithm::Sha256 => 3,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to restore a continuation from its serialized form.
#[derive(Debug, Error)]
pub enum DigestStateError {
    #[error("intermediate hash state is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("intermediate hash state belongs to another algorithm (expected {expected}, tag {found})")]
    AlgorithmMismatch { expected: Algorithm, found: u8 },
    #[error("intermediate hash state has {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },
}

/// Capability interface for a digest whose progress survives process restarts.
pub trait ResumableDigest: Sized {
    const ALGORITHM: Algorithm;

    /// Fresh continuation with no input consumed.
    fn init() -> Self;

    /// Fold `data` into the continuation.
    fn update(&mut self, data: &[u8]);

    /// Portable encoding of the continuation.
    fn serialize(&self) -> String;

    /// Rebuild a continuation produced by [`ResumableDigest::serialize`].
    fn deserialize(encoded: &str) -> Result<Self, DigestStateError>;

    /// Lowercase hex digest of everything consumed so far.
    fn finalize(self) -> String;

    /// Total number of bytes consumed.
    fn bytes_consumed(&self) -> u64;
}
