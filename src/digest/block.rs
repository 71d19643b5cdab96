//! Block buffering, padding and state encoding shared by the 64-byte-block
//! digests (MD5, SHA-1, SHA-256).
//!
//! Serialized layout (then base64):
//!
//! ```text
//! [tag: u8][chaining words: WORDS * u32][length: u64 BE][pending: length % 64 bytes]
//! ```
//!
//! Chaining words use the algorithm's own byte order.

use base64::{Engine as _, engine::general_purpose};
use std::{fmt::Write as _, marker::PhantomData};

use super::{Algorithm, DigestStateError, ResumableDigest};

pub const BLOCK_LEN: usize = 64;

/// A block compression function and the constants around it.
pub trait BlockCompress {
    const ALGORITHM: Algorithm;
    /// Number of meaningful 32-bit chaining words (at most 8).
    const WORDS: usize;
    /// Byte order of the length trailer, the output, and the encoded words.
    const BIG_ENDIAN: bool;
    const IV: [u32; 8];

    fn compress(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]);
}

/// Generic continuation for a [`BlockCompress`] function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDigest<C> {
    state: [u32; 8],
    buffer: [u8; BLOCK_LEN],
    length: u64,
    _compress: PhantomData<C>,
}

impl<C: BlockCompress> BlockDigest<C> {
    fn pending(&self) -> usize {
        (self.length % BLOCK_LEN as u64) as usize
    }

    fn word_bytes(word: u32) -> [u8; 4] {
        if C::BIG_ENDIAN {
            word.to_be_bytes()
        } else {
            word.to_le_bytes()
        }
    }

    fn word_from(bytes: [u8; 4]) -> u32 {
        if C::BIG_ENDIAN {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    }

    fn compress_slice(state: &mut [u32; 8], block: &[u8]) {
        let mut owned = [0u8; BLOCK_LEN];
        owned.copy_from_slice(block);
        C::compress(state, &owned);
    }
}

impl<C: BlockCompress> ResumableDigest for BlockDigest<C> {
    const ALGORITHM: Algorithm = C::ALGORITHM;

    fn init() -> Self {
        Self {
            state: C::IV,
            buffer: [0; BLOCK_LEN],
            length: 0,
            _compress: PhantomData,
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        let mut pos = self.pending();
        self.length = self.length.wrapping_add(data.len() as u64);

        if pos > 0 {
            let take = (BLOCK_LEN - pos).min(data.len());
            self.buffer[pos..pos + take].copy_from_slice(&data[..take]);
            pos += take;
            data = &data[take..];
            if pos < BLOCK_LEN {
                return;
            }
            let full = self.buffer;
            C::compress(&mut self.state, &full);
        }

        let mut blocks = data.chunks_exact(BLOCK_LEN);
        for block in &mut blocks {
            Self::compress_slice(&mut self.state, block);
        }
        let rest = blocks.remainder();
        self.buffer[..rest.len()].copy_from_slice(rest);
    }

    fn serialize(&self) -> String {
        let pending = self.pending();
        let mut raw = Vec::with_capacity(1 + C::WORDS * 4 + 8 + pending);
        raw.push(C::ALGORITHM.state_tag());
        for word in &self.state[..C::WORDS] {
            raw.extend_from_slice(&Self::word_bytes(*word));
        }
        raw.extend_from_slice(&self.length.to_be_bytes());
        raw.extend_from_slice(&self.buffer[..pending]);
        general_purpose::STANDARD.encode(raw)
    }

    fn deserialize(encoded: &str) -> Result<Self, DigestStateError> {
        let raw = general_purpose::STANDARD.decode(encoded.trim())?;
        let header = 1 + C::WORDS * 4 + 8;
        match raw.first() {
            Some(&tag) if tag != C::ALGORITHM.state_tag() => {
                return Err(DigestStateError::AlgorithmMismatch {
                    expected: C::ALGORITHM,
                    found: tag,
                });
            }
            _ => {}
        }
        if raw.len() < header {
            return Err(DigestStateError::Length {
                expected: header,
                actual: raw.len(),
            });
        }

        let mut state = C::IV;
        for (i, word) in raw[1..1 + C::WORDS * 4].chunks_exact(4).enumerate() {
            state[i] = Self::word_from([word[0], word[1], word[2], word[3]]);
        }

        let mut length_bytes = [0u8; 8];
        length_bytes.copy_from_slice(&raw[header - 8..header]);
        let length = u64::from_be_bytes(length_bytes);

        let pending = (length % BLOCK_LEN as u64) as usize;
        if raw.len() != header + pending {
            return Err(DigestStateError::Length {
                expected: header + pending,
                actual: raw.len(),
            });
        }

        let mut buffer = [0u8; BLOCK_LEN];
        buffer[..pending].copy_from_slice(&raw[header..]);

        Ok(Self {
            state,
            buffer,
            length,
            _compress: PhantomData,
        })
    }

    fn finalize(mut self) -> String {
        let bit_len = self.length.wrapping_mul(8);
        let pos = self.pending();

        let mut block = self.buffer;
        block[pos] = 0x80;
        block[pos + 1..].fill(0);
        if pos >= BLOCK_LEN - 8 {
            C::compress(&mut self.state, &block);
            block = [0; BLOCK_LEN];
        }
        let trailer = if C::BIG_ENDIAN {
            bit_len.to_be_bytes()
        } else {
            bit_len.to_le_bytes()
        };
        block[BLOCK_LEN - 8..].copy_from_slice(&trailer);
        C::compress(&mut self.state, &block);

        let mut out = String::with_capacity(C::WORDS * 8);
        for word in &self.state[..C::WORDS] {
            for byte in Self::word_bytes(*word) {
                let _ = write!(out, "{byte:02x}");
            }
        }
        out
    }

    fn bytes_consumed(&self) -> u64 {
        self.length
    }
}
