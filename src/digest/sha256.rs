use sha2::digest::generic_array::GenericArray;

use super::{Algorithm, BLOCK_LEN, BlockCompress};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sha256Compress;

impl BlockCompress for Sha256Compress {
    const ALGORITHM: Algorithm = Algorithm::Sha256;
    const WORDS: usize = 8;
    const BIG_ENDIAN: bool = true;
    const IV: [u32; 8] = [
        0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab,
        0x5be0cd19,
    ];

    fn compress(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]) {
        ::sha2::compress256(state, std::slice::from_ref(GenericArray::from_slice(&block[..])));
    }
}
