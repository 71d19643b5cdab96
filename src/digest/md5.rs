//! MD5 block function from the RustCrypto `md-5` crate.
//!
//! The `md5` crate used for upload etags keeps its chaining state private,
//! so continuations go through `md-5`'s block API instead.

use super::{Algorithm, BLOCK_LEN, BlockCompress};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Md5Compress;

impl BlockCompress for Md5Compress {
    const ALGORITHM: Algorithm = Algorithm::Md5;
    const WORDS: usize = 4;
    const BIG_ENDIAN: bool = false;
    const IV: [u32; 8] = [0x67452301, 0xefcdab89, 0x98badcfe, 0x10325476, 0, 0, 0, 0];

    fn compress(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]) {
        let mut words = [0u32; 4];
        words.copy_from_slice(&state[..4]);
        md5_block::block_api::compress(&mut words, std::slice::from_ref(block));
        state[..4].copy_from_slice(&words);
    }
}
