use ::sha1::digest::generic_array::GenericArray;

use super::{Algorithm, BLOCK_LEN, BlockCompress};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sha1Compress;

impl BlockCompress for Sha1Compress {
    const ALGORITHM: Algorithm = Algorithm::Sha1;
    const WORDS: usize = 5;
    const BIG_ENDIAN: bool = true;
    const IV: [u32; 8] = [0x67452301, 0xefcdab89, 0x98badcfe, 0x10325476, 0xc3d2e1f0, 0, 0, 0];

    fn compress(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]) {
        let mut words = [0u32; 5];
        words.copy_from_slice(&state[..5]);
        ::sha1::compress(&mut words, std::slice::from_ref(GenericArray::from_slice(&block[..])));
        state[..5].copy_from_slice(&words);
    }
}
