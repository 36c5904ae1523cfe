//! 32-bit MurmurHash3 (x86 variant) and the fold combiner used for addressing.
//!
//! These functions are part of the placement contract: every location the
//! engine writes to is derived from them, so the output must match the
//! published MurmurHash3 vectors bit for bit.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

#[inline]
fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// MurmurHash3 x86_32 over an arbitrary byte slice
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;
    let mut blocks = data.chunks_exact(4);

    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k = tail
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, &b)| acc | (b as u32) << (8 * i));
        h ^= mix_k(k);
    }

    h ^= data.len() as u32;
    fmix32(h)
}

/// Hashes a single u32 encoded little-endian
pub fn hash32(value: u32, seed: u32) -> u32 {
    murmur3_32(&value.to_le_bytes(), seed)
}

/// Hashes the UTF-8 bytes of a string
pub fn hash_string(s: &str, seed: u32) -> u32 {
    murmur3_32(s.as_bytes(), seed)
}

/// Left fold: `h = hash32(v, h)` for each value, starting from `seed`.
/// Order sensitive.
pub fn hash_combine(values: &[u32], seed: u32) -> u32 {
    values.iter().fold(seed, |h, &v| hash32(v, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golden_vectors() {
        assert_eq!(hash32(0, 0), 0x2362_f9de);
        assert_eq!(hash32(1, 0), 0xfbf1_402a);
        assert_eq!(hash_string("hello", 0), 0x248b_fa47);
        assert_eq!(hash_combine(&[1, 2], 0), 0x647d_de73);
    }

    #[test]
    fn test_empty_input_vectors() {
        assert_eq!(murmur3_32(&[], 0), 0);
        assert_eq!(murmur3_32(&[], 1), 0x514e_28b7);
        assert_eq!(murmur3_32(&[], 0xffff_ffff), 0x81f1_6f39);
    }

    #[test]
    fn test_combine_is_order_sensitive() {
        assert_ne!(hash_combine(&[1, 2], 7), hash_combine(&[2, 1], 7));
        assert_eq!(hash_combine(&[], 7), 7);
    }
}
