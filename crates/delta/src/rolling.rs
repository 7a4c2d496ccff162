//! Weak rolling checksum and strong block hash.

use sha2::{Digest, Sha256};

/// Length of the truncated strong hash.
pub const STRONG_HASH_LEN: usize = 16;

/// rsync-style rolling checksum over a window of bytes.
///
/// Sliding the window by one byte is O(1), which is what makes searching
/// every offset of a file for known blocks affordable.
#[derive(Debug, Clone, Copy)]
pub struct RollingHash {
    a: u32,
    b: u32,
    len: u32,
}

impl RollingHash {
    pub fn new(window: &[u8]) -> Self {
        let len = window.len() as u32;
        let mut a: u32 = 0;
        let mut b: u32 = 0;
        for (i, &byte) in window.iter().enumerate() {
            a = a.wrapping_add(byte as u32);
            b = b.wrapping_add((len - i as u32).wrapping_mul(byte as u32));
        }
        Self { a, b, len }
    }

    /// Slides the window: drops `out` from the front, appends `incoming`.
    pub fn roll(&mut self, out: u8, incoming: u8) {
        self.a = self.a.wrapping_sub(out as u32).wrapping_add(incoming as u32);
        self.b = self
            .b
            .wrapping_sub(self.len.wrapping_mul(out as u32))
            .wrapping_add(self.a);
    }

    pub fn digest(&self) -> u32 {
        (self.a & 0xffff) | ((self.b & 0xffff) << 16)
    }
}

/// Convenience for hashing a whole block at once.
pub fn weak_hash(block: &[u8]) -> u32 {
    RollingHash::new(block).digest()
}

/// First [`STRONG_HASH_LEN`] bytes of the block's SHA-256.
pub fn strong_hash(block: &[u8]) -> [u8; STRONG_HASH_LEN] {
    let digest = Sha256::digest(block);
    let mut out = [0u8; STRONG_HASH_LEN];
    out.copy_from_slice(&digest[..STRONG_HASH_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_matches_fresh_computation() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let window = 512;

        let mut rolling = RollingHash::new(&data[..window]);
        for start in 1..data.len() - window {
            rolling.roll(data[start - 1], data[start + window - 1]);
            assert_eq!(
                rolling.digest(),
                weak_hash(&data[start..start + window]),
                "mismatch at offset {start}"
            );
        }
    }

    #[test]
    fn weak_hash_differs_for_different_blocks() {
        assert_ne!(weak_hash(b"abcdef"), weak_hash(b"abcdeg"));
        assert_ne!(weak_hash(b"ab"), weak_hash(b"ba"));
    }

    #[test]
    fn strong_hash_is_truncated_sha256() {
        let h = strong_hash(b"hello world");
        assert_eq!(h.len(), STRONG_HASH_LEN);
        assert_eq!(h, strong_hash(b"hello world"));
        assert_ne!(h, strong_hash(b"hello worle"));
    }
}
