//! Hash function seam shared by HMAC and PBKDF2.

use sha1::Digest;

/// An incremental hash usable as the HMAC compression function.
pub trait HashFunction: Clone {
    /// HMAC block size in bytes.
    fn block_len(&self) -> usize;

    fn output_len(&self) -> usize;

    fn update(&mut self, data: &[u8]);

    /// Write the digest into `out` (truncated to `out.len()`) and reset.
    fn finalize_into(&mut self, out: &mut [u8]);

    fn reset(&mut self);
}

/// SHA-1 from RustCrypto, standing in for the platform HMAC-SHA1 primitive.
#[derive(Clone, Default)]
pub struct Sha1(sha1::Sha1);

impl Sha1 {
    pub const OUTPUT_LEN: usize = 20;
    pub const BLOCK_LEN: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for Sha1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sha1")
    }
}

impl HashFunction for Sha1 {
    fn block_len(&self) -> usize {
        Self::BLOCK_LEN
    }

    fn output_len(&self) -> usize {
        Self::OUTPUT_LEN
    }

    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    fn finalize_into(&mut self, out: &mut [u8]) {
        let digest = self.0.finalize_reset();
        let n = out.len().min(Self::OUTPUT_LEN);
        out[..n].copy_from_slice(&digest[..n]);
    }

    fn reset(&mut self) {
        Digest::reset(&mut self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_abc() {
        let mut h = Sha1::new();
        h.update(b"abc");
        let mut out = [0u8; 20];
        h.finalize_into(&mut out);
        assert_eq!(hex::encode(out), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_sha1_finalize_resets() {
        let mut h = Sha1::new();
        h.update(b"garbage");
        let mut out = [0u8; 20];
        h.finalize_into(&mut out);
        h.update(b"abc");
        h.finalize_into(&mut out);
        assert_eq!(hex::encode(out), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
