//! HMAC over any [`HashFunction`].

use crate::hash::HashFunction;
use crate::scrub::scrub;

const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5C;

/// Keyed HMAC. The inner and outer hashes are primed with the padded key
/// once, so each MAC costs two hash finalisations.
///
/// The primed states are as good as the key; they are reset on drop.
#[derive(Clone)]
pub struct Hmac<H: HashFunction> {
    keyed_inner: H,
    keyed_outer: H,
    inner: H,
}

impl<H: HashFunction> Hmac<H> {
    /// `hash` must be freshly reset. Keys longer than its block are pre-hashed.
    pub fn new(mut hash: H, key: &[u8]) -> Self {
        let block_len = hash.block_len();
        let mut block = vec![0u8; block_len];

        if key.len() > block_len {
            hash.update(key);
            hash.finalize_into(&mut block);
        } else {
            block[..key.len()].copy_from_slice(key);
        }

        let mut keyed_inner = hash.clone();
        let mut keyed_outer = hash;

        for b in block.iter_mut() {
            *b ^= IPAD;
        }
        keyed_inner.update(&block);
        for b in block.iter_mut() {
            *b ^= IPAD ^ OPAD;
        }
        keyed_outer.update(&block);
        scrub(&mut block);

        Self {
            inner: keyed_inner.clone(),
            keyed_inner,
            keyed_outer,
        }
    }

    pub fn output_len(&self) -> usize {
        self.keyed_outer.output_len()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Write the MAC of everything passed to `update` and rearm for the next
    /// message under the same key.
    pub fn finalize_into(&mut self, out: &mut [u8]) {
        let mut inner_digest = vec![0u8; self.inner.output_len()];
        self.inner.finalize_into(&mut inner_digest);
        self.inner = self.keyed_inner.clone();

        let mut outer = self.keyed_outer.clone();
        outer.update(&inner_digest);
        outer.finalize_into(out);
        outer.reset();
        scrub(&mut inner_digest);
    }

    /// One-shot MAC of `message`.
    pub fn mac(&mut self, message: &[u8], out: &mut [u8]) {
        self.inner = self.keyed_inner.clone();
        self.update(message);
        self.finalize_into(out);
    }
}

impl<H: HashFunction> Drop for Hmac<H> {
    fn drop(&mut self) {
        self.keyed_inner.reset();
        self.keyed_outer.reset();
        self.inner.reset();
    }
}

/// Allocating one-shot helper.
pub fn hmac<H: HashFunction>(hash: H, key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::new(hash, key);
    let mut out = vec![0u8; mac.output_len()];
    mac.mac(message, &mut out);
    out
}
