//! Keccak-f[1600] sponge and the four fixed-width SHA-3 hashes.

use lockore_core::{LockoreError, LockoreResult};
use zeroize::Zeroize;

use crate::hash::HashFunction;

const ROUNDS: usize = 24;

/// Largest rate in bytes (SHA3-224).
const MAX_RATE: usize = 144;

const ROUND_CONSTANTS: [u64; ROUNDS] = [
    0x0000_0000_0000_0001,
    0x0000_0000_0000_8082,
    0x8000_0000_0000_808A,
    0x8000_0000_8000_8000,
    0x0000_0000_0000_808B,
    0x0000_0000_8000_0001,
    0x8000_0000_8000_8081,
    0x8000_0000_0000_8009,
    0x0000_0000_0000_008A,
    0x0000_0000_0000_0088,
    0x0000_0000_8000_8009,
    0x0000_0000_8000_000A,
    0x0000_0000_8000_808B,
    0x8000_0000_0000_008B,
    0x8000_0000_0000_8089,
    0x8000_0000_0000_8003,
    0x8000_0000_0000_8002,
    0x8000_0000_0000_0080,
    0x0000_0000_0000_800A,
    0x8000_0000_8000_000A,
    0x8000_0000_8000_8081,
    0x8000_0000_0000_8080,
    0x0000_0000_8000_0001,
    0x8000_0000_8000_8008,
];

/// Rotation count per lane, indexed by `x + 5y`.
const RHO: [u32; 25] = [
    0, 1, 62, 28, 27, 36, 44, 6, 55, 20, 3, 10, 43, 25, 39, 41, 45, 15, 21, 8, 18, 2, 61, 56, 14,
];

/// One application of the 24-round Keccak-f[1600] permutation.
fn keccak_f(a: &mut [u64; 25]) {
    let mut b = [0u64; 25];
    let mut c = [0u64; 5];

    for rc in ROUND_CONSTANTS {
        // θ
        for x in 0..5 {
            c[x] = a[x] ^ a[x + 5] ^ a[x + 10] ^ a[x + 15] ^ a[x + 20];
        }
        for x in 0..5 {
            let d = c[(x + 4) % 5] ^ c[(x + 1) % 5].rotate_left(1);
            for y in (0..25).step_by(5) {
                a[x + y] ^= d;
            }
        }

        // ρ and π: B[y, 2x+3y] = rot(A[x, y])
        for x in 0..5 {
            for y in 0..5 {
                let src = x + 5 * y;
                let dst = y + 5 * ((2 * x + 3 * y) % 5);
                b[dst] = a[src].rotate_left(RHO[src]);
            }
        }

        // χ
        for y in (0..25).step_by(5) {
            for x in 0..5 {
                a[x + y] = b[x + y] ^ (!b[(x + 1) % 5 + y] & b[(x + 2) % 5 + y]);
            }
        }

        // ι
        a[0] ^= rc;
    }

    b.zeroize();
    c.zeroize();
}

/// SHA-3 with a 224, 256, 384 or 512 bit output.
///
/// [`Sha3::digest`] leaves the running state intact so more input can follow;
/// [`Sha3::finalize`] consumes it and resets to the empty-message state.
#[derive(Clone)]
pub struct Sha3 {
    state: [u64; 25],
    buf: [u8; MAX_RATE],
    index: usize,
    rate: usize,
    output_len: usize,
}

impl Sha3 {
    /// Supported output sizes in bits.
    pub const SIZES: [usize; 4] = [224, 256, 384, 512];

    pub fn new(bits: usize) -> LockoreResult<Self> {
        if !Self::SIZES.contains(&bits) {
            return Err(LockoreError::unsupported("sha3 size", bits.to_string()));
        }
        Ok(Self {
            state: [0; 25],
            buf: [0; MAX_RATE],
            index: 0,
            rate: (1600 - 2 * bits) / 8,
            output_len: bits / 8,
        })
    }

    pub fn sha3_256() -> Self {
        Self::with_bits(256)
    }

    pub fn sha3_512() -> Self {
        Self::with_bits(512)
    }

    fn with_bits(bits: usize) -> Self {
        Self {
            state: [0; 25],
            buf: [0; MAX_RATE],
            index: 0,
            rate: (1600 - 2 * bits) / 8,
            output_len: bits / 8,
        }
    }

    /// Absorption block size in bytes (the sponge rate).
    pub fn block_len(&self) -> usize {
        self.rate
    }

    pub fn output_len(&self) -> usize {
        self.output_len
    }

    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (self.rate - self.index).min(data.len());
            self.buf[self.index..self.index + take].copy_from_slice(&data[..take]);
            self.index += take;
            data = &data[take..];
            if self.index == self.rate {
                self.absorb_block();
            }
        }
    }

    /// Hash of everything absorbed so far. The running state is untouched.
    pub fn digest(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.output_len];
        let mut copy = self.clone();
        copy.pad_and_squeeze(&mut out);
        out
    }

    /// Hash of everything absorbed so far, then reset.
    pub fn finalize(&mut self) -> Vec<u8> {
        let mut out = vec![0u8; self.output_len];
        self.pad_and_squeeze(&mut out);
        self.reset();
        out
    }

    pub fn reset(&mut self) {
        self.state.zeroize();
        self.buf.zeroize();
        self.index = 0;
    }

    fn absorb_block(&mut self) {
        for (lane, chunk) in self.state.iter_mut().zip(self.buf[..self.rate].chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *lane ^= u64::from_le_bytes(word);
        }
        keccak_f(&mut self.state);
        self.index = 0;
    }

    fn pad_and_squeeze(&mut self, out: &mut [u8]) {
        let last = self.rate - 1;
        if self.index == last {
            self.buf[last] = 0x86;
        } else {
            self.buf[self.index] = 0x06;
            self.buf[self.index + 1..last].fill(0);
            self.buf[last] = 0x80;
        }
        self.absorb_block();

        for (chunk, lane) in out.chunks_mut(8).zip(self.state.iter()) {
            let bytes = lane.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

impl Drop for Sha3 {
    fn drop(&mut self) {
        self.state.zeroize();
        self.buf.zeroize();
    }
}

impl std::fmt::Debug for Sha3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sha3")
            .field("bits", &(self.output_len * 8))
            .field("state", &"[REDACTED]")
            .finish()
    }
}

impl HashFunction for Sha3 {
    fn block_len(&self) -> usize {
        self.rate
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn update(&mut self, data: &[u8]) {
        Sha3::update(self, data);
    }

    fn finalize_into(&mut self, out: &mut [u8]) {
        let mut full = [0u8; 64];
        self.pad_and_squeeze(&mut full[..self.output_len]);
        let n = out.len().min(self.output_len);
        out[..n].copy_from_slice(&full[..n]);
        full.zeroize();
        self.reset();
    }

    fn reset(&mut self) {
        Sha3::reset(self);
    }
}
