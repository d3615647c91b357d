//! Counter-mode CPRNG keyed from host entropy.
//!
//! Each step encrypts a 32-byte little-endian counter as two AES-256 blocks
//! and increments it. After 4096 bits of output the generator re-keys itself
//! from SHA3-256 over its last output block.

use rand::{CryptoRng, RngCore};
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

use crate::cipher::AesEcb;
use crate::sha3::Sha3;
use crate::{BLOCK_SIZE, KEY_SIZE};

const STATE_LEN: usize = 32;
const RESEED_BITS: u32 = 4096;

pub const DIGITS: &str = "0123456789";
pub const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub struct SecureRandom {
    cipher: AesEcb,
    counter: [u8; STATE_LEN],
    block: [u8; STATE_LEN],
    generated_bits: u32,
}

impl SecureRandom {
    /// Seed from an OS entropy word and the wall clock.
    pub fn new() -> Self {
        let mut seed = [0u8; KEY_SIZE];
        seed[..8].copy_from_slice(&rand::rngs::OsRng.next_u64().to_le_bytes());
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        seed[8..16].copy_from_slice(&nanos.to_le_bytes());
        Self::from_seed(seed)
    }

    /// Deterministic generator, for tests and reproducible runs.
    pub fn from_seed(mut seed: [u8; KEY_SIZE]) -> Self {
        let mut counter = [0u8; STATE_LEN];
        counter[0] = 1;
        let mut rng = Self {
            cipher: AesEcb::new(&seed),
            counter,
            block: [0; STATE_LEN],
            generated_bits: 0,
        };
        seed.zeroize();
        rng.generate();
        rng.generated_bits = 0;
        rng
    }

    fn rekey(&mut self, key: &[u8; KEY_SIZE]) {
        self.cipher = AesEcb::new(key);
        self.generate();
        self.generated_bits = 0;
    }

    fn generate(&mut self) {
        for (src, dst) in self
            .counter
            .chunks_exact(BLOCK_SIZE)
            .zip(self.block.chunks_exact_mut(BLOCK_SIZE))
        {
            self.cipher.encrypt_block(src, dst);
        }
        for byte in self.counter.iter_mut() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
        self.generated_bits += (STATE_LEN * 8) as u32;
    }

    fn step(&mut self) {
        self.generate();
        if self.generated_bits > RESEED_BITS {
            self.reseed(None);
        }
    }

    /// Stir `seed` (if any) and one fresh block through SHA3-256 and re-key.
    pub fn reseed(&mut self, seed: Option<&[u8]>) {
        self.generate();
        let mut h = Sha3::sha3_256();
        if let Some(seed) = seed {
            h.update(seed);
        }
        h.update(&self.block);
        let mut digest = h.finalize();
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest[..KEY_SIZE]);
        digest.zeroize();
        self.rekey(&key);
        key.zeroize();
        tracing::trace!("cprng reseeded");
    }

    pub fn next_byte(&mut self) -> u8 {
        self.step();
        self.block[0]
    }

    pub fn next_i64(&mut self) -> i64 {
        self.step();
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.block[..8]);
        i64::from_le_bytes(word)
    }

    /// Non-negative 31-bit value.
    pub fn next_u31(&mut self) -> u32 {
        (self.next_i64() & 0x7FFF_FFFF) as u32
    }

    pub fn fill(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(STATE_LEN) {
            self.step();
            chunk.copy_from_slice(&self.block[..chunk.len()]);
        }
    }

    /// `len` characters drawn from `alphabet` by `next_u31() % alphabet.len()`.
    ///
    /// This keeps a slight modulo bias whenever the alphabet size does not
    /// divide 2^31. Entropy estimates for generated passwords assume exactly
    /// this distribution, so it is not corrected here.
    pub fn random_string(&mut self, len: usize, alphabet: &[char]) -> String {
        if alphabet.is_empty() {
            return String::new();
        }
        (0..len)
            .map(|_| alphabet[self.next_u31() as usize % alphabet.len()])
            .collect()
    }

    /// Password over digits, optionally ASCII letters, plus `special`.
    pub fn password(&mut self, len: usize, letters: bool, special: &str) -> String {
        let mut alphabet: Vec<char> = DIGITS.chars().collect();
        if letters {
            alphabet.extend(LETTERS.chars());
        }
        alphabet.extend(special.chars());
        self.random_string(len, &alphabet)
    }

    /// Printable string carrying at least `bits` bits of entropy.
    ///
    /// Characters come from U+0020..=U+007F (96 symbols, about 6.58 bits each).
    pub fn bit_string(&mut self, bits: usize) -> String {
        let alphabet: Vec<char> = (0x20u8..=0x7F).map(char::from).collect();
        self.random_string((bits * 100 + 657) / 658, &alphabet)
    }
}

impl Default for SecureRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SecureRandom {
    fn drop(&mut self) {
        self.counter.zeroize();
        self.block.zeroize();
    }
}

impl std::fmt::Debug for SecureRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureRandom")
            .field("generated_bits", &self.generated_bits)
            .finish_non_exhaustive()
    }
}

impl RngCore for SecureRandom {
    fn next_u32(&mut self) -> u32 {
        self.step();
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.block[..4]);
        u32::from_le_bytes(word)
    }

    fn next_u64(&mut self) -> u64 {
        self.next_i64() as u64
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.fill(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill(dest);
        Ok(())
    }
}

impl CryptoRng for SecureRandom {}
