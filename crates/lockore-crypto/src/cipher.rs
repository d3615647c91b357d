//! AES adapters: CBC for record bodies, raw ECB blocks for the CPRNG.
//!
//! The block cipher itself is not implemented here. RustCrypto's `aes` and
//! `cbc` crates play the role of the host's opaque cipher primitive.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::Aes256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use lockore_core::{LockoreError, LockoreResult};

use crate::{BLOCK_SIZE, IV_SIZE, KEY_SIZE};

type CbcEncryptor = cbc::Encryptor<Aes256>;
type CbcDecryptor = cbc::Decryptor<Aes256>;

/// AES-256 key plus CBC IV. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl CipherKey {
    pub fn new(key: [u8; KEY_SIZE], iv: [u8; IV_SIZE]) -> Self {
        Self { key, iv }
    }

    /// Split `material` into key and IV. It must hold at least 48 bytes.
    pub fn from_material(material: &[u8]) -> LockoreResult<Self> {
        if material.len() < KEY_SIZE + IV_SIZE {
            return Err(LockoreError::InvalidArgument(format!(
                "key material too short: {} bytes",
                material.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        key.copy_from_slice(&material[..KEY_SIZE]);
        iv.copy_from_slice(&material[KEY_SIZE..KEY_SIZE + IV_SIZE]);
        Ok(Self { key, iv })
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// A streaming block cipher: `update` any number of times, then `finish`.
///
/// Both calls take block-aligned input and write exactly as many bytes as
/// they read. `output` must not alias `input`.
pub trait CipherStream {
    fn block_size(&self) -> usize;

    fn update(&mut self, input: &[u8], output: &mut [u8]) -> LockoreResult<usize>;

    /// Transform the final chunk and rearm the cipher for a new message.
    fn finish(&mut self, input: &[u8], output: &mut [u8]) -> LockoreResult<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

enum CbcState {
    Encrypt(CbcEncryptor),
    Decrypt(CbcDecryptor),
}

/// AES-256-CBC without padding.
pub struct AesCbc {
    key: CipherKey,
    direction: Direction,
    state: CbcState,
}

impl AesCbc {
    pub fn new(key: &CipherKey, direction: Direction) -> Self {
        Self {
            state: Self::fresh_state(key, direction),
            key: key.clone(),
            direction,
        }
    }

    pub fn encryptor(key: &CipherKey) -> Self {
        Self::new(key, Direction::Encrypt)
    }

    pub fn decryptor(key: &CipherKey) -> Self {
        Self::new(key, Direction::Decrypt)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn fresh_state(key: &CipherKey, direction: Direction) -> CbcState {
        let k = GenericArray::from_slice(&key.key);
        let iv = GenericArray::from_slice(&key.iv);
        match direction {
            Direction::Encrypt => CbcState::Encrypt(CbcEncryptor::new(k, iv)),
            Direction::Decrypt => CbcState::Decrypt(CbcDecryptor::new(k, iv)),
        }
    }

    fn check_lengths(input: &[u8], output: &[u8]) -> LockoreResult<()> {
        if input.len() % BLOCK_SIZE != 0 {
            return Err(LockoreError::malformed(format!(
                "cipher input of {} bytes is not block aligned",
                input.len()
            )));
        }
        if output.len() < input.len() {
            return Err(LockoreError::ShortBuffer(format!(
                "cipher output {} < input {}",
                output.len(),
                input.len()
            )));
        }
        Ok(())
    }
}

impl CipherStream for AesCbc {
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn update(&mut self, input: &[u8], output: &mut [u8]) -> LockoreResult<usize> {
        Self::check_lengths(input, output)?;
        let blocks = input
            .chunks_exact(BLOCK_SIZE)
            .zip(output.chunks_exact_mut(BLOCK_SIZE));
        match &mut self.state {
            CbcState::Encrypt(enc) => {
                for (src, dst) in blocks {
                    enc.encrypt_block_b2b_mut(
                        GenericArray::from_slice(src),
                        GenericArray::from_mut_slice(dst),
                    );
                }
            }
            CbcState::Decrypt(dec) => {
                for (src, dst) in blocks {
                    dec.decrypt_block_b2b_mut(
                        GenericArray::from_slice(src),
                        GenericArray::from_mut_slice(dst),
                    );
                }
            }
        }
        Ok(input.len())
    }

    fn finish(&mut self, input: &[u8], output: &mut [u8]) -> LockoreResult<usize> {
        let n = self.update(input, output)?;
        self.state = Self::fresh_state(&self.key, self.direction);
        Ok(n)
    }
}

/// Single-block AES-256 encryption (ECB), the CPRNG's keystream step.
pub(crate) struct AesEcb {
    cipher: Aes256,
}

impl AesEcb {
    pub(crate) fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(key)),
        }
    }

    pub(crate) fn encrypt_block(&self, input: &[u8], output: &mut [u8]) {
        self.cipher.encrypt_block_b2b(
            GenericArray::from_slice(&input[..BLOCK_SIZE]),
            GenericArray::from_mut_slice(&mut output[..BLOCK_SIZE]),
        );
    }
}
