//! lockore-crypto: primitives behind the lockore record vault
//!
//! ```text
//! password ──PBKDF2-HMAC-SHA1──▶ derived salt ──HMAC-SHA3-512──▶ key | iv | check word
//!                                                                   │
//! record bytes ◀──── Framer (bounded window) ◀──── AES-256-CBC ◀────┘
//! ```
//!
//! Keccak/SHA-3, HMAC, PBKDF2 and the counter-mode CPRNG are implemented
//! here. AES and SHA-1 come from RustCrypto and stand in for the host
//! primitives.

pub mod cipher;
pub mod framer;
pub mod hash;
pub mod hmac;
pub mod password;
pub mod pbkdf2;
pub mod random;
pub mod scrub;
pub mod sha3;

pub use cipher::{AesCbc, CipherKey, CipherStream, Direction};
pub use framer::Framer;
pub use hash::{HashFunction, Sha1};
pub use hmac::Hmac;
pub use password::PasswordQuality;
pub use pbkdf2::{DerivedKey, Pbkdf2Outcome, Pbkdf2Params, Pbkdf2Progress, Pbkdf2Worker};
pub use random::SecureRandom;
pub use scrub::scrub;
pub use sha3::Sha3;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// CBC initialisation vector size in bytes
pub const IV_SIZE: usize = 16;
