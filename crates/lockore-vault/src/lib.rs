//! lockore-vault: the password-protected record store
//!
//! ```text
//! Storage ──heads──▶ Record (identity only)
//!    │                  │ load
//!    │                  ▼
//!    │               Record ──fields──▶ Field { String | Integer | Binary }
//!    │
//!    └── slot 1: metadata record (plaintext settings, KDF salt, check word)
//! ```
//!
//! - `varint`/`stream`: the byte-level codec records are built from
//! - `field`/`record`: typed fields, padding islands, record framing
//! - `storage`: the Closed/Locked/Unlocked engine over a slot store
//! - `migrate`: bulk copy between two unlocked stores

pub mod field;
pub mod migrate;
pub mod record;
pub mod storage;
pub mod stream;
pub mod varint;

pub use field::{Field, FieldKind, FieldValue};
pub use migrate::{finish_migration, migrate, Keep, MigrationJob, MigrationOutcome, MigrationProgress};
pub use record::Record;
pub use storage::{PasswordOutcome, Storage, StorageOptions, StorageState};
