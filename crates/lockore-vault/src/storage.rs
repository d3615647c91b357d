//! The record vault: a slot container holding one plaintext metadata record
//! and any number of AES-encrypted records.
//!
//! ```text
//!   create ──▶ Closed ──open──▶ Locked ──unlock / lock──▶ Unlocked
//!                 ▲                                           │
//!                 └──────────────── destroy / wipe ───────────┘
//! ```
//!
//! Slot 1 always holds the metadata record. It is never encrypted because it
//! carries the KDF salt and the password check word. Every other slot holds
//! one record, encrypted with AES-256-CBC under a key derived from the
//! password.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use lockore_core::config::{KdfConfig, LockoreConfig};
use lockore_core::{CancelToken, LockoreError, LockoreResult};
use lockore_crypto::hmac::hmac;
use lockore_crypto::pbkdf2::{self, Pbkdf2Params, Pbkdf2Progress};
use lockore_crypto::{scrub, AesCbc, CipherKey, CipherStream, Framer, SecureRandom, Sha3, BLOCK_SIZE, KEY_SIZE};
use lockore_storage::{SlotBackend, SlotId, SlotStore};

use crate::field::write_pad;
use crate::record::{Padding, Record};
use crate::stream::BufferWriter;

/// Slot of the metadata record.
pub const META_SLOT: SlotId = 1;

/// Container format version, carried in the metadata record's `format`.
pub const VERSION: i32 = 1;

pub const CIPHER_NAME: &str = "AES";
pub const HASH_NAME: &str = "SHA3";

const KEY_CIPHER: &str = ".cipher";
const KEY_KEYLEN: &str = ".keylen";
const KEY_HASH: &str = ".hash";
const KEY_CHECK: &str = ".check";

pub const PBKDF2_HASH: &str = "PBKDF2-Hash";
pub const PBKDF2_COUNT: &str = "PBKDF2-Count";
pub const PBKDF2_SALT: &str = "PBKDF2-Salt";
pub const PBKDF2_HASH_SHA1: &str = "SHA-1";

/// Entropy of the random KDF salt.
pub const SALT_BITS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    Closed,
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordOutcome {
    Done,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Streaming cipher window in bytes.
    pub window: usize,
    pub record_padding: bool,
    pub max_padding: usize,
    /// Skip the headroom allocation and stream through a scratch window.
    pub low_memory: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self::from_config(&LockoreConfig::default())
    }
}

impl StorageOptions {
    pub fn from_config(config: &LockoreConfig) -> Self {
        Self {
            window: config.cipher.window,
            record_padding: config.vault.record_padding,
            max_padding: config.vault.max_padding,
            low_memory: false,
        }
    }
}

/// Iteration count for a newly locked store: the configured count plus up
/// to 1/8 of it at random.
pub fn lock_iterations(config: &KdfConfig, rng: &mut dyn RngCore) -> u32 {
    if !config.iteration_jitter {
        return config.iterations;
    }
    let base = u64::from(config.iterations);
    let extra = base * u64::from(rng.next_u32() & 0xFF) / 2048;
    u32::try_from(base + extra).unwrap_or(u32::MAX)
}

/// Plaintext and ciphertext share one allocation; the payload starts after
/// the framer's headroom. Without headroom a scratch window is used.
struct WorkBuffer {
    buf: Zeroizing<Vec<u8>>,
    offset: usize,
    scratch: Option<Zeroizing<Vec<u8>>>,
}

impl WorkBuffer {
    fn new(framer: &Framer, payload: usize, low_memory: bool) -> LockoreResult<Self> {
        if !low_memory {
            let mut buf = Vec::new();
            if buf.try_reserve_exact(framer.reserve() + payload).is_ok() {
                buf.resize(framer.reserve() + payload, 0);
                return Ok(Self {
                    buf: Zeroizing::new(buf),
                    offset: framer.reserve(),
                    scratch: None,
                });
            }
            tracing::debug!(payload, "no room for cipher headroom, using scratch window");
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(payload)
            .map_err(|_| LockoreError::Storage(format!("cannot allocate {payload} bytes")))?;
        buf.resize(payload, 0);
        Ok(Self {
            buf: Zeroizing::new(buf),
            offset: 0,
            scratch: Some(Zeroizing::new(vec![0u8; framer.scratch_len()])),
        })
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.offset..]
    }

    fn run(&mut self, framer: &Framer, cipher: &mut dyn CipherStream, len: usize) -> LockoreResult<usize> {
        let scratch = self.scratch.as_deref_mut().map(Vec::as_mut_slice);
        framer.process(cipher, &mut self.buf, self.offset, len, scratch)
    }

    fn output(&self, len: usize) -> &[u8] {
        &self.buf[..len]
    }
}

/// Serialize `record` without padding; used for the metadata slot.
fn encode_plain(record: &Record) -> LockoreResult<Vec<u8>> {
    let mut w = BufferWriter::counting();
    record.encode(&mut w, None)?;
    let mut out = vec![0u8; w.pos()];
    record.encode(&mut BufferWriter::new(&mut out), None)?;
    Ok(out)
}

/// HMAC-SHA3-512(password, salt) split into key, IV and a 16-bit check word.
fn cipher_params(password: &[u8], salt: &[u8]) -> LockoreResult<(CipherKey, u16)> {
    let mut h = hmac(Sha3::sha3_512(), password, salt);
    let check = (u16::from(h[46]) << 8) | u16::from(h[47]);
    let key = CipherKey::from_material(&h);
    scrub(&mut h);
    Ok((key?, check))
}

fn check_name(name: &str) -> LockoreResult<()> {
    if name.is_empty() || name.starts_with('.') {
        return Err(LockoreError::InvalidArgument(format!(
            "invalid setting name '{name}'"
        )));
    }
    Ok(())
}

pub struct Storage {
    store: Option<Box<dyn SlotStore>>,
    meta: Record,
    heads: Vec<Record>,
    key: Option<CipherKey>,
    framer: Framer,
    options: StorageOptions,
    rng: SecureRandom,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("records", &self.heads.len())
            .finish()
    }
}

impl Storage {
    /// Create container `id` holding only an unencrypted metadata record.
    pub fn create(
        backend: &dyn SlotBackend,
        id: &str,
        name: &str,
        description: &str,
        icon: i32,
    ) -> LockoreResult<()> {
        let mut store = backend.create(id)?;
        let rid = store.add(&[])?;
        if rid != META_SLOT {
            store.wipe()?;
            return Err(LockoreError::Storage(format!(
                "new store '{id}' assigned slot {rid} to metadata"
            )));
        }

        let mut meta = Record::new(name)
            .with_description(description)
            .with_icon(icon);
        meta.set_format(VERSION);
        meta.set_string(KEY_CIPHER, CIPHER_NAME)?;
        meta.set_i64(KEY_KEYLEN, KEY_SIZE as i64)?;
        meta.set_string(KEY_HASH, HASH_NAME)?;
        store.set(META_SLOT, &encode_plain(&meta)?)?;
        store.close()?;
        tracing::info!(store = id, "store created");
        Ok(())
    }

    /// Open container `id` in the `Locked` state.
    pub fn open(backend: &dyn SlotBackend, id: &str, options: StorageOptions) -> LockoreResult<Self> {
        let framer = Framer::new(options.window)?;
        let mut store = backend.open(id)?;
        let mut rng = SecureRandom::new();
        let meta = store
            .get(META_SLOT)
            .and_then(|data| Record::decode(Some(META_SLOT), &data, false, &mut rng))
            .and_then(|meta| check_format(&meta).map(|()| meta));
        let meta = match meta {
            Ok(meta) => meta,
            Err(e) => {
                store.close()?;
                return Err(e);
            }
        };
        tracing::debug!(store = id, "store opened");
        Ok(Self {
            store: Some(store),
            meta,
            heads: Vec::new(),
            key: None,
            framer,
            options,
            rng,
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.store.as_ref().map(|s| s.name())
    }

    pub fn state(&self) -> StorageState {
        match (&self.store, &self.key) {
            (None, _) => StorageState::Closed,
            (Some(_), None) => StorageState::Locked,
            (Some(_), Some(_)) => StorageState::Unlocked,
        }
    }

    /// True once a password has been set on the container.
    pub fn is_locked(&self) -> bool {
        self.meta.find(KEY_CHECK).ok().flatten().is_some()
    }

    fn store(&self) -> LockoreResult<&dyn SlotStore> {
        self.store.as_deref().ok_or(LockoreError::Locked)
    }

    fn store_mut(&mut self) -> LockoreResult<&mut Box<dyn SlotStore>> {
        self.store.as_mut().ok_or(LockoreError::Locked)
    }

    fn ensure_unlocked(&self) -> LockoreResult<&CipherKey> {
        self.store()?;
        self.key.as_ref().ok_or(LockoreError::Locked)
    }

    /// Set the container password. The store stays usable with the new key.
    pub fn lock(&mut self, password: &[u8], salt: &[u8]) -> LockoreResult<()> {
        self.store()?;
        if self.is_locked() {
            return Err(LockoreError::AlreadyLocked);
        }
        let (key, check) = cipher_params(password, salt)?;
        self.meta.set_i64(KEY_CHECK, i64::from(check))?;
        if let Err(e) = self.save() {
            self.meta.remove_named(KEY_CHECK)?;
            return Err(e);
        }
        self.heads.clear();
        self.key = Some(key);
        tracing::info!(store = ?self.id(), "store locked with password");
        Ok(())
    }

    /// Verify the password and load the head of every record.
    ///
    /// Any failure leaves the store `Locked`.
    pub fn unlock(&mut self, password: &[u8], salt: &[u8]) -> LockoreResult<()> {
        self.store()?;
        self.key = None;
        self.heads.clear();

        let stored = match self.meta.find(KEY_CHECK)? {
            None => return Err(LockoreError::PublicStore),
            Some(field) => field
                .as_i64()
                .ok()
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(|| LockoreError::malformed("invalid password check word"))?,
        };
        let (key, check) = cipher_params(password, salt)?;
        if !bool::from(stored.ct_eq(&check)) {
            tracing::debug!(store = ?self.id(), "unlock rejected");
            return Err(LockoreError::BadSignature);
        }

        self.key = Some(key);
        match self.load_heads() {
            Ok(heads) => {
                self.heads = heads;
                tracing::info!(store = ?self.id(), records = self.heads.len(), "store unlocked");
                Ok(())
            }
            Err(e) => {
                self.key = None;
                if e.is_decode_error() {
                    tracing::warn!(store = ?self.id(), error = %e, "record slot is corrupt");
                }
                Err(e)
            }
        }
    }

    fn load_heads(&mut self) -> LockoreResult<Vec<Record>> {
        let ids = self.store()?.enumerate()?;
        let mut heads = Vec::with_capacity(ids.len());
        for rid in ids.into_iter().filter(|&rid| rid != META_SLOT) {
            heads.push(self.load_slot(rid, true)?);
        }
        Ok(heads)
    }

    fn decrypt_slot(&self, rid: SlotId) -> LockoreResult<(WorkBuffer, usize)> {
        let key = self.ensure_unlocked()?;
        let store = self.store()?;
        let len = store.size(rid)?;
        let mut work = WorkBuffer::new(&self.framer, len, self.options.low_memory)?;
        store.read_into(rid, work.payload_mut())?;
        let mut cipher = AesCbc::decryptor(key);
        let n = work.run(&self.framer, &mut cipher, len)?;
        Ok((work, n))
    }

    fn load_slot(&mut self, rid: SlotId, headless: bool) -> LockoreResult<Record> {
        let (work, n) = self.decrypt_slot(rid)?;
        Record::decode(Some(rid), work.output(n), headless, &mut self.rng)
    }

    /// Encrypt `record` into slot `rid` (or a new slot) and return its head.
    fn save_record(&mut self, record: &Record, rid: Option<SlotId>) -> LockoreResult<Record> {
        let mut cipher = AesCbc::encryptor(self.ensure_unlocked()?);
        let seed = self.rng.next_u64();
        let max_len = if self.options.record_padding {
            self.options.max_padding
        } else {
            0
        };

        // Size with a counting pass; the second pass replays the same padding.
        let mut counter = BufferWriter::counting();
        let mut pad_rng = StdRng::seed_from_u64(seed);
        record.encode(&mut counter, Some(Padding { rng: &mut pad_rng, max_len }))?;
        let len = counter.pos();
        let capacity = len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

        let mut work = WorkBuffer::new(&self.framer, capacity, self.options.low_memory)?;
        {
            let mut w = BufferWriter::new(work.payload_mut());
            let mut pad_rng = StdRng::seed_from_u64(seed);
            record.encode(&mut w, Some(Padding { rng: &mut pad_rng, max_len }))?;
            let pad = capacity - w.pos();
            write_pad(&mut w, &mut self.rng, pad);
        }
        let n = work.run(&self.framer, &mut cipher, capacity)?;

        let store = self.store_mut()?;
        let (rid, added) = match rid {
            Some(rid) => {
                store.set(rid, work.output(n))?;
                (rid, false)
            }
            None => (store.add(work.output(n))?, true),
        };
        drop(work);
        match self.load_slot(rid, true) {
            Ok(head) => Ok(head),
            Err(e) if added => {
                tracing::warn!(rid, error = %e, "new slot unreadable, deleting it");
                if let Err(del) = self.store_mut()?.delete(rid) {
                    tracing::warn!(rid, error = %del, "failed to delete unreadable slot");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn head_index(&self, rid: SlotId) -> Option<usize> {
        self.heads.iter().position(|h| h.rid() == Some(rid))
    }

    /// Persist a new record. It must not already belong to a slot.
    pub fn insert(&mut self, record: &mut Record) -> LockoreResult<()> {
        self.ensure_unlocked()?;
        if let Some(rid) = record.rid() {
            return Err(LockoreError::AlreadyExists(format!(
                "record is attached to slot {rid}"
            )));
        }
        let head = self.save_record(record, None)?;
        record.set_rid(head.rid());
        record.clear_modified();
        tracing::debug!(rid = ?head.rid(), "record inserted");
        self.heads.push(head);
        Ok(())
    }

    /// Re-encrypt a record previously returned by [`Storage::load`].
    pub fn update(&mut self, record: &mut Record) -> LockoreResult<()> {
        self.ensure_unlocked()?;
        let rid = record
            .rid()
            .ok_or_else(|| LockoreError::NotFound("record has no slot".into()))?;
        let index = self
            .head_index(rid)
            .ok_or_else(|| LockoreError::NotFound(format!("record {rid}")))?;
        let head = self.save_record(record, Some(rid))?;
        self.heads[index] = head;
        record.clear_modified();
        tracing::debug!(rid, "record updated");
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> LockoreResult<()> {
        self.ensure_unlocked()?;
        let rid = self
            .heads
            .get(index)
            .and_then(Record::rid)
            .ok_or_else(|| LockoreError::NotFound(format!("record #{index}")))?;
        self.store_mut()?.delete(rid)?;
        self.heads.remove(index);
        tracing::debug!(rid, "record removed");
        Ok(())
    }

    pub fn remove_record(&mut self, record: &Record) -> LockoreResult<()> {
        let index = record
            .rid()
            .and_then(|rid| self.head_index(rid))
            .ok_or_else(|| LockoreError::NotFound(format!("record '{}'", record.name())))?;
        self.remove(index)
    }

    /// Number of records.
    pub fn len(&self) -> LockoreResult<usize> {
        self.ensure_unlocked()?;
        Ok(self.heads.len())
    }

    pub fn is_empty(&self) -> LockoreResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn heads(&self) -> LockoreResult<&[Record]> {
        self.ensure_unlocked()?;
        Ok(&self.heads)
    }

    pub fn get(&self, index: usize) -> LockoreResult<&Record> {
        self.heads()?
            .get(index)
            .ok_or_else(|| LockoreError::NotFound(format!("record #{index}")))
    }

    /// Decrypt the full record at `index`.
    pub fn load(&mut self, index: usize) -> LockoreResult<Record> {
        let rid = self.get(index)?.rid();
        self.load_rid(rid)
    }

    pub fn load_record(&mut self, head: &Record) -> LockoreResult<Record> {
        self.load_rid(head.rid())
    }

    fn load_rid(&mut self, rid: Option<SlotId>) -> LockoreResult<Record> {
        let rid = rid.ok_or_else(|| {
            LockoreError::InvalidArgument("record is not stored in this vault".into())
        })?;
        self.ensure_unlocked()?;
        self.load_slot(rid, false)
    }

    /// Load a detached copy of `head`, optionally renamed, ready for
    /// [`Storage::insert`] here or in another store.
    pub fn clone_record(&mut self, head: &Record, name: Option<&str>) -> LockoreResult<Record> {
        let mut record = self.load_record(head)?;
        record.set_rid(None);
        if let Some(name) = name {
            record.set_name(name);
        }
        Ok(record)
    }

    /// Forget the key and close the container.
    pub fn destroy(&mut self) -> LockoreResult<()> {
        self.key = None;
        self.heads.clear();
        if let Some(mut store) = self.store.take() {
            store.close()?;
            tracing::debug!(store = store.name(), "store closed");
        }
        Ok(())
    }

    /// Forget the key and delete the whole container.
    pub fn wipe(&mut self) -> LockoreResult<()> {
        self.key = None;
        self.heads.clear();
        let mut store = self.store.take().ok_or(LockoreError::Locked)?;
        store.wipe()?;
        tracing::info!(store = store.name(), "store wiped");
        Ok(())
    }

    pub fn get_value(&self, name: &str, default: &str) -> LockoreResult<String> {
        check_name(name)?;
        self.store()?;
        self.meta.get_string(name, default)
    }

    pub fn get_int(&self, name: &str, default: i64) -> LockoreResult<i64> {
        check_name(name)?;
        self.store()?;
        self.meta.get_i64(name, default)
    }

    pub fn set_value(&mut self, name: &str, value: &str) -> LockoreResult<()> {
        check_name(name)?;
        self.store()?;
        self.meta.set_string(name, value)
    }

    pub fn set_int(&mut self, name: &str, value: i64) -> LockoreResult<()> {
        check_name(name)?;
        self.store()?;
        self.meta.set_i64(name, value)
    }

    /// Names of the user settings on the metadata record.
    pub fn setting_names(&self) -> LockoreResult<Vec<String>> {
        self.store()?;
        Ok(self
            .meta
            .fields()?
            .iter()
            .map(|f| f.name().to_string())
            .filter(|n| !n.starts_with('.'))
            .collect())
    }

    /// True when the metadata record has unsaved changes.
    pub fn is_modified(&self) -> bool {
        self.meta.is_modified()
    }

    /// Write the metadata record.
    pub fn save(&mut self) -> LockoreResult<()> {
        let data = encode_plain(&self.meta)?;
        self.store_mut()?.set(META_SLOT, &data)?;
        self.meta.clear_modified();
        Ok(())
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn description(&self) -> &str {
        self.meta.description()
    }

    pub fn icon(&self) -> i32 {
        self.meta.icon()
    }

    pub fn set_name(&mut self, name: &str) {
        self.meta.set_name(name);
    }

    pub fn set_description(&mut self, description: &str) {
        self.meta.set_description(description);
    }

    pub fn set_icon(&mut self, icon: i32) {
        self.meta.set_icon(icon);
    }

    /// Bytes used by the container.
    pub fn storage_size(&self) -> LockoreResult<u64> {
        self.store()?.total_size()
    }

    pub fn storage_free(&self) -> LockoreResult<u64> {
        self.store()?.free_space()
    }

    /// Derive a key from `password` with PBKDF2 and [`lock`](Storage::lock)
    /// the store with it. The KDF parameters are kept in the metadata.
    pub fn lock_with_password(
        &mut self,
        password: &SecretString,
        params: &Pbkdf2Params,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(&Pbkdf2Progress),
    ) -> LockoreResult<PasswordOutcome> {
        self.store()?;
        if self.is_locked() {
            return Err(LockoreError::AlreadyLocked);
        }
        let salt = Zeroizing::new(self.rng.bit_string(SALT_BITS));
        let password = password.expose_secret().as_bytes();
        let outcome = pbkdf2::derive(password, salt.as_bytes(), params, cancel, progress)?;
        let Some(derived) = outcome.into_key() else {
            tracing::info!("password setup canceled");
            return Ok(PasswordOutcome::Canceled);
        };

        self.meta.set_string(PBKDF2_HASH, PBKDF2_HASH_SHA1)?;
        self.meta.set_i64(PBKDF2_COUNT, i64::from(params.iterations))?;
        self.meta.set_string(PBKDF2_SALT, &salt)?;
        if let Err(e) = self.lock(password, derived.as_bytes()) {
            for key in [PBKDF2_HASH, PBKDF2_COUNT, PBKDF2_SALT] {
                self.meta.remove_named(key)?;
            }
            return Err(e);
        }
        Ok(PasswordOutcome::Done)
    }

    /// Re-derive the key with the stored KDF parameters and unlock.
    ///
    /// `params` supplies timing and progress cadence; the iteration count
    /// comes from the store.
    pub fn unlock_with_password(
        &mut self,
        password: &SecretString,
        params: &Pbkdf2Params,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(&Pbkdf2Progress),
    ) -> LockoreResult<PasswordOutcome> {
        self.store()?;
        if !self.is_locked() {
            return Err(LockoreError::PublicStore);
        }
        let hash = self.meta.get_string(PBKDF2_HASH, "")?;
        if hash != PBKDF2_HASH_SHA1 {
            return Err(LockoreError::unsupported("pbkdf2-hash", hash));
        }
        let iterations = self
            .meta
            .get_i64(PBKDF2_COUNT, 0)
            .ok()
            .and_then(|c| u32::try_from(c).ok())
            .filter(|&c| c > 0)
            .ok_or_else(|| LockoreError::malformed("invalid PBKDF2 iteration count"))?;
        let salt = Zeroizing::new(self.meta.get_string(PBKDF2_SALT, "")?);

        let params = Pbkdf2Params {
            iterations,
            ..params.clone()
        };
        let password = password.expose_secret().as_bytes();
        let outcome = pbkdf2::derive(password, salt.as_bytes(), &params, cancel, progress)?;
        let Some(derived) = outcome.into_key() else {
            tracing::info!("unlock canceled");
            return Ok(PasswordOutcome::Canceled);
        };
        self.unlock(password, derived.as_bytes())?;
        Ok(PasswordOutcome::Done)
    }
}

fn check_format(meta: &Record) -> LockoreResult<()> {
    if meta.format() != VERSION {
        return Err(LockoreError::unsupported("version", meta.format().to_string()));
    }
    let cipher = meta.get_string(KEY_CIPHER, "")?;
    let keylen = meta.get_i64(KEY_KEYLEN, 0)?;
    if cipher != CIPHER_NAME || keylen != KEY_SIZE as i64 {
        return Err(LockoreError::unsupported("cipher", format!("{cipher}/{keylen}")));
    }
    let hash = meta.get_string(KEY_HASH, "")?;
    if hash != HASH_NAME {
        return Err(LockoreError::unsupported("hash", hash));
    }
    Ok(())
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::warn!(error = %e, "failed to close store");
        }
    }
}
