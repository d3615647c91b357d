use lockore_core::LockoreResult;

/// Slot identifier. Ids start at 1 and are assigned by [`SlotStore::add`].
pub type SlotId = u32;

/// One open container of byte-blob slots.
pub trait SlotStore: Send {
    fn name(&self) -> &str;

    /// Store `data` in a new slot and return its id.
    fn add(&mut self, data: &[u8]) -> LockoreResult<SlotId>;

    /// Replace the contents of an existing slot.
    fn set(&mut self, id: SlotId, data: &[u8]) -> LockoreResult<()>;

    fn get(&self, id: SlotId) -> LockoreResult<Vec<u8>>;

    /// Copy slot `id` into the front of `buf` and return its length.
    /// `buf` must hold at least [`SlotStore::size`] bytes.
    fn read_into(&self, id: SlotId, buf: &mut [u8]) -> LockoreResult<usize>;

    fn delete(&mut self, id: SlotId) -> LockoreResult<()>;

    fn size(&self, id: SlotId) -> LockoreResult<usize>;

    /// Ids of every slot, ascending.
    fn enumerate(&self) -> LockoreResult<Vec<SlotId>>;

    /// Bytes used by all slots.
    fn total_size(&self) -> LockoreResult<u64>;

    /// Bytes that can still be stored.
    fn free_space(&self) -> LockoreResult<u64>;

    /// Release the handle. Later calls fail.
    fn close(&mut self) -> LockoreResult<()>;

    /// Delete the whole container and close the handle.
    fn wipe(&mut self) -> LockoreResult<()>;
}

/// The set of named containers.
pub trait SlotBackend: Send + Sync {
    fn exists(&self, name: &str) -> LockoreResult<bool>;

    /// Create an empty container. Fails with `AlreadyExists` if taken.
    fn create(&self, name: &str) -> LockoreResult<Box<dyn SlotStore>>;

    /// Open an existing container. Fails with `NotFound` if absent.
    fn open(&self, name: &str) -> LockoreResult<Box<dyn SlotStore>>;

    fn remove(&self, name: &str) -> LockoreResult<()>;

    fn list(&self) -> LockoreResult<Vec<String>>;
}
