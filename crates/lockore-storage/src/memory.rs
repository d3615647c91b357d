//! In-process slot containers.
//!
//! Containers live in a registry shared by every handle, so a store can be
//! closed and reopened within the process. Used by tests and by callers
//! that keep plain settings without touching disk.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lockore_core::{LockoreError, LockoreResult};

use crate::slot::{SlotBackend, SlotId, SlotStore};

#[derive(Debug, Default)]
struct Container {
    slots: BTreeMap<SlotId, Vec<u8>>,
    /// Highest id ever issued; deleted ids are not handed out again.
    last_id: SlotId,
}

impl Container {
    fn used(&self) -> u64 {
        self.slots.values().map(|s| s.len() as u64).sum()
    }
}

type Registry = Arc<Mutex<HashMap<String, Arc<Mutex<Container>>>>>;

#[derive(Debug, Clone)]
pub struct MemoryBackend {
    registry: Registry,
    capacity: u64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_capacity(64 * 1024 * 1024)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every container of this backend may hold up to `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    fn handle(&self, name: &str, container: Arc<Mutex<Container>>) -> Box<dyn SlotStore> {
        Box::new(MemoryStore {
            name: name.to_string(),
            container: Some(container),
            registry: Arc::clone(&self.registry),
            capacity: self.capacity,
        })
    }
}

impl SlotBackend for MemoryBackend {
    fn exists(&self, name: &str) -> LockoreResult<bool> {
        Ok(self.registry.lock().contains_key(name))
    }

    fn create(&self, name: &str) -> LockoreResult<Box<dyn SlotStore>> {
        let mut registry = self.registry.lock();
        if registry.contains_key(name) {
            return Err(LockoreError::AlreadyExists(name.to_string()));
        }
        let container = Arc::new(Mutex::new(Container::default()));
        registry.insert(name.to_string(), Arc::clone(&container));
        drop(registry);
        tracing::debug!(store = name, "memory store created");
        Ok(self.handle(name, container))
    }

    fn open(&self, name: &str) -> LockoreResult<Box<dyn SlotStore>> {
        let container = self
            .registry
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| LockoreError::NotFound(format!("store '{name}'")))?;
        Ok(self.handle(name, container))
    }

    fn remove(&self, name: &str) -> LockoreResult<()> {
        self.registry
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| LockoreError::NotFound(format!("store '{name}'")))
    }

    fn list(&self) -> LockoreResult<Vec<String>> {
        let mut names: Vec<String> = self.registry.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

struct MemoryStore {
    name: String,
    container: Option<Arc<Mutex<Container>>>,
    registry: Registry,
    capacity: u64,
}

impl MemoryStore {
    fn container(&self) -> LockoreResult<&Arc<Mutex<Container>>> {
        self.container
            .as_ref()
            .ok_or_else(|| LockoreError::Storage(format!("store '{}' is closed", self.name)))
    }

    fn check_room(&self, c: &Container, replacing: usize, adding: usize) -> LockoreResult<()> {
        let after = c.used() - replacing as u64 + adding as u64;
        if after > self.capacity {
            return Err(LockoreError::Storage(format!(
                "store '{}' full: {after} > {} bytes",
                self.name, self.capacity
            )));
        }
        Ok(())
    }
}

fn missing(id: SlotId) -> LockoreError {
    LockoreError::NotFound(format!("slot {id}"))
}

impl SlotStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&mut self, data: &[u8]) -> LockoreResult<SlotId> {
        let mut c = self.container()?.lock();
        self.check_room(&c, 0, data.len())?;
        let id = c
            .last_id
            .checked_add(1)
            .ok_or_else(|| LockoreError::Storage(format!("store '{}' ran out of slot ids", self.name)))?;
        c.last_id = id;
        c.slots.insert(id, data.to_vec());
        Ok(id)
    }

    fn set(&mut self, id: SlotId, data: &[u8]) -> LockoreResult<()> {
        let mut c = self.container()?.lock();
        let old = c.slots.get(&id).map(Vec::len).ok_or_else(|| missing(id))?;
        self.check_room(&c, old, data.len())?;
        c.slots.insert(id, data.to_vec());
        Ok(())
    }

    fn get(&self, id: SlotId) -> LockoreResult<Vec<u8>> {
        let c = self.container()?.lock();
        c.slots.get(&id).cloned().ok_or_else(|| missing(id))
    }

    fn read_into(&self, id: SlotId, buf: &mut [u8]) -> LockoreResult<usize> {
        let c = self.container()?.lock();
        let data = c.slots.get(&id).ok_or_else(|| missing(id))?;
        if buf.len() < data.len() {
            return Err(LockoreError::ShortBuffer(format!(
                "slot {id} is {} bytes, buffer {}",
                data.len(),
                buf.len()
            )));
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn delete(&mut self, id: SlotId) -> LockoreResult<()> {
        let mut c = self.container()?.lock();
        c.slots.remove(&id).map(|_| ()).ok_or_else(|| missing(id))
    }

    fn size(&self, id: SlotId) -> LockoreResult<usize> {
        let c = self.container()?.lock();
        c.slots.get(&id).map(Vec::len).ok_or_else(|| missing(id))
    }

    fn enumerate(&self) -> LockoreResult<Vec<SlotId>> {
        Ok(self.container()?.lock().slots.keys().copied().collect())
    }

    fn total_size(&self) -> LockoreResult<u64> {
        Ok(self.container()?.lock().used())
    }

    fn free_space(&self) -> LockoreResult<u64> {
        let used = self.container()?.lock().used();
        Ok(self.capacity.saturating_sub(used))
    }

    fn close(&mut self) -> LockoreResult<()> {
        self.container = None;
        Ok(())
    }

    fn wipe(&mut self) -> LockoreResult<()> {
        if let Some(container) = self.container.take() {
            container.lock().slots.clear();
        }
        self.registry.lock().remove(&self.name);
        tracing::debug!(store = %self.name, "memory store wiped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::contract;

    #[test]
    fn test_contract() {
        contract::exercise(&MemoryBackend::new());
    }

    #[test]
    fn test_capacity_enforced() {
        let backend = MemoryBackend::with_capacity(10);
        let mut store = backend.create("small").unwrap();
        let id = store.add(&[0u8; 8]).unwrap();
        assert_eq!(store.free_space().unwrap(), 2);
        assert!(matches!(store.add(&[0u8; 3]), Err(LockoreError::Storage(_))));
        // replacing shrinks the footprint first
        store.set(id, &[0u8; 10]).unwrap();
        assert_eq!(store.free_space().unwrap(), 0);
    }

    #[test]
    fn test_handles_share_container() {
        let backend = MemoryBackend::new();
        let mut a = backend.create("shared").unwrap();
        let b = backend.open("shared").unwrap();
        let id = a.add(b"visible").unwrap();
        assert_eq!(b.get(id).unwrap(), b"visible");
    }

    #[test]
    fn test_backend_clones_share_registry() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.create("x").unwrap();
        assert!(clone.exists("x").unwrap());
        clone.remove("x").unwrap();
        assert!(!backend.exists("x").unwrap());
        assert!(backend.remove("x").is_err());
    }
}
