//! Directory-backed slot containers.
//!
//! Layout: `<root>/<store>/<id>.slot`, plus `<root>/<store>/next-id` holding
//! the next id to issue. Writes go to a temporary file first and are renamed
//! into place.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lockore_core::{LockoreError, LockoreResult};

use crate::slot::{SlotBackend, SlotId, SlotStore};

const SLOT_EXT: &str = "slot";
const NEXT_ID_FILE: &str = "next-id";

#[derive(Debug, Clone)]
pub struct DirBackend {
    root: PathBuf,
    quota: u64,
}

impl DirBackend {
    /// Containers live under `root`; each may hold up to `quota` bytes.
    pub fn new(root: impl Into<PathBuf>, quota: u64) -> Self {
        Self {
            root: root.into(),
            quota,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, name: &str) -> LockoreResult<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(LockoreError::InvalidArgument(format!(
                "invalid store name '{name}'"
            )));
        }
        Ok(self.root.join(name))
    }

    fn handle(&self, name: &str, dir: PathBuf) -> Box<dyn SlotStore> {
        Box::new(DirStore {
            name: name.to_string(),
            dir: Some(dir),
            quota: self.quota,
        })
    }
}

impl SlotBackend for DirBackend {
    fn exists(&self, name: &str) -> LockoreResult<bool> {
        Ok(self.container_path(name)?.is_dir())
    }

    fn create(&self, name: &str) -> LockoreResult<Box<dyn SlotStore>> {
        let dir = self.container_path(name)?;
        fs::create_dir_all(&self.root)?;
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LockoreError::AlreadyExists(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(store = name, path = %dir.display(), "directory store created");
        Ok(self.handle(name, dir))
    }

    fn open(&self, name: &str) -> LockoreResult<Box<dyn SlotStore>> {
        let dir = self.container_path(name)?;
        if !dir.is_dir() {
            return Err(LockoreError::NotFound(format!("store '{name}'")));
        }
        Ok(self.handle(name, dir))
    }

    fn remove(&self, name: &str) -> LockoreResult<()> {
        let dir = self.container_path(name)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(LockoreError::NotFound(format!("store '{name}'")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> LockoreResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

struct DirStore {
    name: String,
    dir: Option<PathBuf>,
    quota: u64,
}

impl DirStore {
    fn dir(&self) -> LockoreResult<&Path> {
        self.dir
            .as_deref()
            .ok_or_else(|| LockoreError::Storage(format!("store '{}' is closed", self.name)))
    }

    fn slot_path(&self, id: SlotId) -> LockoreResult<PathBuf> {
        Ok(self.dir()?.join(format!("{id:08}.{SLOT_EXT}")))
    }

    fn existing_slot(&self, id: SlotId) -> LockoreResult<PathBuf> {
        let path = self.slot_path(id)?;
        if !path.is_file() {
            return Err(LockoreError::NotFound(format!("slot {id}")));
        }
        Ok(path)
    }

    /// Next id to issue: the persisted counter, never below one past the
    /// highest slot on disk.
    fn next_id(&self) -> LockoreResult<SlotId> {
        let path = self.dir()?.join(NEXT_ID_FILE);
        let recorded = match fs::read_to_string(&path) {
            Ok(text) => Some(text.trim().parse::<SlotId>().map_err(|_| {
                LockoreError::Storage(format!("store '{}' has a corrupt {NEXT_ID_FILE}", self.name))
            })?),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let after_last = match self.enumerate()?.last() {
            Some(&last) => last.checked_add(1).ok_or_else(|| {
                LockoreError::Storage(format!("store '{}' ran out of slot ids", self.name))
            })?,
            None => 1,
        };
        Ok(recorded.map_or(after_last, |n| n.max(after_last)))
    }

    fn write_next_id(&self, next: SlotId) -> LockoreResult<()> {
        let path = self.dir()?.join(NEXT_ID_FILE);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, next.to_string())?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn write_slot(&self, id: SlotId, data: &[u8], replacing: u64) -> LockoreResult<()> {
        let used = self.total_size()?;
        let after = used - replacing + data.len() as u64;
        if after > self.quota {
            return Err(LockoreError::Storage(format!(
                "store '{}' full: {after} > {} bytes",
                self.name, self.quota
            )));
        }
        let path = self.slot_path(id)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl SlotStore for DirStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&mut self, data: &[u8]) -> LockoreResult<SlotId> {
        let id = self.next_id()?;
        self.write_slot(id, data, 0)?;
        self.write_next_id(id.saturating_add(1))?;
        Ok(id)
    }

    fn set(&mut self, id: SlotId, data: &[u8]) -> LockoreResult<()> {
        let old = self.existing_slot(id)?.metadata()?.len();
        self.write_slot(id, data, old)
    }

    fn get(&self, id: SlotId) -> LockoreResult<Vec<u8>> {
        Ok(fs::read(self.existing_slot(id)?)?)
    }

    fn read_into(&self, id: SlotId, buf: &mut [u8]) -> LockoreResult<usize> {
        let data = self.get(id)?;
        if buf.len() < data.len() {
            return Err(LockoreError::ShortBuffer(format!(
                "slot {id} is {} bytes, buffer {}",
                data.len(),
                buf.len()
            )));
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn delete(&mut self, id: SlotId) -> LockoreResult<()> {
        fs::remove_file(self.existing_slot(id)?)?;
        Ok(())
    }

    fn size(&self, id: SlotId) -> LockoreResult<usize> {
        Ok(self.existing_slot(id)?.metadata()?.len() as usize)
    }

    fn enumerate(&self) -> LockoreResult<Vec<SlotId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.dir()?)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SLOT_EXT) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<SlotId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn total_size(&self) -> LockoreResult<u64> {
        let mut used = 0;
        for id in self.enumerate()? {
            used += self.slot_path(id)?.metadata()?.len();
        }
        Ok(used)
    }

    fn free_space(&self) -> LockoreResult<u64> {
        Ok(self.quota.saturating_sub(self.total_size()?))
    }

    fn close(&mut self) -> LockoreResult<()> {
        self.dir = None;
        Ok(())
    }

    fn wipe(&mut self) -> LockoreResult<()> {
        if let Some(dir) = self.dir.take() {
            fs::remove_dir_all(&dir)?;
            tracing::debug!(store = %self.name, path = %dir.display(), "directory store wiped");
        }
        Ok(())
    }
}
