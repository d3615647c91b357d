//! lockore-storage: integer-addressed persistent blob slots
//!
//! The vault engine sees the platform store only through [`SlotStore`]
//! (one open container) and [`SlotBackend`] (the set of containers).
//!
//! - [`MemoryBackend`]: process-local containers, shared between handles
//! - [`DirBackend`]: one directory per container, one file per slot

pub mod dir;
pub mod memory;
pub mod slot;

pub use dir::DirBackend;
pub use memory::MemoryBackend;
pub use slot::{SlotBackend, SlotId, SlotStore};
