//! Overwrite secrets with garbage before a buffer is released.

use rand::RngCore;
use std::sync::atomic::{compiler_fence, Ordering};

/// Fill `buf` with non-deterministic bytes.
///
/// Zeroed memory is easy to spot in a dump; random fill is not.
pub fn scrub(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
    compiler_fence(Ordering::SeqCst);
}
