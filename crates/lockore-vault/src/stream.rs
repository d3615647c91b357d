//! Windowed cursors over a caller-owned byte buffer.
//!
//! One backing allocation is reused for every record: `reinit` moves the
//! window instead of reallocating. `pos` and `size` are relative to the
//! window start, never to the backing buffer.

use lockore_core::{LockoreError, LockoreResult};

/// Read cursor over `buf[offset..offset + len]`.
#[derive(Debug, Clone)]
pub struct BufferReader<'a> {
    buf: &'a [u8],
    offset: usize,
    index: usize,
    mark: usize,
    end: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            index: 0,
            mark: 0,
            end: buf.len(),
        }
    }

    /// Move the window to `[offset, offset + len)` and rewind.
    pub fn reinit(&mut self, offset: usize, len: usize) -> LockoreResult<()> {
        let end = offset
            .checked_add(len)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| {
                LockoreError::InvalidArgument(format!(
                    "window {offset}+{len} exceeds buffer of {}",
                    self.buf.len()
                ))
            })?;
        self.offset = offset;
        self.index = offset;
        self.mark = offset;
        self.end = end;
        Ok(())
    }

    pub fn pos(&self) -> usize {
        self.index - self.offset
    }

    pub fn size(&self) -> usize {
        self.end - self.offset
    }

    pub fn remaining(&self) -> usize {
        self.end - self.index
    }

    pub fn is_at_end(&self) -> bool {
        self.index >= self.end
    }

    pub fn mark(&mut self) {
        self.mark = self.index;
    }

    pub fn reset(&mut self) {
        self.index = self.mark;
    }

    /// Next byte, or `None` at the end of the window.
    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.buf[..self.end].get(self.index)?;
        self.index += 1;
        Some(b)
    }

    pub fn read_exact(&mut self, n: usize) -> LockoreResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(LockoreError::TruncatedInput);
        }
        let buf: &'a [u8] = self.buf;
        let out = &buf[self.index..self.index + n];
        self.index += n;
        Ok(out)
    }

    pub fn read_i64_be(&mut self) -> LockoreResult<i64> {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.read_exact(8)?);
        Ok(i64::from_be_bytes(word))
    }

    /// Skip up to `n` bytes; returns how many were skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.remaining());
        self.index += n;
        n
    }
}

/// Write cursor. Without a backing buffer it only counts, which is how a
/// record is sized before its buffer is allocated.
///
/// Writing past the window is a caller bug and panics.
#[derive(Debug)]
pub struct BufferWriter<'a> {
    buf: Option<&'a mut [u8]>,
    offset: usize,
    index: usize,
}

impl<'a> BufferWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf: Some(buf),
            offset: 0,
            index: 0,
        }
    }

    pub fn counting() -> Self {
        Self {
            buf: None,
            offset: 0,
            index: 0,
        }
    }

    pub fn is_counting(&self) -> bool {
        self.buf.is_none()
    }

    /// Start writing at `offset` of the backing buffer.
    pub fn reinit(&mut self, offset: usize) {
        if let Some(buf) = &self.buf {
            assert!(offset <= buf.len(), "writer offset {offset} past capacity {}", buf.len());
        }
        self.offset = offset;
        self.index = offset;
    }

    pub fn reset(&mut self) {
        self.index = self.offset;
    }

    pub fn pos(&self) -> usize {
        self.index - self.offset
    }

    /// Bytes left before the end of the backing buffer.
    pub fn remaining(&self) -> Option<usize> {
        self.buf.as_ref().map(|b| b.len() - self.index)
    }

    pub fn write_u8(&mut self, b: u8) {
        self.write_all(std::slice::from_ref(&b));
    }

    pub fn write_all(&mut self, data: &[u8]) {
        if let Some(buf) = self.buf.as_deref_mut() {
            let end = self.index + data.len();
            assert!(
                end <= buf.len(),
                "BufferWriter overflow: {end} > {}",
                buf.len()
            );
            buf[self.index..end].copy_from_slice(data);
        }
        self.index += data.len();
    }

    pub fn write_i64_be(&mut self, v: i64) {
        self.write_all(&v.to_be_bytes());
    }
}
