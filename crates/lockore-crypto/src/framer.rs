//! Bounded-window encryption of a buffer in place.
//!
//! The payload sits at `buf[offset..offset + len]` and the transformed bytes
//! are written to `buf[0..len]`. Each window is read before any output can
//! reach it, so only one copy of the record is ever held. When the caller
//! cannot leave `reserve()` bytes of headroom in front of the payload, a
//! scratch buffer takes the first window instead.

use lockore_core::{LockoreError, LockoreResult};

use crate::cipher::CipherStream;
use crate::BLOCK_SIZE;

#[derive(Debug, Clone, Copy)]
pub struct Framer {
    window: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self { window: 1024 }
    }
}

impl Framer {
    /// `window` must be a non-zero multiple of the cipher block.
    pub fn new(window: usize) -> LockoreResult<Self> {
        if window == 0 || window % BLOCK_SIZE != 0 {
            return Err(LockoreError::InvalidArgument(format!(
                "framer window {window} is not a multiple of {BLOCK_SIZE}"
            )));
        }
        Ok(Self { window })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Headroom required in front of the payload for the in-place path.
    pub fn reserve(&self) -> usize {
        self.window * 3 / 2
    }

    /// Scratch size that covers the fallback path for any payload.
    pub fn scratch_len(&self) -> usize {
        self.window + self.reserve()
    }

    /// Transform `buf[offset..offset + len]` into `buf[..len]`.
    ///
    /// Returns the number of bytes written. Without `reserve()` bytes of
    /// headroom, `scratch` must hold either the whole payload or at least one
    /// window, else the call fails with `ShortBuffer`.
    pub fn process<C: CipherStream + ?Sized>(
        &self,
        cipher: &mut C,
        buf: &mut [u8],
        offset: usize,
        len: usize,
        scratch: Option<&mut [u8]>,
    ) -> LockoreResult<usize> {
        let end = offset
            .checked_add(len)
            .filter(|&e| e <= buf.len())
            .ok_or_else(|| {
                LockoreError::ShortBuffer(format!(
                    "payload {offset}+{len} exceeds buffer of {}",
                    buf.len()
                ))
            })?;
        if len % cipher.block_size() != 0 {
            return Err(LockoreError::malformed(format!(
                "payload of {len} bytes is not block aligned"
            )));
        }

        if offset >= self.reserve() {
            return self.in_place(cipher, buf, offset, end, 0);
        }

        let scratch = scratch.ok_or_else(|| {
            LockoreError::ShortBuffer(format!(
                "offset {offset} below reserve {} and no scratch buffer",
                self.reserve()
            ))
        })?;

        if len <= scratch.len() {
            let tmp = &mut scratch[..len];
            tmp.copy_from_slice(&buf[offset..end]);
            let n = cipher.finish(tmp, &mut buf[..len]);
            tmp.fill(0);
            return n;
        }

        if scratch.len() < self.window {
            return Err(LockoreError::ShortBuffer(format!(
                "scratch {} smaller than window {}",
                scratch.len(),
                self.window
            )));
        }

        // The first window goes to scratch, which leaves a window of
        // headroom for the rest to run in place from buf[0].
        let head = self.window;
        let prefix = &mut scratch[..head];
        cipher.update(&buf[offset..offset + head], prefix)?;
        let rest = self.in_place(cipher, buf, offset + head, end, 0)?;
        buf.copy_within(0..rest, head);
        buf[..head].copy_from_slice(prefix);
        prefix.fill(0);
        Ok(head + rest)
    }

    fn in_place<C: CipherStream + ?Sized>(
        &self,
        cipher: &mut C,
        buf: &mut [u8],
        mut read: usize,
        end: usize,
        mut written: usize,
    ) -> LockoreResult<usize> {
        loop {
            let chunk = (end - read).min(self.window);
            let last = read + chunk == end;
            if written + chunk > read {
                return Err(LockoreError::ShortBuffer(format!(
                    "output at {written} would overtake input at {read}"
                )));
            }
            let (out, input) = buf.split_at_mut(read);
            let src = &input[..chunk];
            let dst = &mut out[written..written + chunk];
            written += if last {
                cipher.finish(src, dst)?
            } else {
                cipher.update(src, dst)?
            };
            read += chunk;
            if last {
                return Ok(written);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{AesCbc, CipherKey};

    fn key() -> CipherKey {
        CipherKey::new([9u8; 32], [3u8; 16])
    }

    fn reference(data: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; data.len()];
        AesCbc::encryptor(&key()).finish(data, &mut out).unwrap();
        out
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn test_new_rejects_unaligned_window() {
        assert!(Framer::new(1000).is_err());
        assert!(Framer::new(0).is_err());
        let f = Framer::new(1024).unwrap();
        assert_eq!(f.reserve(), 1536);
        assert_eq!(f.scratch_len(), 2560);
    }

    #[test]
    fn test_in_place_with_headroom() {
        let framer = Framer::new(64).unwrap();
        for len in [16usize, 64, 80, 640, 656] {
            let data = payload(len);
            let offset = framer.reserve();
            let mut buf = vec![0u8; offset + len];
            buf[offset..].copy_from_slice(&data);

            let n = framer
                .process(&mut AesCbc::encryptor(&key()), &mut buf, offset, len, None)
                .unwrap();
            assert_eq!(n, len);
            assert_eq!(&buf[..len], reference(&data).as_slice(), "len {len}");
        }
    }

    #[test]
    fn test_small_payload_uses_scratch() {
        let framer = Framer::new(64).unwrap();
        let data = payload(48);
        let mut buf = data.clone();
        let mut scratch = vec![0u8; framer.scratch_len()];
        let n = framer
            .process(&mut AesCbc::encryptor(&key()), &mut buf, 0, 48, Some(&mut scratch))
            .unwrap();
        assert_eq!(n, 48);
        assert_eq!(buf, reference(&data));
    }

    #[test]
    fn test_large_payload_without_headroom() {
        let framer = Framer::new(64).unwrap();
        let data = payload(1024);
        let mut buf = data.clone();
        let mut scratch = vec![0u8; 64];
        let n = framer
            .process(&mut AesCbc::encryptor(&key()), &mut buf, 0, 1024, Some(&mut scratch))
            .unwrap();
        assert_eq!(n, 1024);
        assert_eq!(buf, reference(&data));
    }

    #[test]
    fn test_decrypt_roundtrip_through_framer() {
        let framer = Framer::default();
        let data = payload(5008);
        let mut buf = vec![0u8; framer.reserve() + data.len()];
        let off = framer.reserve();
        buf[off..].copy_from_slice(&data);
        framer
            .process(&mut AesCbc::encryptor(&key()), &mut buf, off, data.len(), None)
            .unwrap();

        let mut scratch = vec![0u8; framer.window()];
        let n = framer
            .process(
                &mut AesCbc::decryptor(&key()),
                &mut buf,
                0,
                data.len(),
                Some(&mut scratch),
            )
            .unwrap();
        assert_eq!(&buf[..n], data.as_slice());
    }

    #[test]
    fn test_short_buffer_errors() {
        let framer = Framer::new(64).unwrap();
        let mut buf = payload(512);

        // no headroom, no scratch
        assert!(matches!(
            framer.process(&mut AesCbc::encryptor(&key()), &mut buf, 0, 512, None),
            Err(LockoreError::ShortBuffer(_))
        ));
        // scratch smaller than a window and than the payload
        let mut tiny = [0u8; 32];
        assert!(matches!(
            framer.process(&mut AesCbc::encryptor(&key()), &mut buf, 0, 512, Some(&mut tiny)),
            Err(LockoreError::ShortBuffer(_))
        ));
        // payload past the end of the buffer
        assert!(matches!(
            framer.process(&mut AesCbc::encryptor(&key()), &mut buf, 100, 512, None),
            Err(LockoreError::ShortBuffer(_))
        ));
    }

    #[test]
    fn test_unaligned_length_rejected() {
        let framer = Framer::new(64).unwrap();
        let mut buf = vec![0u8; 200];
        assert!(matches!(
            framer.process(&mut AesCbc::encryptor(&key()), &mut buf, 96, 40, None),
            Err(LockoreError::Malformed(_))
        ));
    }
}
