//! Zig-zag varints and length-prefixed UTF-8 strings.
//!
//! A varint is the zig-zag mapped value in little-endian groups of 7 bits,
//! high bit set on every byte but the last. 32-bit values need at most
//! five bytes.

use lockore_core::{LockoreError, LockoreResult};

use crate::stream::{BufferReader, BufferWriter};

pub const MAX_VARINT_LEN: usize = 5;

pub fn zigzag(v: i32) -> u32 {
    if v < 0 {
        ((!v as u32) << 1) | 1
    } else {
        (v as u32) << 1
    }
}

pub fn unzigzag(u: u32) -> i32 {
    if u & 1 == 0 {
        (u >> 1) as i32
    } else {
        !((u >> 1) as i32)
    }
}

/// Returns the number of bytes written.
pub fn write_varint(w: &mut BufferWriter<'_>, v: i32) -> usize {
    let mut u = zigzag(v);
    let mut len = 0;
    loop {
        let mut b = (u & 0x7F) as u8;
        u >>= 7;
        if u != 0 {
            b |= 0x80;
        }
        w.write_u8(b);
        len += 1;
        if u == 0 {
            return len;
        }
    }
}

pub fn read_varint(r: &mut BufferReader<'_>) -> LockoreResult<i32> {
    let mut u = 0u32;
    for i in 0..MAX_VARINT_LEN {
        let b = r.read_u8().ok_or(LockoreError::TruncatedInput)?;
        if i == MAX_VARINT_LEN - 1 && b > 0x0F {
            return Err(LockoreError::malformed("varint longer than 32 bits"));
        }
        u |= u32::from(b & 0x7F) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(unzigzag(u));
        }
    }
    Err(LockoreError::malformed("varint longer than 32 bits"))
}

pub fn encode_varint(v: i32) -> Vec<u8> {
    let mut w = BufferWriter::counting();
    let len = write_varint(&mut w, v);
    let mut out = vec![0u8; len];
    write_varint(&mut BufferWriter::new(&mut out), v);
    out
}

pub fn decode_varint(data: &[u8]) -> LockoreResult<i32> {
    read_varint(&mut BufferReader::new(data))
}

/// UTF-8 byte length as a varint, then the bytes.
pub fn write_string(w: &mut BufferWriter<'_>, s: &str) -> LockoreResult<()> {
    let len = i32::try_from(s.len())
        .map_err(|_| LockoreError::InvalidArgument(format!("string of {} bytes", s.len())))?;
    write_varint(w, len);
    w.write_all(s.as_bytes());
    Ok(())
}

pub fn read_string(r: &mut BufferReader<'_>) -> LockoreResult<String> {
    let len = read_varint(r)?;
    let len = usize::try_from(len)
        .map_err(|_| LockoreError::malformed(format!("negative string length {len}")))?;
    let bytes = r.read_exact(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| LockoreError::malformed("string is not UTF-8"))
}

pub fn encode_string(s: &str) -> LockoreResult<Vec<u8>> {
    let mut w = BufferWriter::counting();
    write_string(&mut w, s)?;
    let mut out = vec![0u8; w.pos()];
    write_string(&mut BufferWriter::new(&mut out), s)?;
    Ok(out)
}

pub fn decode_string(data: &[u8]) -> LockoreResult<String> {
    read_string(&mut BufferReader::new(data))
}
