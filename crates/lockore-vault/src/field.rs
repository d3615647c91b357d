//! Typed record fields and their wire encoding.
//!
//! ```text
//! field   = tag:u8  name:varstring  icon:varint  format:varint  payload
//! tag     = type (7 bits) | protected (0x80)
//! payload = STRING  varstring
//!         | INTEGER i64 big-endian
//!         | BINARY  varint length + bytes
//!         | META    varstring (record description)
//! pad     = 0x00                        one byte
//!         | 0x81  len:u8  len random bytes
//! ```

use rand::{Rng, RngCore};
use std::cmp::Ordering;
use zeroize::Zeroize;

use lockore_core::{LockoreError, LockoreResult};

use crate::stream::{BufferReader, BufferWriter};
use crate::varint::{read_string, read_varint, write_string, write_varint};

pub mod tag {
    pub const NONE: u8 = 0x00;
    pub const META: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const INTEGER: u8 = 0x03;
    pub const BINARY: u8 = 0x04;
    /// IEEE-754 double; never implemented.
    pub const DECIMAL: u8 = 0x05;

    pub const PROTECTED: u8 = 0x80;
    pub const TYPE_MASK: u8 = !PROTECTED;
    /// A protected NONE: reserved for future use.
    pub const RESERVED: u8 = 0x80;
    pub const PAD: u8 = 0x81;
}

/// Display sub-type hints carried in `format`.
pub mod format {
    pub const DEFAULT: i32 = 0;

    // String fields
    pub const OTP: i32 = 1;
    pub const URI: i32 = 2;
    pub const PHONE: i32 = 3;
    pub const EMAIL: i32 = 4;

    // Integer fields
    pub const DATE: i32 = 1;

    // Binary fields
    pub const TOTP_SEED: i32 = 1;
}

pub const DEFAULT_ICON: i32 = 0;

/// Longest island a single PAD tag can describe: tag + length + 255 bytes.
const MAX_ISLAND: usize = 257;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Binary,
}

impl FieldKind {
    fn tag(self) -> u8 {
        match self {
            Self::String => tag::STRING,
            Self::Integer => tag::INTEGER,
            Self::Binary => tag::BINARY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Binary => "binary",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Binary(Vec<u8>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::String(_) => FieldKind::String,
            Self::Integer(_) => FieldKind::Integer,
            Self::Binary(_) => FieldKind::Binary,
        }
    }
}

impl Zeroize for FieldValue {
    fn zeroize(&mut self) {
        match self {
            Self::String(s) => s.zeroize(),
            Self::Integer(i) => i.zeroize(),
            Self::Binary(b) => b.zeroize(),
        }
    }
}

impl Drop for FieldValue {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}([REDACTED])", self.kind().label())
    }
}

/// A named, typed value inside a record.
///
/// Every setter marks the field modified only when the stored value
/// actually changes.
#[derive(Clone)]
pub struct Field {
    name: String,
    icon: i32,
    format: i32,
    protected: bool,
    value: FieldValue,
    modified: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            icon: DEFAULT_ICON,
            format: format::DEFAULT,
            protected: false,
            value,
            modified: false,
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, FieldValue::String(value.into()))
    }

    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, FieldValue::Integer(value))
    }

    pub fn binary(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(name, FieldValue::Binary(value.into()))
    }

    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn with_icon(mut self, icon: i32) -> Self {
        self.icon = icon;
        self
    }

    pub fn with_format(mut self, format: i32) -> Self {
        self.format = format;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> i32 {
        self.icon
    }

    pub fn format(&self) -> i32 {
        self.format
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn kind(&self) -> FieldKind {
        self.value.kind()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    fn touch(&mut self, changed: bool) {
        self.modified |= changed;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        let changed = self.name != name;
        self.name = name;
        self.touch(changed);
    }

    pub fn set_icon(&mut self, icon: i32) {
        let changed = self.icon != icon;
        self.icon = icon;
        self.touch(changed);
    }

    pub fn set_format(&mut self, format: i32) {
        let changed = self.format != format;
        self.format = format;
        self.touch(changed);
    }

    pub fn set_protected(&mut self, protected: bool) {
        let changed = self.protected != protected;
        self.protected = protected;
        self.touch(changed);
    }

    /// Replace the value, possibly changing the field's type.
    pub fn set_value(&mut self, value: FieldValue) {
        let changed = self.value != value;
        self.value = value;
        self.touch(changed);
    }

    /// Text form: strings as-is, integers in decimal, binaries in hex.
    pub fn as_string(&self) -> String {
        match &self.value {
            FieldValue::String(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Binary(b) => hex::encode(b),
        }
    }

    /// Numeric form. Strings are parsed (empty is 0); binaries of up to
    /// eight bytes are read little-endian.
    pub fn as_i64(&self) -> LockoreResult<i64> {
        match &self.value {
            FieldValue::String(s) if s.is_empty() => Ok(0),
            FieldValue::String(s) => s.trim().parse().map_err(|_| {
                LockoreError::InvalidArgument(format!("field '{}' is not a number", self.name))
            }),
            FieldValue::Integer(i) => Ok(*i),
            FieldValue::Binary(b) if b.len() > 8 => Err(LockoreError::InvalidArgument(
                format!("field '{}' has {} bytes, too long for an integer", self.name, b.len()),
            )),
            FieldValue::Binary(b) => {
                let mut word = [0u8; 8];
                word[..b.len()].copy_from_slice(b);
                Ok(i64::from_le_bytes(word))
            }
        }
    }

    /// Assign from text, keeping the field's type.
    pub fn set_from_str(&mut self, text: &str) -> LockoreResult<()> {
        let value = match self.kind() {
            FieldKind::String => FieldValue::String(text.to_string()),
            FieldKind::Integer => FieldValue::Integer(text.trim().parse().map_err(|_| {
                LockoreError::InvalidArgument(format!("'{text}' is not an integer"))
            })?),
            FieldKind::Binary => FieldValue::Binary(
                hex::decode(text.trim())
                    .map_err(|e| LockoreError::InvalidArgument(format!("bad hex: {e}")))?,
            ),
        };
        self.set_value(value);
        Ok(())
    }

    /// Assign a number, keeping the field's type.
    pub fn set_from_i64(&mut self, v: i64) {
        let value = match self.kind() {
            FieldKind::String => FieldValue::String(v.to_string()),
            FieldKind::Integer => FieldValue::Integer(v),
            FieldKind::Binary => FieldValue::Binary(v.to_le_bytes().to_vec()),
        };
        self.set_value(value);
    }

    pub fn wire_tag(&self) -> u8 {
        let protected = if self.protected { tag::PROTECTED } else { 0 };
        self.kind().tag() | protected
    }

    pub(crate) fn write(&self, w: &mut BufferWriter<'_>) -> LockoreResult<()> {
        write_header(w, self.wire_tag(), &self.name, self.icon, self.format)?;
        match &self.value {
            FieldValue::String(s) => write_string(w, s)?,
            FieldValue::Integer(i) => w.write_i64_be(*i),
            FieldValue::Binary(b) => {
                let len = i32::try_from(b.len()).map_err(|_| {
                    LockoreError::InvalidArgument(format!("binary of {} bytes", b.len()))
                })?;
                write_varint(w, len);
                w.write_all(b);
            }
        }
        Ok(())
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.icon == other.icon
            && self.format == other.format
            && self.protected == other.protected
            && self.value == other.value
    }
}

impl Eq for Field {}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("icon", &self.icon)
            .field("format", &self.format)
            .field("protected", &self.protected)
            .field("value", &self.value)
            .finish()
    }
}

/// Stable display order: unprotected before protected, text before
/// binary, dates last, then case-insensitive name.
pub fn display_cmp(a: &Field, b: &Field) -> Ordering {
    fn group(f: &Field) -> u8 {
        let mut g = u8::from(f.protected);
        if f.kind() == FieldKind::Binary {
            g |= 0x2;
        }
        if f.kind() == FieldKind::Integer && f.format == format::DATE {
            g |= 0x4;
        }
        g
    }
    group(a)
        .cmp(&group(b))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

/// Record identity carried by the META field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MetaField {
    pub name: String,
    pub icon: i32,
    pub format: i32,
    pub description: String,
}

impl MetaField {
    pub(crate) fn write(&self, w: &mut BufferWriter<'_>) -> LockoreResult<()> {
        write_header(w, tag::META, &self.name, self.icon, self.format)?;
        write_string(w, &self.description)
    }
}

/// One decoded unit of a record stream.
pub(crate) enum Item {
    /// Clean end of input at a field boundary.
    End,
    /// NONE byte or padding island.
    Skip,
    Meta(MetaField),
    Field(Field),
}

fn write_header(
    w: &mut BufferWriter<'_>,
    tag: u8,
    name: &str,
    icon: i32,
    format: i32,
) -> LockoreResult<()> {
    w.write_u8(tag);
    write_string(w, name)?;
    write_varint(w, icon);
    write_varint(w, format);
    Ok(())
}

pub(crate) fn read_item(r: &mut BufferReader<'_>) -> LockoreResult<Item> {
    let Some(t) = r.read_u8() else {
        return Ok(Item::End);
    };
    match t {
        tag::RESERVED => return Err(LockoreError::Reserved),
        tag::NONE => return Ok(Item::Skip),
        tag::PAD => {
            let len = r.read_u8().ok_or(LockoreError::TruncatedInput)?;
            r.read_exact(usize::from(len))?;
            return Ok(Item::Skip);
        }
        _ => {}
    }

    let protected = t & tag::PROTECTED != 0;
    let kind = match t & tag::TYPE_MASK {
        tag::META => None,
        tag::STRING => Some(FieldKind::String),
        tag::INTEGER => Some(FieldKind::Integer),
        tag::BINARY => Some(FieldKind::Binary),
        other => return Err(LockoreError::unsupported("field-type", other.to_string())),
    };

    let name = read_string(r)?;
    let icon = read_varint(r)?;
    let format = read_varint(r)?;

    let value = match kind {
        None => {
            return Ok(Item::Meta(MetaField {
                name,
                icon,
                format,
                description: read_string(r)?,
            }))
        }
        Some(FieldKind::String) => FieldValue::String(read_string(r)?),
        Some(FieldKind::Integer) => FieldValue::Integer(r.read_i64_be()?),
        Some(FieldKind::Binary) => {
            let len = read_varint(r)?;
            let len = usize::try_from(len)
                .map_err(|_| LockoreError::malformed(format!("negative binary length {len}")))?;
            FieldValue::Binary(r.read_exact(len)?.to_vec())
        }
    };

    Ok(Item::Field(Field {
        name,
        icon,
        format,
        protected,
        value,
        modified: false,
    }))
}

/// Emit `len` bytes of padding islands. Islands longer than a PAD tag can
/// describe are split at random points.
pub fn write_pad<R: RngCore + ?Sized>(w: &mut BufferWriter<'_>, rng: &mut R, mut len: usize) {
    while len > MAX_ISLAND {
        let part = (rng.next_u32() & 0xFF) as usize + 2;
        write_island(w, rng, part);
        len -= part;
    }
    write_island(w, rng, len);
}

fn write_island<R: RngCore + ?Sized>(w: &mut BufferWriter<'_>, rng: &mut R, len: usize) {
    match len {
        0 => {}
        1 => w.write_u8(tag::NONE),
        _ => {
            let body = len - 2;
            w.write_u8(tag::PAD);
            w.write_u8(body as u8);
            for _ in 0..body {
                w.write_u8(rng.gen());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn encode(f: &Field) -> Vec<u8> {
        let mut w = BufferWriter::counting();
        f.write(&mut w).unwrap();
        let mut out = vec![0u8; w.pos()];
        f.write(&mut BufferWriter::new(&mut out)).unwrap();
        out
    }

    fn decode_one(data: &[u8]) -> LockoreResult<Item> {
        read_item(&mut BufferReader::new(data))
    }

    #[test]
    fn test_string_field_layout() {
        let f = Field::string("user", "alice");
        assert_eq!(
            encode(&f),
            [&[0x02, 0x08][..], b"user", &[0x00, 0x00, 0x0A], b"alice"].concat()
        );
    }

    #[test]
    fn test_protected_integer_layout() {
        let f = Field::integer("pin", 1234).with_protected(true).with_format(format::DATE);
        let bytes = encode(&f);
        assert_eq!(bytes[0], 0x83);
        assert_eq!(&bytes[bytes.len() - 8..], &1234i64.to_be_bytes());
        match decode_one(&bytes).unwrap() {
            Item::Field(back) => {
                assert_eq!(back, f);
                assert!(!back.is_modified());
            }
            _ => panic!("expected a field"),
        }
    }

    #[test]
    fn test_binary_roundtrip() {
        let f = Field::binary("seed", vec![0xDE, 0xAD, 0xBE, 0xEF]).with_icon(7);
        match decode_one(&encode(&f)).unwrap() {
            Item::Field(back) => assert_eq!(back, f),
            _ => panic!("expected a field"),
        }
    }

    #[test]
    fn test_structural_tags() {
        assert!(matches!(decode_one(&[]).unwrap(), Item::End));
        assert!(matches!(decode_one(&[0x00]).unwrap(), Item::Skip));
        assert!(matches!(decode_one(&[0x81, 0x02, 9, 9]).unwrap(), Item::Skip));
        assert!(matches!(decode_one(&[0x80]), Err(LockoreError::Reserved)));
        assert!(matches!(
            decode_one(&[0x05, 0x00, 0x00, 0x00]),
            Err(LockoreError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            decode_one(&[0x7F]),
            Err(LockoreError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_truncation_fails_closed() {
        assert!(matches!(decode_one(&[0x81]), Err(LockoreError::TruncatedInput)));
        assert!(matches!(decode_one(&[0x81, 0x05, 1]), Err(LockoreError::TruncatedInput)));
        let bytes = encode(&Field::string("name", "value"));
        for cut in 1..bytes.len() {
            assert!(
                matches!(decode_one(&bytes[..cut]), Err(LockoreError::TruncatedInput)),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_meta_field() {
        let meta = MetaField {
            name: "Bank".into(),
            icon: 3,
            format: 0,
            description: "checking".into(),
        };
        let mut buf = vec![0u8; 64];
        let mut w = BufferWriter::new(&mut buf);
        meta.write(&mut w).unwrap();
        let n = w.pos();
        assert_eq!(buf[0], tag::META);
        match decode_one(&buf[..n]).unwrap() {
            Item::Meta(back) => assert_eq!(back, meta),
            _ => panic!("expected meta"),
        }
    }

    #[test]
    fn test_pad_lengths() {
        let mut rng = StdRng::seed_from_u64(1);
        for len in [0usize, 1, 2, 3, 257, 258, 300, 1000] {
            let mut w = BufferWriter::counting();
            write_pad(&mut w, &mut rng, len);
            assert_eq!(w.pos(), len, "pad {len}");
        }
    }

    #[test]
    fn test_pad_decodes_as_skips() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut buf = vec![0u8; 700];
        let mut w = BufferWriter::new(&mut buf);
        write_pad(&mut w, &mut rng, 700);
        let mut r = BufferReader::new(&buf);
        loop {
            match read_item(&mut r).unwrap() {
                Item::End => break,
                Item::Skip => {}
                _ => panic!("padding decoded as data"),
            }
        }
    }

    #[test]
    fn test_setters_track_changes() {
        let mut f = Field::string("a", "x");
        f.set_name("a");
        f.set_value(FieldValue::String("x".into()));
        assert!(!f.is_modified());
        f.set_icon(2);
        assert!(f.is_modified());
        f.clear_modified();
        f.set_protected(true);
        assert!(f.is_modified());
    }

    #[test]
    fn test_conversions() {
        let mut i = Field::integer("n", 42);
        assert_eq!(i.as_string(), "42");
        i.set_from_str("-7").unwrap();
        assert_eq!(i.as_i64().unwrap(), -7);
        assert!(i.set_from_str("seven").is_err());

        let mut b = Field::binary("b", vec![1, 0]);
        assert_eq!(b.as_string(), "0100");
        assert_eq!(b.as_i64().unwrap(), 1);
        b.set_from_i64(258);
        assert_eq!(b.as_string(), "0201000000000000");
        b.set_from_str("ff").unwrap();
        assert_eq!(b.value(), &FieldValue::Binary(vec![0xFF]));

        let mut s = Field::string("s", "");
        assert_eq!(s.as_i64().unwrap(), 0);
        s.set_from_i64(5);
        assert_eq!(s.as_string(), "5");
        assert!(Field::binary("x", vec![0u8; 9]).as_i64().is_err());
    }

    #[test]
    fn test_display_order() {
        let mut fields = vec![
            Field::binary("blob", vec![1]),
            Field::string("Zeta", "z"),
            Field::integer("born", 0).with_format(format::DATE),
            Field::string("pin", "1").with_protected(true),
            Field::string("alpha", "a"),
        ];
        fields.sort_by(display_cmp);
        let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["alpha", "Zeta", "pin", "blob", "born"]);
    }

    #[test]
    fn test_debug_redacts_value() {
        let f = Field::string("pin", "1234").with_protected(true);
        let dbg = format!("{f:?}");
        assert!(!dbg.contains("1234"));
        assert!(dbg.contains("REDACTED"));
    }
}
