//! Records: an identity (name, description, icon) plus an optional body of
//! fields.
//!
//! A record loaded without its body is a *head*. Heads are what the storage
//! engine keeps in memory after unlock; bodies are decrypted on demand.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use std::cmp::Ordering;

use lockore_core::{LockoreError, LockoreResult};
use lockore_storage::SlotId;

use crate::field::{display_cmp, read_item, write_pad, Field, Item, MetaField};
use crate::stream::{BufferReader, BufferWriter};

/// Random padding source for [`Record::encode`].
pub struct Padding<'r> {
    pub rng: &'r mut dyn RngCore,
    /// Largest island emitted; 0 disables padding.
    pub max_len: usize,
}

#[derive(Debug, Clone)]
pub struct Record {
    rid: Option<SlotId>,
    name: String,
    description: String,
    icon: i32,
    format: i32,
    body: Option<Vec<Field>>,
    modified: bool,
}

impl Default for Record {
    fn default() -> Self {
        Self::new("")
    }
}

impl Record {
    /// A new, unpersisted record with an empty body.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            rid: None,
            name: name.into(),
            description: String::new(),
            icon: 0,
            format: 0,
            body: Some(Vec::new()),
            modified: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_icon(mut self, icon: i32) -> Self {
        self.icon = icon;
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.body.get_or_insert_with(Vec::new).push(field);
        self
    }

    /// Slot the record is persisted in, if any.
    pub fn rid(&self) -> Option<SlotId> {
        self.rid
    }

    pub(crate) fn set_rid(&mut self, rid: Option<SlotId>) {
        self.rid = rid;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn icon(&self) -> i32 {
        self.icon
    }

    pub fn format(&self) -> i32 {
        self.format
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.modified |= self.name != name;
        self.name = name;
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        let description = description.into();
        self.modified |= self.description != description;
        self.description = description;
    }

    pub fn set_icon(&mut self, icon: i32) {
        self.modified |= self.icon != icon;
        self.icon = icon;
    }

    pub(crate) fn set_format(&mut self, format: i32) {
        self.modified |= self.format != format;
        self.format = format;
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn fields(&self) -> LockoreResult<&[Field]> {
        self.body.as_deref().ok_or(LockoreError::NoBody)
    }

    fn body_mut(&mut self) -> LockoreResult<&mut Vec<Field>> {
        self.body.as_mut().ok_or(LockoreError::NoBody)
    }

    pub fn len(&self) -> LockoreResult<usize> {
        Ok(self.fields()?.len())
    }

    pub fn is_empty(&self) -> LockoreResult<bool> {
        Ok(self.fields()?.is_empty())
    }

    pub fn field(&self, index: usize) -> LockoreResult<&Field> {
        self.fields()?
            .get(index)
            .ok_or_else(|| LockoreError::NotFound(format!("field #{index}")))
    }

    pub fn field_mut(&mut self, index: usize) -> LockoreResult<&mut Field> {
        self.body_mut()?
            .get_mut(index)
            .ok_or_else(|| LockoreError::NotFound(format!("field #{index}")))
    }

    pub fn find(&self, name: &str) -> LockoreResult<Option<&Field>> {
        Ok(self.fields()?.iter().find(|f| f.name() == name))
    }

    pub fn find_mut(&mut self, name: &str) -> LockoreResult<Option<&mut Field>> {
        Ok(self.body_mut()?.iter_mut().find(|f| f.name() == name))
    }

    pub fn append(&mut self, field: Field) -> LockoreResult<()> {
        self.body_mut()?.push(field);
        self.modified = true;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> LockoreResult<Field> {
        let body = self.body_mut()?;
        if index >= body.len() {
            return Err(LockoreError::NotFound(format!("field #{index}")));
        }
        let field = body.remove(index);
        self.modified = true;
        Ok(field)
    }

    /// Remove the first field called `name`; returns whether one existed.
    pub fn remove_named(&mut self, name: &str) -> LockoreResult<bool> {
        let body = self.body_mut()?;
        match body.iter().position(|f| f.name() == name) {
            Some(i) => {
                body.remove(i);
                self.modified = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Text value of field `name`, or `default` when it is absent.
    pub fn get_string(&self, name: &str, default: &str) -> LockoreResult<String> {
        Ok(self
            .find(name)?
            .map_or_else(|| default.to_string(), Field::as_string))
    }

    /// Numeric value of field `name`, or `default` when it is absent or
    /// does not convert.
    pub fn get_i64(&self, name: &str, default: i64) -> LockoreResult<i64> {
        Ok(self
            .find(name)?
            .and_then(|f| f.as_i64().ok())
            .unwrap_or(default))
    }

    /// Set field `name` from text. A field whose type cannot take the text
    /// is replaced by a string field.
    pub fn set_string(&mut self, name: &str, value: &str) -> LockoreResult<()> {
        let body = self.body_mut()?;
        let mut changed = false;
        match body.iter().position(|f| f.name() == name) {
            Some(i) => {
                if body[i].set_from_str(value).is_err() {
                    body.remove(i);
                    body.push(Field::string(name, value));
                    changed = true;
                }
            }
            None => {
                body.push(Field::string(name, value));
                changed = true;
            }
        }
        self.modified |= changed;
        Ok(())
    }

    pub fn set_i64(&mut self, name: &str, value: i64) -> LockoreResult<()> {
        let body = self.body_mut()?;
        match body.iter().position(|f| f.name() == name) {
            Some(i) => body[i].set_from_i64(value),
            None => {
                body.push(Field::integer(name, value));
                self.modified = true;
            }
        }
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.modified
            || self
                .body
                .as_ref()
                .is_some_and(|b| b.iter().any(Field::is_modified))
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
        if let Some(body) = &mut self.body {
            body.iter_mut().for_each(Field::clear_modified);
        }
    }

    /// Same identity and the same multiset of fields, in any order.
    pub fn content_eq(&self, other: &Record) -> bool {
        if self.name != other.name
            || self.description != other.description
            || self.icon != other.icon
            || self.format != other.format
        {
            return false;
        }
        match (&self.body, &other.body) {
            (None, None) => true,
            (Some(a), Some(b)) if a.len() == b.len() => {
                let mut used = vec![false; b.len()];
                a.iter().all(|fa| {
                    let hit = b
                        .iter()
                        .enumerate()
                        .position(|(j, fb)| !used[j] && fa == fb);
                    hit.map(|j| used[j] = true).is_some()
                })
            }
            _ => false,
        }
    }

    /// Fields in stable display order.
    pub fn display_order(&self) -> LockoreResult<Vec<&Field>> {
        let mut fields: Vec<&Field> = self.fields()?.iter().collect();
        fields.sort_by(|a, b| display_cmp(a, b));
        Ok(fields)
    }

    fn meta(&self) -> MetaField {
        MetaField {
            name: self.name.clone(),
            icon: self.icon,
            format: self.format,
            description: self.description.clone(),
        }
    }

    /// Serialize the body in reverse order followed by the meta field,
    /// with one random padding island at a random position.
    pub fn encode(&self, w: &mut BufferWriter<'_>, padding: Option<Padding<'_>>) -> LockoreResult<()> {
        let fields = self.fields()?;
        let mut padding = padding.filter(|p| p.max_len > 0);
        let mut slot = match &mut padding {
            Some(p) => p.rng.next_u32() as usize % (fields.len() + 2),
            None => 0,
        };

        for field in fields.iter().rev() {
            pad_at(w, &mut slot, &mut padding);
            field.write(w)?;
        }
        pad_at(w, &mut slot, &mut padding);
        self.meta().write(w)
    }

    /// Parse a record. With `headless` set only the identity is kept.
    ///
    /// Fails closed: any truncation or unknown tag rejects the whole record.
    pub fn decode(
        rid: Option<SlotId>,
        data: &[u8],
        headless: bool,
        rng: &mut dyn RngCore,
    ) -> LockoreResult<Record> {
        let mut r = BufferReader::new(data);
        let mut meta = None;
        let mut fields = Vec::new();
        loop {
            match read_item(&mut r)? {
                Item::End => break,
                Item::Skip => {}
                Item::Meta(m) => {
                    if meta.replace(m).is_some() {
                        return Err(LockoreError::malformed("record has two meta fields"));
                    }
                }
                Item::Field(f) if !headless => fields.push(f),
                Item::Field(_) => {}
            }
        }
        let meta = meta.ok_or_else(|| LockoreError::malformed("record has no meta field"))?;

        let body = if headless {
            None
        } else {
            fields.shuffle(rng);
            Some(fields)
        };
        Ok(Record {
            rid,
            name: meta.name,
            description: meta.description,
            icon: meta.icon,
            format: meta.format,
            body,
            modified: false,
        })
    }

    /// Drop the body, keeping only the head.
    pub fn into_head(mut self) -> Record {
        self.body = None;
        self
    }
}

fn pad_at(w: &mut BufferWriter<'_>, slot: &mut usize, padding: &mut Option<Padding<'_>>) {
    if *slot == 0 {
        return;
    }
    *slot -= 1;
    if *slot > 0 {
        return;
    }
    if let Some(p) = padding {
        let len = p.rng.gen_range(1..=p.max_len);
        write_pad(w, &mut *p.rng, len);
    }
}

/// Order heads for listing: by name, case-insensitive.
pub fn head_cmp(a: &Record, b: &Record) -> Ordering {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{format, FieldValue};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample() -> Record {
        Record::new("Bank")
            .with_description("checking account")
            .with_icon(4)
            .with_field(Field::string("user", "alice"))
            .with_field(Field::string("pin", "1234").with_protected(true))
            .with_field(Field::integer("opened", 1_600_000_000).with_format(format::DATE))
            .with_field(Field::binary("seed", vec![1, 2, 3]))
    }

    fn encode(record: &Record, seed: u64, max_len: usize) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut w = BufferWriter::counting();
        record
            .encode(&mut w, Some(Padding { rng: &mut rng, max_len }))
            .unwrap();
        let mut out = vec![0u8; w.pos()];
        let mut rng = StdRng::seed_from_u64(seed);
        let mut w = BufferWriter::new(&mut out);
        record
            .encode(&mut w, Some(Padding { rng: &mut rng, max_len }))
            .unwrap();
        assert_eq!(w.pos(), out.len());
        out
    }

    fn decode(data: &[u8], headless: bool) -> LockoreResult<Record> {
        Record::decode(Some(9), data, headless, &mut StdRng::seed_from_u64(0))
    }

    #[test]
    fn test_roundtrip_with_padding() {
        let record = sample();
        for seed in 0..32 {
            let back = decode(&encode(&record, seed, 256), false).unwrap();
            assert!(back.content_eq(&record), "seed {seed}");
            assert_eq!(back.rid(), Some(9));
            assert!(!back.is_modified());
        }
    }

    #[test]
    fn test_padding_is_transparent() {
        let record = sample();
        let plain = decode(&encode(&record, 1, 0), false).unwrap();
        let padded = decode(&encode(&record, 1, 256), false).unwrap();
        assert!(plain.content_eq(&padded));
    }

    #[test]
    fn test_meta_written_last() {
        let record = Record::new("x").with_field(Field::string("a", "b"));
        let bytes = encode(&record, 0, 0);
        assert_eq!(bytes[0], crate::field::tag::STRING);
        let mut w = BufferWriter::counting();
        record.meta().write(&mut w).unwrap();
        assert_eq!(bytes[bytes.len() - w.pos()], crate::field::tag::META);
    }

    #[test]
    fn test_headless_decode() {
        let head = decode(&encode(&sample(), 3, 64), true).unwrap();
        assert_eq!(head.name(), "Bank");
        assert_eq!(head.description(), "checking account");
        assert_eq!(head.icon(), 4);
        assert!(!head.has_body());
        assert!(matches!(head.fields(), Err(LockoreError::NoBody)));
        assert!(matches!(head.get_string("user", ""), Err(LockoreError::NoBody)));
    }

    #[test]
    fn test_meta_cardinality() {
        let mut bytes = encode(&Record::new("a"), 0, 0);
        assert!(decode(&bytes, false).is_ok());
        let again = bytes.clone();
        bytes.extend_from_slice(&again);
        assert!(matches!(decode(&bytes, false), Err(LockoreError::Malformed(_))));
        assert!(matches!(decode(&[0x00, 0x00], false), Err(LockoreError::Malformed(_))));
    }

    #[test]
    fn test_encode_headless_fails() {
        let head = sample().into_head();
        let mut w = BufferWriter::counting();
        assert!(matches!(head.encode(&mut w, None), Err(LockoreError::NoBody)));
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let mut record = Record::new("many");
        for i in 0..16 {
            record.append(Field::integer(format!("f{i}"), i)).unwrap();
        }
        let bytes = encode(&record, 5, 0);
        let a = Record::decode(None, &bytes, false, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = Record::decode(None, &bytes, false, &mut StdRng::seed_from_u64(2)).unwrap();
        assert!(a.content_eq(&b));
        let names = |r: &Record| r.fields().unwrap().iter().map(|f| f.name().to_string()).collect::<Vec<_>>();
        assert_ne!(names(&a), names(&b));
    }

    #[test]
    fn test_settings_accessors() {
        let mut r = Record::new("settings");
        assert_eq!(r.get_string("theme", "dark").unwrap(), "dark");
        r.set_string("theme", "light").unwrap();
        assert!(r.is_modified());
        r.clear_modified();

        r.set_string("theme", "light").unwrap();
        assert!(!r.is_modified());

        r.set_i64("count", 3).unwrap();
        assert_eq!(r.get_i64("count", 0).unwrap(), 3);
        assert_eq!(r.get_string("count", "").unwrap(), "3");

        // an integer field cannot hold text, so it becomes a string
        r.set_string("count", "many").unwrap();
        assert_eq!(r.find("count").unwrap().unwrap().value(), &FieldValue::String("many".into()));
        assert_eq!(r.get_i64("count", -1).unwrap(), -1);
        assert_eq!(r.len().unwrap(), 2);
    }

    #[test]
    fn test_remove() {
        let mut r = sample();
        assert!(r.remove(10).is_err());
        let f = r.remove(0).unwrap();
        assert_eq!(f.name(), "user");
        assert!(r.remove_named("pin").unwrap());
        assert!(!r.remove_named("pin").unwrap());
        assert_eq!(r.len().unwrap(), 2);
    }

    #[test]
    fn test_content_eq_counts_duplicates() {
        let a = Record::new("d")
            .with_field(Field::string("x", "1"))
            .with_field(Field::string("x", "1"))
            .with_field(Field::string("y", "2"));
        let b = Record::new("d")
            .with_field(Field::string("y", "2"))
            .with_field(Field::string("x", "1"))
            .with_field(Field::string("y", "2"));
        assert!(!a.content_eq(&b));
        assert!(a.content_eq(&a.clone()));
    }

    #[test]
    fn test_display_order() {
        let r = sample();
        let names: Vec<&str> = r.display_order().unwrap().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["user", "pin", "seed", "opened"]);
    }

    fn arb_field() -> impl Strategy<Value = Field> {
        let value = prop_oneof![
            ".{0,40}".prop_map(FieldValue::String),
            any::<i64>().prop_map(FieldValue::Integer),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(FieldValue::Binary),
        ];
        ("[a-z]{1,12}", value, any::<bool>(), -3i32..100, 0i32..5).prop_map(
            |(name, value, protected, icon, fmt)| {
                Field::new(name, value)
                    .with_protected(protected)
                    .with_icon(icon)
                    .with_format(fmt)
            },
        )
    }

    proptest! {
        #[test]
        fn prop_record_roundtrip(
            name in ".{0,24}",
            description in ".{0,60}",
            fields in proptest::collection::vec(arb_field(), 0..12),
            seed in any::<u64>(),
            max_len in 0usize..600,
        ) {
            let mut record = Record::new(name).with_description(description);
            for f in fields {
                record.append(f).unwrap();
            }
            let back = decode(&encode(&record, seed, max_len), false).unwrap();
            prop_assert!(back.content_eq(&record));
        }

        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&data, false);
            let _ = decode(&data, true);
        }
    }
}
