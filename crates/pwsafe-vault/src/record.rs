//! Field, header and record types.
//!
//! A [`Field`] is the raw on-disk TLV unit. Its length is always the length
//! of its value, so the two cannot drift apart. [`Header`] and [`Record`]
//! are both a [`FieldMap`] (at most one field per type code) with a few typed
//! views on top. Text accessors decode the stored bytes on every call and
//! text setters replace the whole field, so a string view can never disagree
//! with the bytes that will be written.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Type code of the end-of-header / end-of-record sentinel.
pub const END_OF_ENTRY: u8 = 0xFF;

/// Header type code carrying the format version (2 bytes, little-endian).
pub const HEADER_VERSION: u8 = 0x00;

/// Format version written into the header of new containers (V3.13).
pub const FORMAT_VERSION: u16 = 0x030D;

// ---------------------------------------------------------------------------
// Field kinds
// ---------------------------------------------------------------------------

/// Record field types with a text view.
///
/// Every other type code is opaque and carried through byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Group,
    Title,
    User,
    Notes,
    Password,
}

impl FieldKind {
    /// The on-disk type code.
    pub fn code(self) -> u8 {
        match self {
            Self::Group => 0x02,
            Self::Title => 0x03,
            Self::User => 0x04,
            Self::Notes => 0x05,
            Self::Password => 0x06,
        }
    }
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// One type-length-value unit. The value is wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Field {
    field_type: u8,
    value: Zeroizing<Vec<u8>>,
}

impl Field {
    pub fn new(field_type: u8, value: impl Into<Vec<u8>>) -> Self {
        Self {
            field_type,
            value: Zeroizing::new(value.into()),
        }
    }

    /// The zero-length `0xFF` sentinel that closes the header and each record.
    pub fn end_of_entry() -> Self {
        Self::new(END_OF_ENTRY, Vec::new())
    }

    pub fn field_type(&self) -> u8 {
        self.field_type
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Declared length, which is always `value().len()`.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn is_end_of_entry(&self) -> bool {
        self.field_type == END_OF_ENTRY
    }

    /// The value decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values may be passwords; never print them.
        f.debug_struct("Field")
            .field("field_type", &format_args!("0x{:02x}", self.field_type))
            .field("len", &self.value.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// FieldMap
// ---------------------------------------------------------------------------

/// Fields keyed by type code, iterated in ascending code order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: BTreeMap<u8, Field>,
}

impl FieldMap {
    pub fn get(&self, field_type: u8) -> Option<&Field> {
        self.fields.get(&field_type)
    }

    /// Insert a field, returning the one it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ReservedFieldType`] for the `0xFF` sentinel type,
    /// which only exists as a structural marker in the stream.
    pub fn insert(&mut self, field: Field) -> Result<Option<Field>> {
        if field.is_end_of_entry() {
            return Err(VaultError::ReservedFieldType(END_OF_ENTRY));
        }
        Ok(self.put(field))
    }

    pub fn remove(&mut self, field_type: u8) -> Option<Field> {
        self.fields.remove(&field_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert without the sentinel check. A later field of the same type
    /// replaces an earlier one, as when reading a container.
    pub(crate) fn put(&mut self, field: Field) -> Option<Field> {
        self.fields.insert(field.field_type, field)
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Container-level metadata fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: FieldMap,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldMap {
        &mut self.fields
    }

    /// The format version field, if present and well formed.
    pub fn version(&self) -> Option<u16> {
        let value = self.fields.get(HEADER_VERSION)?.value();
        let bytes: [u8; 2] = value.try_into().ok()?;
        Some(u16::from_le_bytes(bytes))
    }

    pub fn set_version(&mut self, version: u16) {
        self.fields
            .put(Field::new(HEADER_VERSION, version.to_le_bytes().to_vec()));
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One credential entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: FieldMap,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldMap {
        &mut self.fields
    }

    /// Text view of a known field; empty when the field is absent.
    pub fn text(&self, kind: FieldKind) -> Cow<'_, str> {
        self.fields
            .get(kind.code())
            .map(Field::text)
            .unwrap_or(Cow::Borrowed(""))
    }

    /// Replace a known field with the UTF-8 encoding of `value`.
    pub fn set_text(&mut self, kind: FieldKind, value: &str) {
        self.fields.put(Field::new(kind.code(), value.as_bytes()));
    }

    pub fn group(&self) -> Cow<'_, str> {
        self.text(FieldKind::Group)
    }

    pub fn set_group(&mut self, value: &str) {
        self.set_text(FieldKind::Group, value);
    }

    pub fn title(&self) -> Cow<'_, str> {
        self.text(FieldKind::Title)
    }

    pub fn set_title(&mut self, value: &str) {
        self.set_text(FieldKind::Title, value);
    }

    pub fn user(&self) -> Cow<'_, str> {
        self.text(FieldKind::User)
    }

    pub fn set_user(&mut self, value: &str) {
        self.set_text(FieldKind::User, value);
    }

    pub fn notes(&self) -> Cow<'_, str> {
        self.text(FieldKind::Notes)
    }

    pub fn set_notes(&mut self, value: &str) {
        self.set_text(FieldKind::Notes, value);
    }

    pub fn password(&self) -> Cow<'_, str> {
        self.text(FieldKind::Password)
    }

    pub fn set_password(&mut self, value: &str) {
        self.set_text(FieldKind::Password, value);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setter_updates_value_and_length_together() {
        let mut record = Record::new();
        record.set_title("short");
        record.set_title("a much longer title");

        let field = record.fields().get(FieldKind::Title.code()).unwrap();
        assert_eq!(field.len(), "a much longer title".len());
        assert_eq!(field.value(), b"a much longer title");
        assert_eq!(record.title(), "a much longer title");
    }

    #[test]
    fn text_view_follows_raw_insert() {
        let mut record = Record::new();
        record
            .fields_mut()
            .insert(Field::new(0x04, b"alice".to_vec()))
            .unwrap();
        assert_eq!(record.user(), "alice");
    }

    #[test]
    fn absent_field_reads_empty() {
        let record = Record::new();
        assert_eq!(record.notes(), "");
        assert!(record.fields().is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let mut record = Record::new();
        record
            .fields_mut()
            .insert(Field::new(0x03, vec![b'o', b'k', 0xff]))
            .unwrap();
        assert_eq!(record.title(), "ok\u{fffd}");
        // The raw bytes are untouched.
        assert_eq!(record.fields().get(0x03).unwrap().value(), &[b'o', b'k', 0xff]);
    }

    #[test]
    fn sentinel_type_cannot_be_stored() {
        let mut record = Record::new();
        let err = record.fields_mut().insert(Field::end_of_entry()).unwrap_err();
        assert!(matches!(err, VaultError::ReservedFieldType(0xFF)));
    }

    #[test]
    fn one_field_per_type() {
        let mut map = FieldMap::default();
        assert!(map.insert(Field::new(0x42, vec![1])).unwrap().is_none());
        let old = map.insert(Field::new(0x42, vec![2])).unwrap().unwrap();
        assert_eq!(old.value(), &[1]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn header_version_roundtrip() {
        let mut header = Header::new();
        assert_eq!(header.version(), None);
        header.set_version(FORMAT_VERSION);
        assert_eq!(header.version(), Some(0x030D));
        assert_eq!(
            header.fields().get(HEADER_VERSION).unwrap().value(),
            &[0x0D, 0x03]
        );
    }

    #[test]
    fn kind_codes_match_format() {
        let codes: Vec<u8> = [
            FieldKind::Group,
            FieldKind::Title,
            FieldKind::User,
            FieldKind::Notes,
            FieldKind::Password,
        ]
        .into_iter()
        .map(FieldKind::code)
        .collect();
        assert_eq!(codes, [0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn debug_output_hides_value() {
        let field = Field::new(0x06, b"hunter2".to_vec());
        let shown = format!("{field:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("0x06"));
    }
}
