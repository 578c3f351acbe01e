use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::Serialize;
use thiserror::Error;

/// Number of leading fields that make up the OpenFlow header (version, type, length, xid).
pub const HEADER_FIELD_COUNT: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("Field '{name}' has an invalid mask {mask:#x} for a length of {length} byte(s)")]
    InvalidMask {
        name: String,
        mask: u64,
        length: usize,
    },
    #[error(
        "Field '{name}' spans bytes {offset}..{end} but the buffer only holds {buffer_len} byte(s)"
    )]
    OutOfBounds {
        name: String,
        offset: usize,
        end: usize,
        buffer_len: usize,
    },
}

/// A named span inside a serialized message.
///
/// When `mask` is set, the field only owns the masked bits of its bytes and its logical
/// value is `(raw & mask) >> mask.trailing_zeros()`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    offset: usize,
    length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask: Option<u64>,
}

impl Field {
    pub fn new(name: impl Into<String>, offset: usize, length: usize) -> Self {
        Self {
            name: name.into(),
            offset,
            length,
            mask: None,
        }
    }

    /// Creates a bit-masked field. The mask must be non-zero, made of contiguous bits and
    /// fit in `length` bytes (at most 8).
    pub fn masked(
        name: impl Into<String>,
        offset: usize,
        length: usize,
        mask: u64,
    ) -> Result<Self, StructureError> {
        let name = name.into();
        let width = 64 - mask.leading_zeros() as usize;
        let shifted = mask.checked_shr(mask.trailing_zeros()).unwrap_or(0);
        let contiguous = shifted != 0 && shifted & shifted.wrapping_add(1) == 0;
        if !contiguous || length == 0 || length > 8 || width > 8 * length {
            return Err(StructureError::InvalidMask { name, mask, length });
        }
        Ok(Self {
            name,
            offset,
            length,
            mask: Some(mask),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn mask(&self) -> Option<u64> {
        self.mask
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Largest logical value the field can hold. For masked fields this is the mask shifted
    /// down to bit zero.
    pub fn max_value(&self) -> BigUint {
        match self.mask {
            Some(mask) => BigUint::from(mask >> mask.trailing_zeros()),
            None => (BigUint::one() << (8 * self.length)) - BigUint::one(),
        }
    }

    fn span<'a>(&self, buffer: &'a [u8]) -> Result<&'a [u8], StructureError> {
        buffer
            .get(self.offset..self.end())
            .ok_or_else(|| self.out_of_bounds(buffer.len()))
    }

    fn out_of_bounds(&self, buffer_len: usize) -> StructureError {
        StructureError::OutOfBounds {
            name: self.name.clone(),
            offset: self.offset,
            end: self.end(),
            buffer_len,
        }
    }

    /// Reads the field's logical value from `buffer` as an unsigned big-endian integer.
    pub fn read(&self, buffer: &[u8]) -> Result<BigUint, StructureError> {
        let bytes = self.span(buffer)?;
        match self.mask {
            Some(mask) => {
                let raw = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                Ok(BigUint::from((raw & mask) >> mask.trailing_zeros()))
            }
            None => Ok(BigUint::from_bytes_be(bytes)),
        }
    }

    /// Writes `value` into the field, truncating it to the field's width. Masked fields
    /// keep every bit outside the mask untouched.
    pub fn write(&self, buffer: &mut [u8], value: &BigUint) -> Result<(), StructureError> {
        let buffer_len = buffer.len();
        let end = self.end();
        let bytes = buffer
            .get_mut(self.offset..end)
            .ok_or_else(|| self.out_of_bounds(buffer_len))?;

        let truncated = value & self.max_value();
        match self.mask {
            Some(mask) => {
                let old = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                let new = truncated.iter_u64_digits().next().unwrap_or(0);
                let merged = (old & !mask) | ((new << mask.trailing_zeros()) & mask);
                let be = merged.to_be_bytes();
                bytes.copy_from_slice(&be[8 - self.length..]);
            }
            None => {
                let digits = truncated.to_bytes_be();
                bytes.fill(0);
                if !truncated.is_zero() {
                    bytes[self.length - digits.len()..].copy_from_slice(&digits);
                }
            }
        }
        Ok(())
    }
}

/// Ordered list of fields describing the exact wire layout of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketStructure {
    fields: Vec<Field>,
}

impl PacketStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Appends an unmasked field right after the furthest byte covered so far.
    /// Zero-length spans are not recorded.
    pub fn append(&mut self, name: impl Into<String>, length: usize) {
        if length == 0 {
            return;
        }
        let offset = self.next_offset();
        self.fields.push(Field::new(name, offset, length));
    }

    /// Appends a group of masked fields sharing the same `length` bytes, placed after the
    /// furthest byte covered so far.
    pub fn append_masked(
        &mut self,
        length: usize,
        parts: &[(&str, u64)],
    ) -> Result<(), StructureError> {
        let offset = self.next_offset();
        for (name, mask) in parts {
            self.fields.push(Field::masked(*name, offset, length, *mask)?);
        }
        Ok(())
    }

    /// Appends every field of `other`, shifted by `base_offset` and renamed with `prefix`.
    pub fn extend_prefixed(&mut self, other: &PacketStructure, prefix: &str, base_offset: usize) {
        for field in &other.fields {
            self.fields.push(Field {
                name: format!("{prefix}{}", field.name),
                offset: field.offset + base_offset,
                length: field.length,
                mask: field.mask,
            });
        }
    }

    /// Offset of the first byte after every field recorded so far.
    pub fn next_offset(&self) -> usize {
        self.fields.iter().map(Field::end).max().unwrap_or(0)
    }

    /// Sum of the unmasked lengths plus the masked bits rounded up to whole bytes.
    pub fn byte_length(&self) -> usize {
        let (plain, bits) = self
            .fields
            .iter()
            .fold((0usize, 0usize), |(plain, bits), f| match f.mask {
                Some(mask) => (plain, bits + mask.count_ones() as usize),
                None => (plain + f.length, bits),
            });
        plain + bits.div_ceil(8)
    }

    /// Case-insensitive lookup of the first field with the given name.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// End offset of the header fields, or 0 when the structure is shorter than a header.
    pub fn header_end(&self) -> usize {
        self.fields
            .iter()
            .take(HEADER_FIELD_COUNT)
            .map(Field::end)
            .max()
            .unwrap_or(0)
    }
}

impl<'a> IntoIterator for &'a PacketStructure {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
