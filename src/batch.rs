//! Group payload, per entry: `[stored key][value length: 4B BE][value]`.

use crate::entry::{self, InternalKey, ValueType};
use crate::error::{Result, StorageError};
use crate::view::ByteView;
use bytes::Bytes;

/// A single pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub key: ByteView,
    pub value: ByteView,
    pub value_type: ValueType,
}

/// Ordered set of writes applied atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    entries: Vec<BatchEntry>,
    approximate_size: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<ByteView>, value: impl Into<ByteView>) -> &mut Self {
        self.push(key.into(), value.into(), ValueType::Value)
    }

    pub fn delete(&mut self, key: impl Into<ByteView>) -> &mut Self {
        self.push(key.into(), ByteView::empty(), ValueType::Delete)
    }

    fn push(&mut self, key: ByteView, value: ByteView, value_type: ValueType) -> &mut Self {
        self.approximate_size = self
            .approximate_size
            .saturating_add(key.len())
            .saturating_add(value.len());
        self.entries.push(BatchEntry {
            key,
            value,
            value_type,
        });
        self
    }

    /// Moves every entry of `other` to the end of this batch.
    pub fn append(&mut self, other: WriteBatch) {
        self.approximate_size = self.approximate_size.saturating_add(other.approximate_size);
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of key and value lengths.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.approximate_size = 0;
    }

    /// Encodes the batch as a log payload starting at `first_sequence`.
    ///
    /// Values are referenced, not copied.
    pub fn encode(&self, first_sequence: u64) -> Result<ByteView> {
        let mut parts = Vec::with_capacity(self.entries.len() * 3);
        for (offset, entry) in self.entries.iter().enumerate() {
            let sequence = first_sequence
                .checked_add(offset as u64)
                .ok_or(StorageError::SequenceExhausted)?;
            parts.push(entry::encode(sequence, entry.value_type, &entry.key)?);

            let value_len = u32::try_from(entry.value.len()).map_err(|_| {
                StorageError::RecordTooLarge {
                    len: entry.value.len(),
                }
            })?;
            parts.push(ByteView::from(value_len.to_be_bytes().to_vec()));
            parts.push(entry.value.clone());
        }
        Ok(ByteView::concat(parts))
    }
}

fn read_u32(payload: &Bytes, offset: usize) -> Result<u32> {
    let end = offset.checked_add(4).filter(|&end| end <= payload.len()).ok_or_else(|| {
        StorageError::CorruptedRecord {
            offset: offset as u64,
            reason: "truncated length field".to_string(),
        }
    })?;
    let mut field = [0u8; 4];
    field.copy_from_slice(&payload[offset..end]);
    Ok(u32::from_be_bytes(field))
}

fn take(payload: &Bytes, offset: usize, len: usize, what: &str) -> Result<Bytes> {
    let end = offset.checked_add(len).filter(|&end| end <= payload.len()).ok_or_else(|| {
        StorageError::CorruptedRecord {
            offset: offset as u64,
            reason: format!("truncated {}", what),
        }
    })?;
    Ok(payload.slice(offset..end))
}

/// Decodes a group payload into its entries.
///
/// Keys and values share the payload's storage.
pub fn decode_payload(payload: &ByteView) -> Result<Vec<(InternalKey, ByteView)>> {
    let payload = payload.to_bytes();
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < payload.len() {
        let key_len = read_u32(&payload, offset)? as usize;
        let stored = take(&payload, offset, 4 + key_len + 8, "stored key")?;
        let key = InternalKey::decode(&ByteView::from(stored))?;
        offset += 4 + key_len + 8;

        let value_len = read_u32(&payload, offset)? as usize;
        offset += 4;
        let value = take(&payload, offset, value_len, "value")?;
        offset += value_len;

        entries.push((key, ByteView::from(value)));
    }

    Ok(entries)
}
