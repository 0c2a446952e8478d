//! Stored key layout: `[key length: 4B BE][user key][sequence << 8 | type: 8B BE]`.

use crate::error::{Result, StorageError};
use crate::view::ByteView;
use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

/// Largest sequence number representable in the 56-bit sequence field.
pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

/// Largest user key accepted by the 32-bit length prefix.
pub const MAX_USER_KEY_LEN: usize = u32::MAX as usize;

const LENGTH_PREFIX: usize = 4;
const TRAILER: usize = 8;

/// Tag stored in the low byte of the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    Delete = 0,
    Value = 1,
    /// Decode-time fallback for unrecognized tags. Never encoded.
    Unknown = 2,
}

impl ValueType {
    /// Convert a tag byte, falling back to `Unknown`.
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => ValueType::Delete,
            1 => ValueType::Value,
            _ => ValueType::Unknown,
        }
    }
}

/// Packs a sequence and type into the trailer value.
pub fn pack_sequence_and_type(sequence: u64, value_type: ValueType) -> u64 {
    (sequence << 8) | value_type as u64
}

/// Encodes `(sequence, value_type, user_key)` as a stored key.
///
/// # Errors
///
/// - `KeyTooLarge` if the user key does not fit the 32-bit length prefix
/// - `SequenceExhausted` if `sequence > MAX_SEQUENCE`
/// - `UnencodableValueType` for `ValueType::Unknown`
pub fn encode(sequence: u64, value_type: ValueType, user_key: &ByteView) -> Result<ByteView> {
    if user_key.len() > MAX_USER_KEY_LEN {
        return Err(StorageError::KeyTooLarge {
            len: user_key.len(),
            max: MAX_USER_KEY_LEN,
        });
    }
    if sequence > MAX_SEQUENCE {
        return Err(StorageError::SequenceExhausted);
    }
    if value_type == ValueType::Unknown {
        return Err(StorageError::UnencodableValueType);
    }

    let mut buffer = BytesMut::with_capacity(LENGTH_PREFIX + user_key.len() + TRAILER);
    buffer.put_u32(user_key.len() as u32);
    for chunk in user_key.chunks() {
        buffer.put_slice(chunk);
    }
    buffer.put_u64(pack_sequence_and_type(sequence, value_type));
    Ok(ByteView::from(buffer.freeze()))
}

/// Validates the layout and returns the user key length.
fn checked_key_len(stored: &[u8]) -> Result<usize> {
    if stored.len() < LENGTH_PREFIX + TRAILER {
        return Err(StorageError::MalformedKey(format!(
            "stored key of {} bytes is shorter than the fixed header",
            stored.len()
        )));
    }
    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&stored[..LENGTH_PREFIX]);
    let key_len = u32::from_be_bytes(prefix) as usize;
    if LENGTH_PREFIX + key_len + TRAILER != stored.len() {
        return Err(StorageError::MalformedKey(format!(
            "length prefix {} does not match stored key of {} bytes",
            key_len,
            stored.len()
        )));
    }
    Ok(key_len)
}

fn read_trailer(stored: &[u8]) -> u64 {
    let mut trailer = [0u8; TRAILER];
    trailer.copy_from_slice(&stored[stored.len() - TRAILER..]);
    u64::from_be_bytes(trailer)
}

/// Returns the user key of a stored key as a zero-copy sub-range.
pub fn decode_user_key_view(stored: &ByteView) -> Result<ByteView> {
    let bytes = stored.to_bytes();
    let key_len = checked_key_len(&bytes)?;
    Ok(ByteView::from(bytes).slice(LENGTH_PREFIX, key_len)?)
}

/// Returns the packed `sequence << 8 | type` trailer.
pub fn decode_sequence_and_type(stored: &ByteView) -> Result<u64> {
    let bytes = stored.to_bytes();
    checked_key_len(&bytes)?;
    Ok(read_trailer(&bytes))
}

/// Returns the type byte (last byte of the stored key).
pub fn decode_type_byte(stored: &ByteView) -> Result<u8> {
    decode_sequence_and_type(stored).map(|packed| packed as u8)
}

/// Decoded form of a stored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: ByteView,
    pub sequence: u64,
    pub value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: impl Into<ByteView>, sequence: u64, value_type: ValueType) -> Self {
        Self {
            user_key: user_key.into(),
            sequence,
            value_type,
        }
    }

    pub fn encode(&self) -> Result<ByteView> {
        encode(self.sequence, self.value_type, &self.user_key)
    }

    pub fn decode(stored: &ByteView) -> Result<Self> {
        let bytes = stored.to_bytes();
        let key_len = checked_key_len(&bytes)?;
        let packed = read_trailer(&bytes);
        Ok(Self {
            user_key: ByteView::from(bytes).slice(LENGTH_PREFIX, key_len)?,
            sequence: packed >> 8,
            value_type: ValueType::from_byte(packed as u8),
        })
    }
}

/// Ordering of user keys.
///
/// The comparator is a type parameter of the index, fixed at construction.
pub trait UserComparator: Send + Sync + 'static {
    fn name() -> &'static str;

    fn compare(a: &[u8], b: &[u8]) -> Ordering;
}

/// Unsigned byte-wise lexicographic ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl UserComparator for BytewiseComparator {
    fn name() -> &'static str {
        "bytewise"
    }

    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// A validated stored key whose `Ord` is the internal key order under `C`.
pub struct StoredKey<C: UserComparator = BytewiseComparator> {
    bytes: Bytes,
    key_len: usize,
    _comparator: PhantomData<fn() -> C>,
}

impl<C: UserComparator> StoredKey<C> {
    /// Encodes and wraps a stored key.
    pub fn new(sequence: u64, value_type: ValueType, user_key: &ByteView) -> Result<Self> {
        Self::from_view(&encode(sequence, value_type, user_key)?)
    }

    /// Validates an already encoded stored key.
    pub fn from_view(stored: &ByteView) -> Result<Self> {
        let bytes = stored.to_bytes();
        let key_len = checked_key_len(&bytes)?;
        Ok(Self {
            bytes,
            key_len,
            _comparator: PhantomData,
        })
    }

    pub fn user_key(&self) -> &[u8] {
        &self.bytes[LENGTH_PREFIX..LENGTH_PREFIX + self.key_len]
    }

    pub fn sequence_and_type(&self) -> u64 {
        read_trailer(&self.bytes)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence_and_type() >> 8
    }

    pub fn value_type(&self) -> ValueType {
        ValueType::from_byte(self.sequence_and_type() as u8)
    }

    pub fn as_view(&self) -> ByteView {
        ByteView::from(self.bytes.clone())
    }

    /// Decodes into an [`InternalKey`] sharing this key's storage.
    pub fn to_internal_key(&self) -> InternalKey {
        InternalKey {
            user_key: ByteView::from(self.bytes.slice(LENGTH_PREFIX..LENGTH_PREFIX + self.key_len)),
            sequence: self.sequence(),
            value_type: self.value_type(),
        }
    }
}

impl<C: UserComparator> Clone for StoredKey<C> {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            key_len: self.key_len,
            _comparator: PhantomData,
        }
    }
}

impl<C: UserComparator> fmt::Debug for StoredKey<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKey")
            .field("user_key", &String::from_utf8_lossy(self.user_key()))
            .field("sequence", &self.sequence())
            .field("value_type", &self.value_type())
            .finish()
    }
}

impl<C: UserComparator> PartialEq for StoredKey<C> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<C: UserComparator> Eq for StoredKey<C> {}

impl<C: UserComparator> PartialOrd for StoredKey<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: UserComparator> Ord for StoredKey<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        InternalKeyComparator::<C>::compare(self, other)
    }
}

/// Total order over stored keys.
///
/// User keys ascending under `C`; ties broken by the packed
/// `(sequence, type)` trailer with operands reversed, so newer versions sort first.
pub struct InternalKeyComparator<C: UserComparator = BytewiseComparator> {
    _comparator: PhantomData<fn() -> C>,
}

impl<C: UserComparator> InternalKeyComparator<C> {
    pub fn compare(a: &StoredKey<C>, b: &StoredKey<C>) -> Ordering {
        C::compare(a.user_key(), b.user_key())
            .then_with(|| b.sequence_and_type().cmp(&a.sequence_and_type()))
    }

    /// Compares two encoded stored keys, validating both.
    pub fn compare_encoded(a: &ByteView, b: &ByteView) -> Result<Ordering> {
        Ok(Self::compare(
            &StoredKey::<C>::from_view(a)?,
            &StoredKey::<C>::from_view(b)?,
        ))
    }
}

/// Transient search key for "newest version of `user_key` visible at `sequence`".
///
/// Carries the highest encodable tag so that it sorts at or before every
/// real entry of the same user key with a sequence `<= sequence`.
pub struct LookupKey<C: UserComparator = BytewiseComparator> {
    key: StoredKey<C>,
}

impl<C: UserComparator> LookupKey<C> {
    pub fn new(user_key: &ByteView, sequence: u64) -> Result<Self> {
        Ok(Self {
            key: StoredKey::new(sequence.min(MAX_SEQUENCE), ValueType::Value, user_key)?,
        })
    }

    pub fn user_key(&self) -> &[u8] {
        self.key.user_key()
    }

    pub fn as_stored(&self) -> &StoredKey<C> {
        &self.key
    }
}
