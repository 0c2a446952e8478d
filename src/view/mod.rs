use crate::error::{Result, StorageError};
use bytes::Bytes;
use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Shape of a [`ByteView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Owned,
    Slice,
    Composite,
}

/// Immutable, cheaply clonable byte range.
#[derive(Clone)]
pub struct ByteView {
    repr: Repr,
}

#[derive(Clone)]
enum Repr {
    Owned(Bytes),
    Slice(Bytes),
    Composite(Arc<Composite>),
}

/// Children of a composite view. Children are always flat and non-empty.
struct Composite {
    parts: Vec<Bytes>,
    /// `ends[i]` is the logical offset one past the last byte of `parts[i]`.
    ends: Vec<usize>,
    len: usize,
}

impl Composite {
    fn start_of(&self, part: usize) -> usize {
        if part == 0 {
            0
        } else {
            self.ends[part - 1]
        }
    }

    /// Index of the child containing logical offset `offset`.
    fn locate(&self, offset: usize) -> usize {
        self.ends.partition_point(|&end| end <= offset)
    }
}

impl ByteView {
    /// Creates an empty view.
    pub fn empty() -> Self {
        Self {
            repr: Repr::Owned(Bytes::new()),
        }
    }

    /// Creates a view that copies `data` into a new owned buffer.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            repr: Repr::Owned(Bytes::copy_from_slice(data)),
        }
    }

    /// Joins `parts` into a single logical view without copying them.
    ///
    /// Composite children are flattened and empty children are dropped, so
    /// the result is at most one level deep. Zero or one surviving part
    /// yields a flat view.
    pub fn concat<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = ByteView>,
    {
        let mut flat = Vec::new();
        for part in parts {
            match part.repr {
                Repr::Owned(bytes) | Repr::Slice(bytes) => {
                    if !bytes.is_empty() {
                        flat.push(bytes);
                    }
                }
                Repr::Composite(composite) => flat.extend(composite.parts.iter().cloned()),
            }
        }
        Self::from_parts(flat)
    }

    fn from_parts(mut parts: Vec<Bytes>) -> Self {
        match parts.len() {
            0 => Self::empty(),
            1 => Self {
                repr: Repr::Slice(parts.remove(0)),
            },
            _ => {
                let mut ends = Vec::with_capacity(parts.len());
                let mut len = 0usize;
                for part in &parts {
                    len += part.len();
                    ends.push(len);
                }
                Self {
                    repr: Repr::Composite(Arc::new(Composite { parts, ends, len })),
                }
            }
        }
    }

    /// Number of bytes exposed by this view.
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Owned(bytes) | Repr::Slice(bytes) => bytes.len(),
            Repr::Composite(composite) => composite.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> Shape {
        match &self.repr {
            Repr::Owned(_) => Shape::Owned,
            Repr::Slice(_) => Shape::Slice,
            Repr::Composite(_) => Shape::Composite,
        }
    }

    /// Returns the byte at `index`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if `index >= len()`.
    pub fn byte_at(&self, index: usize) -> Result<u8> {
        let len = self.len();
        if index >= len {
            return Err(StorageError::OutOfBounds { index, len });
        }
        let byte = match &self.repr {
            Repr::Owned(bytes) | Repr::Slice(bytes) => bytes[index],
            Repr::Composite(composite) => {
                let part = composite.locate(index);
                composite.parts[part][index - composite.start_of(part)]
            }
        };
        Ok(byte)
    }

    /// Returns a view of `len` bytes starting at `start`, sharing storage.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRange` if the range is not fully inside this view.
    pub fn slice(&self, start: usize, len: usize) -> Result<ByteView> {
        let available = self.len();
        let end = start
            .checked_add(len)
            .filter(|&end| end <= available)
            .ok_or(StorageError::InvalidRange {
                start,
                len,
                available,
            })?;
        if len == 0 {
            return Ok(Self::empty());
        }
        if start == 0 && end == available {
            return Ok(self.clone());
        }

        match &self.repr {
            Repr::Owned(bytes) | Repr::Slice(bytes) => Ok(Self {
                repr: Repr::Slice(bytes.slice(start..end)),
            }),
            Repr::Composite(composite) => {
                let first = composite.locate(start);
                let last = composite.locate(end - 1);
                let first_start = composite.start_of(first);
                if first == last {
                    let part = &composite.parts[first];
                    return Ok(Self {
                        repr: Repr::Slice(part.slice(start - first_start..end - first_start)),
                    });
                }

                let mut parts = Vec::with_capacity(last - first + 1);
                parts.push(composite.parts[first].slice(start - first_start..));
                parts.extend(composite.parts[first + 1..last].iter().cloned());
                let last_start = composite.start_of(last);
                parts.push(composite.parts[last].slice(..end - last_start));
                Ok(Self::from_parts(parts))
            }
        }
    }

    /// Returns the view from `start` to the end.
    pub fn slice_from(&self, start: usize) -> Result<ByteView> {
        let len = self.len().checked_sub(start).ok_or(StorageError::InvalidRange {
            start,
            len: 0,
            available: self.len(),
        })?;
        self.slice(start, len)
    }

    /// Contiguous bytes of a flat view, `None` for a composite.
    pub fn as_slice(&self) -> Option<&[u8]> {
        match &self.repr {
            Repr::Owned(bytes) | Repr::Slice(bytes) => Some(&bytes[..]),
            Repr::Composite(_) => None,
        }
    }

    /// Iterates over the underlying contiguous runs in order.
    pub fn chunks(&self) -> Chunks<'_> {
        match &self.repr {
            Repr::Owned(bytes) | Repr::Slice(bytes) => Chunks::Flat(Some(bytes)),
            Repr::Composite(composite) => Chunks::Composite(composite.parts.iter()),
        }
    }

    /// Iterates over every byte of the view.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.chunks().flat_map(|chunk| chunk.iter().copied())
    }

    /// Lexicographic unsigned comparison; on a full-prefix tie the shorter view is less.
    pub fn compare(&self, other: &ByteView) -> Ordering {
        match (self.as_slice(), other.as_slice()) {
            (Some(a), Some(b)) => a.cmp(b),
            _ => self.iter().cmp(other.iter()),
        }
    }

    /// Materializes a copy of the bytes regardless of shape.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Returns contiguous bytes; zero-copy for flat views.
    pub fn to_bytes(&self) -> Bytes {
        match &self.repr {
            Repr::Owned(bytes) | Repr::Slice(bytes) => bytes.clone(),
            Repr::Composite(_) => Bytes::from(self.to_vec()),
        }
    }

    /// Pushes each contiguous run to `consumer`, stopping at the first error.
    pub fn for_each_chunk<F, E>(&self, mut consumer: F) -> std::result::Result<(), E>
    where
        F: FnMut(&[u8]) -> std::result::Result<(), E>,
    {
        for chunk in self.chunks() {
            consumer(chunk)?;
        }
        Ok(())
    }

    /// Writes the view into `writer` chunk by chunk.
    pub fn write_to<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        self.for_each_chunk(|chunk| writer.write_all(chunk))
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.to_vec()).into_owned()
    }
}

/// Iterator over the contiguous runs of a [`ByteView`].
pub enum Chunks<'a> {
    Flat(Option<&'a Bytes>),
    Composite(std::slice::Iter<'a, Bytes>),
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Chunks::Flat(bytes) => bytes.take().filter(|b| !b.is_empty()).map(|b| &b[..]),
            Chunks::Composite(parts) => parts.next().map(|b| &b[..]),
        }
    }
}

impl Default for ByteView {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for ByteView {
    fn from(bytes: Bytes) -> Self {
        Self {
            repr: Repr::Owned(bytes),
        }
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        Self::from(Bytes::from(data))
    }
}

impl From<&[u8]> for ByteView {
    fn from(data: &[u8]) -> Self {
        Self::copy_from_slice(data)
    }
}

impl<const N: usize> From<&[u8; N]> for ByteView {
    fn from(data: &[u8; N]) -> Self {
        Self::copy_from_slice(data)
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        Self::copy_from_slice(data.as_bytes())
    }
}

impl From<String> for ByteView {
    fn from(data: String) -> Self {
        Self::from(data.into_bytes())
    }
}

impl PartialEq for ByteView {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.compare(other) == Ordering::Equal
    }
}

impl Eq for ByteView {}

impl PartialOrd for ByteView {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByteView {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialEq<[u8]> for ByteView {
    fn eq(&self, other: &[u8]) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter().copied())
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteView")
            .field("shape", &self.shape())
            .field("bytes", &self.to_string_lossy())
            .finish()
    }
}
