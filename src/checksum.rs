use crate::error::{Result, StorageError};
use crate::view::ByteView;
use xxhash_rust::xxh64::Xxh64 as Xxh64State;

/// Trait for checksum algorithms
pub trait Checksum {
    /// Compute checksum over a sequence of contiguous runs
    fn compute_chunks<'a, I>(&self, chunks: I) -> u32
    where
        I: IntoIterator<Item = &'a [u8]>;

    /// Compute checksum for the given data
    fn compute(&self, data: &[u8]) -> u32 {
        self.compute_chunks([data])
    }

    /// Compute checksum for a view without materializing it
    fn compute_view(&self, view: &ByteView) -> u32 {
        self.compute_chunks(view.chunks())
    }

    /// Verify that the computed checksum matches the expected value
    fn verify(&self, view: &ByteView, expected: u32) -> Result<()> {
        let actual = self.compute_view(view);
        if actual == expected {
            Ok(())
        } else {
            Err(StorageError::ChecksumMismatch { expected, actual })
        }
    }
}

/// CRC32 checksum implementation using crc32fast
#[derive(Debug, Clone, Copy)]
pub struct Crc32;

impl Checksum for Crc32 {
    fn compute_chunks<'a, I>(&self, chunks: I) -> u32
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut hasher = crc32fast::Hasher::new();
        for chunk in chunks {
            hasher.update(chunk);
        }
        hasher.finalize()
    }
}

/// XXH64 checksum implementation using xxhash-rust
/// Returns the lower 32 bits of the 64-bit hash for compatibility
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh64 {
    seed: u64,
}

impl Xxh64 {
    /// Create a new XXH64 hasher with the given seed
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Checksum for Xxh64 {
    fn compute_chunks<'a, I>(&self, chunks: I) -> u32
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut state = Xxh64State::new(self.seed);
        for chunk in chunks {
            state.update(chunk);
        }
        // Lower 32 bits to fit the record header
        (state.digest() & 0xFFFF_FFFF) as u32
    }
}

/// Enum to select checksum algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChecksumAlgorithm {
    CRC32,
    XXH64,
}

impl ChecksumAlgorithm {
    /// Compute checksum using the selected algorithm
    pub fn compute(&self, data: &[u8]) -> u32 {
        match self {
            ChecksumAlgorithm::CRC32 => Crc32.compute(data),
            ChecksumAlgorithm::XXH64 => Xxh64::default().compute(data),
        }
    }

    /// Compute checksum over every chunk of `view`
    pub fn compute_view(&self, view: &ByteView) -> u32 {
        match self {
            ChecksumAlgorithm::CRC32 => Crc32.compute_view(view),
            ChecksumAlgorithm::XXH64 => Xxh64::default().compute_view(view),
        }
    }

    /// Verify checksum using the selected algorithm
    pub fn verify(&self, view: &ByteView, expected: u32) -> Result<()> {
        match self {
            ChecksumAlgorithm::CRC32 => Crc32.verify(view, expected),
            ChecksumAlgorithm::XXH64 => Xxh64::default().verify(view, expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_view() -> ByteView {
        ByteView::concat(vec![ByteView::from("hello "), ByteView::from("world")])
    }

    #[test]
    fn test_crc32_streaming_matches_one_shot() {
        let one_shot = crc32fast::hash(b"hello world");
        assert_eq!(Crc32.compute(b"hello world"), one_shot);
        assert_eq!(Crc32.compute_view(&split_view()), one_shot);
    }

    #[test]
    fn test_crc32_verify() {
        let view = split_view();
        let checksum = Crc32.compute_view(&view);

        assert!(Crc32.verify(&view, checksum).is_ok());
        match Crc32.verify(&view, 0x12345678) {
            Err(StorageError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, 0x12345678);
                assert_eq!(actual, checksum);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_xxh64_streaming_matches_one_shot() {
        let one_shot = (xxhash_rust::xxh64::xxh64(b"hello world", 0) & 0xFFFF_FFFF) as u32;
        assert_eq!(Xxh64::default().compute(b"hello world"), one_shot);
        assert_eq!(Xxh64::default().compute_view(&split_view()), one_shot);
    }

    #[test]
    fn test_xxh64_with_seed() {
        let data = b"hello world";
        // Different seeds should produce different checksums
        assert_ne!(Xxh64::new(0).compute(data), Xxh64::new(1).compute(data));
    }

    #[test]
    fn test_checksum_algorithm_dispatch() {
        let view = split_view();
        for algo in [ChecksumAlgorithm::CRC32, ChecksumAlgorithm::XXH64] {
            let checksum = algo.compute_view(&view);
            assert_eq!(checksum, algo.compute(b"hello world"));
            assert!(algo.verify(&view, checksum).is_ok());
            assert!(algo.verify(&view, checksum ^ 1).is_err());
        }
    }

    #[test]
    fn test_different_algorithms_different_checksums() {
        let data = b"test data";
        assert_ne!(
            ChecksumAlgorithm::CRC32.compute(data),
            ChecksumAlgorithm::XXH64.compute(data)
        );
    }
}
