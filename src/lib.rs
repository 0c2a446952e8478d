//! # seqkv - Sequenced Key-Value Storage Core
//!
//! seqkv is the write/read core of a log-structured key-value store. Every
//! write gets a sequence number, every version is kept, and readers choose
//! which versions they see by sequence.
//!
//! ## Architecture
//!
//! - **ByteView**: Zero-copy byte ranges, including composites of several buffers
//! - **Internal keys**: `user key ++ (sequence << 8 | type)` with newest-first ordering
//! - **Memtable**: Concurrent skip list holding every version
//! - **Group commit**: Concurrent writers are folded into one log append by a leader
//! - **Log**: Checksummed records appended through a growable memory mapping
//!
//! ## Example Usage
//!
//! ```no_run
//! use seqkv::{Config, StorageEngine, WriteBatch};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = StorageEngine::new(Config::new(PathBuf::from("./data"))).await?;
//!
//!     // Single writes
//!     engine.put(b"cat", b"meow").await?;
//!     let snapshot = engine.snapshot();
//!     engine.delete(b"cat").await?;
//!
//!     // Atomic batch
//!     let mut batch = WriteBatch::new();
//!     batch.put("dog", "woof").put("fox", "?");
//!     engine.write(batch).await?;
//!
//!     // Reads
//!     assert_eq!(engine.get(b"cat").await?, None);
//!     let old = engine.get_at(b"cat", &snapshot).await?;
//!     assert_eq!(old.into_value().map(|v| v.to_vec()), Some(b"meow".to_vec()));
//!
//!     engine.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: Async facade coordinating all operations
//! - [`commit`]: Group commit coordinator
//! - [`memtable`]: Versioned in-memory index
//! - [`entry`]: Internal key codec and ordering
//! - [`view`]: Zero-copy byte views
//! - [`sink`]: Growable memory-mapped append sink
//! - [`wal`]: Log record framing and replay
//! - [`config`]: Configuration structures
//! - [`error`]: Error types and result aliases

/// Write batches and their log payload encoding
pub mod batch;

/// Checksum utilities (CRC32, XXH64) for data integrity
pub mod checksum;

/// Command-line interface
pub mod cli;

/// Group commit coordinator
pub mod commit;

/// Configuration structures and validation
pub mod config;

/// Core storage engine implementation
pub mod engine;

/// Internal key encoding and comparators
pub mod entry;

/// Error types and result aliases
pub mod error;

/// In-memory versioned skip list
pub mod memtable;

/// Performance metrics collection and reporting
pub mod metrics;

/// Memory-mapped append sink
pub mod sink;

/// Size threshold counters
pub mod threshold;

/// Zero-copy byte views
pub mod view;

/// Write-ahead log framing and replay
pub mod wal;

// Re-export commonly used types
pub use batch::WriteBatch;
pub use config::Config;
pub use engine::{Snapshot, StorageEngine};
pub use error::{Result, StorageError};
pub use memtable::LookupResult;
pub use view::ByteView;
