use crate::batch::{decode_payload, WriteBatch};
use crate::commit::WriteCoordinator;
use crate::config::Config;
use crate::entry::InternalKey;
use crate::error::{Result, StorageError};
use crate::memtable::{LookupResult, Memtable};
use crate::metrics::Metrics;
use crate::sink::GrowableAppendSink;
use crate::view::ByteView;
use crate::wal::{self, LogWriter, LOG_FILE_NAME};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Point-in-time view of the database, identified by a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    sequence: u64,
}

impl Snapshot {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Main storage engine coordinating all operations.
///
/// The `StorageEngine` is the primary interface for interacting with seqkv.
/// It ties together the log, the memtable and the write coordinator.
///
/// # Architecture
///
/// - **Log**: Every write batch is appended to a memory-mapped log before it becomes visible
/// - **Memtable**: All versions live in an in-memory skip list ordered by internal key
/// - **Group commit**: Concurrent writers share log appends and syncs
/// - **Snapshots**: Reads pick versions by sequence number
///
/// Writes block on the coordinator, so they run on tokio's blocking pool.
///
/// # Example
///
/// ```no_run
/// use seqkv::{Config, StorageEngine};
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::new(PathBuf::from("./data"));
///     let engine = StorageEngine::new(config).await?;
///
///     engine.put(b"key", b"value").await?;
///     let value = engine.get(b"key").await?;
///
///     engine.close().await?;
///     Ok(())
/// }
/// ```
pub struct StorageEngine {
    config: Config,
    memtable: Arc<Memtable>,
    coordinator: Arc<WriteCoordinator>,
    metrics: Arc<Metrics>,
}

impl StorageEngine {
    /// Opens the engine in `config.data_dir`, replaying any existing log.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - Directory creation fails
    /// - The log cannot be read, trimmed or mapped
    /// - A checksummed log record does not decode
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let log_path = config.data_dir.join(LOG_FILE_NAME);
        let memtable = Arc::new(Memtable::new());

        // Perform crash recovery
        let valid_end = Self::recover(&log_path, &config, &memtable)?;

        // Resume appending right after the last intact record
        let sink = GrowableAppendSink::open_at(&log_path, valid_end, config.sink_options())?;
        let writer = LogWriter::new(sink, config.checksum_algorithm);

        let metrics = Arc::new(Metrics::new());
        let coordinator = Arc::new(WriteCoordinator::new(
            Arc::clone(&memtable),
            Box::new(writer),
            config.commit_options(),
            Arc::clone(&metrics),
        ));

        tracing::info!(
            "Opened storage at {:?}, last sequence {}, {} comparator",
            config.data_dir,
            memtable.last_sequence(),
            memtable.comparator_name()
        );

        Ok(Self {
            config,
            memtable,
            coordinator,
            metrics,
        })
    }

    /// Replays the log into the memtable and returns the offset to resume at.
    fn recover(log_path: &Path, config: &Config, memtable: &Memtable) -> Result<u64> {
        tracing::info!("Starting crash recovery...");

        // Step 1: Read every intact record
        let replay = wal::replay(log_path, config.checksum_algorithm)?;

        // Step 2: Re-insert entries with their original sequences
        let mut max_sequence = 0u64;
        let mut recovered = 0usize;
        for record in &replay.records {
            for (key, value) in decode_payload(record)? {
                max_sequence = max_sequence.max(key.sequence);
                memtable.insert(key.sequence, key.value_type, &key.user_key, value)?;
                recovered += 1;
            }
        }

        // Step 3: Continue numbering after the newest recovered entry
        memtable.recover_sequence(max_sequence);

        // Step 4: Drop the torn or zeroed tail so new records follow intact ones
        if replay.discarded_bytes > 0 {
            tracing::warn!(
                "Trimming {} bytes after offset {} in {:?}",
                replay.discarded_bytes,
                replay.valid_end,
                log_path
            );
            let file = OpenOptions::new().write(true).open(log_path)?;
            file.set_len(replay.valid_end)?;
            file.sync_all()?;
        }

        tracing::info!(
            "Recovery complete: {} entries, max sequence {}",
            recovered,
            max_sequence
        );
        Ok(replay.valid_end)
    }

    /// Stores `value` under `key`.
    pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let start = Instant::now();
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.commit(batch).await?;
        self.metrics.record_latency("put", start.elapsed());
        Ok(())
    }

    /// Returns the newest value of `key`, or `None` if it is absent or deleted.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();
        let result = self.memtable.get(&ByteView::from(key))?;
        self.metrics.record_latency("get", start.elapsed());
        Ok(result.into_value().map(|value| value.to_vec()))
    }

    /// Writes a tombstone for `key`.
    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        let start = Instant::now();
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.commit(batch).await?;
        self.metrics.record_latency("delete", start.elapsed());
        Ok(())
    }

    /// Applies every entry of `batch` atomically.
    pub async fn write(&self, batch: WriteBatch) -> Result<()> {
        let start = Instant::now();
        self.commit(batch).await?;
        self.metrics.record_latency("write", start.elapsed());
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::task::spawn_blocking(move || coordinator.commit(batch))
            .await
            .map_err(|e| StorageError::BackgroundTask(e.to_string()))??;
        self.metrics.increment_writes();
        Ok(())
    }

    /// Captures the current state for repeatable reads.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            sequence: self.memtable.last_sequence(),
        }
    }

    /// Looks `key` up as of `snapshot`, without copying the value.
    pub async fn get_at(&self, key: &[u8], snapshot: &Snapshot) -> Result<LookupResult> {
        self.memtable.lookup(&ByteView::from(key), snapshot.sequence)
    }

    /// Returns live key-value pairs in `[start, end)`.
    pub async fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let timer = Instant::now();
        let results = self.memtable.scan(
            &ByteView::from(start),
            &ByteView::from(end),
            self.memtable.last_sequence(),
        )?;
        self.metrics.record_latency("scan", timer.elapsed());
        Ok(results
            .into_iter()
            .map(|(key, value)| (key.to_vec(), value.to_vec()))
            .collect())
    }

    /// Every stored version, tombstones included, in index order.
    pub fn versions(&self) -> Vec<(InternalKey, ByteView)> {
        self.memtable.cursor().collect()
    }

    /// Stops accepting writes and closes the log.
    pub async fn close(&self) -> Result<()> {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::task::spawn_blocking(move || coordinator.close())
            .await
            .map_err(|e| StorageError::BackgroundTask(e.to_string()))?
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
