//! Record layout: `[checksum: 4B LE][payload length: 4B LE][payload]`.
//! A zero length marks the end of written data.

use crate::checksum::ChecksumAlgorithm;
use crate::error::{Result, StorageError};
use crate::sink::DurableSink;
use crate::view::ByteView;
use bytes::Bytes;
use std::path::Path;

/// Name of the log file inside the data directory.
pub const LOG_FILE_NAME: &str = "seqkv.log";

/// Size of the record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 8;

/// Frames payloads as checksummed records over an inner sink.
pub struct LogWriter<S: DurableSink> {
    inner: S,
    checksum: ChecksumAlgorithm,
    records: u64,
}

impl<S: DurableSink> LogWriter<S> {
    pub fn new(inner: S, checksum: ChecksumAlgorithm) -> Self {
        Self {
            inner,
            checksum,
            records: 0,
        }
    }

    /// Number of records written by this writer.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: DurableSink> DurableSink for LogWriter<S> {
    fn append(&mut self, payload: &ByteView) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::RecordTooLarge { len: payload.len() })?;
        let checksum = self.checksum.compute_view(payload);

        let mut header = Vec::with_capacity(RECORD_HEADER_SIZE);
        header.extend_from_slice(&checksum.to_le_bytes());
        header.extend_from_slice(&len.to_le_bytes());

        self.inner
            .append(&ByteView::concat([ByteView::from(header), payload.clone()]))?;
        self.records += 1;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }

    fn end(&self) -> u64 {
        self.inner.end()
    }

    fn rewind(&mut self, end: u64) -> Result<()> {
        self.inner.rewind(end)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Result of replaying a log file.
#[derive(Debug, Default)]
pub struct Replay {
    /// Payloads of every intact record, in log order.
    pub records: Vec<ByteView>,
    /// Offset one past the last intact record.
    pub valid_end: u64,
    /// Bytes after `valid_end` that were not replayed.
    pub discarded_bytes: u64,
}

/// Reads every intact record of the log at `path`.
///
/// Replay stops at the zeroed tail, at a truncated record, or at the first
/// checksum mismatch. A missing file replays as empty.
pub fn replay(path: &Path, checksum: ChecksumAlgorithm) -> Result<Replay> {
    if !path.exists() {
        tracing::info!("No log at {:?}, starting empty", path);
        return Ok(Replay::default());
    }

    let data = Bytes::from(std::fs::read(path)?);
    tracing::info!("Replaying log {:?} ({} bytes)", path, data.len());

    let mut replay = Replay::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining < RECORD_HEADER_SIZE {
            tracing::warn!(
                "Truncated record header at offset {} in {:?}, stopping replay",
                offset,
                path
            );
            break;
        }

        let mut field = [0u8; 4];
        field.copy_from_slice(&data[offset..offset + 4]);
        let expected = u32::from_le_bytes(field);
        field.copy_from_slice(&data[offset + 4..offset + 8]);
        let len = u32::from_le_bytes(field) as usize;

        if len == 0 {
            tracing::debug!("Reached end of written data at offset {}", offset);
            break;
        }
        if remaining - RECORD_HEADER_SIZE < len {
            tracing::warn!(
                "Truncated record at offset {} in {:?}: need {} bytes, have {}",
                offset,
                path,
                len,
                remaining - RECORD_HEADER_SIZE
            );
            break;
        }

        let start = offset + RECORD_HEADER_SIZE;
        let payload = ByteView::from(data.slice(start..start + len));
        if let Err(e) = checksum.verify(&payload, expected) {
            tracing::warn!(
                "Log corruption detected at offset {} in {:?}: {}",
                offset,
                path,
                e
            );
            break;
        }

        replay.records.push(payload);
        offset = start + len;
    }

    replay.valid_end = offset as u64;
    replay.discarded_bytes = (data.len() - offset) as u64;

    tracing::info!(
        "Replayed {} records from {:?}, {} trailing bytes discarded",
        replay.records.len(),
        path,
        replay.discarded_bytes
    );
    Ok(replay)
}
