use super::unmap::UnmapWorker;
use super::DurableSink;
use crate::error::{Result, StorageError};
use crate::view::ByteView;
use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How retired mappings are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnmapMode {
    /// Hand retired mappings to the background unmap worker.
    Async,
    /// Release retired mappings on the writing thread.
    Sync,
}

/// Mapping growth parameters.
#[derive(Debug, Clone, Copy)]
pub struct SinkOptions {
    /// Size of the first mapping in bytes.
    pub initial_map_size: usize,
    /// Mappings double on every growth up to this size.
    pub max_map_size: usize,
    pub unmap_mode: UnmapMode,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            initial_map_size: 512,
            max_map_size: 64 * 1024 * 1024,
            unmap_mode: UnmapMode::Async,
        }
    }
}

/// Append-only writer over a memory-mapped window of a file.
///
/// The window moves forward through the file: when it is full the file is
/// extended, the next region is mapped at double the previous size (up to
/// `max_map_size`) and the old mapping is retired. Closing truncates the
/// file to exactly the appended bytes.
///
/// # Example
///
/// ```no_run
/// use seqkv::sink::{DurableSink, GrowableAppendSink, SinkOptions};
/// use seqkv::view::ByteView;
///
/// # fn main() -> seqkv::Result<()> {
/// let mut sink = GrowableAppendSink::open("./data/seqkv.log", SinkOptions::default())?;
/// sink.append(&ByteView::from("hello"))?;
/// sink.sync()?;
/// sink.close()?;
/// # Ok(())
/// # }
/// ```
pub struct GrowableAppendSink {
    path: PathBuf,
    file: File,
    map: Option<MmapMut>,
    /// File offset of the current mapping.
    map_offset: u64,
    /// Write position inside the current mapping.
    position: usize,
    /// Size of the current mapping, or of the first one before any append.
    map_size: usize,
    max_map_size: usize,
    mode: UnmapMode,
    retired_since_sync: bool,
    worker: Option<UnmapWorker>,
    released: Arc<AtomicU64>,
    remaps: u64,
    closed: bool,
    #[cfg(test)]
    failed_remaps_pending: usize,
}

impl GrowableAppendSink {
    /// Opens `path` for appending from the start of the file.
    pub fn open(path: impl AsRef<Path>, options: SinkOptions) -> Result<Self> {
        Self::open_at(path, 0, options)
    }

    /// Opens `path` for appending at byte `offset`.
    ///
    /// Anything in the file past `offset` is overwritten and, on close,
    /// truncated away.
    pub fn open_at(path: impl AsRef<Path>, offset: u64, options: SinkOptions) -> Result<Self> {
        if options.initial_map_size == 0 || options.initial_map_size > options.max_map_size {
            return Err(StorageError::ConfigError(format!(
                "invalid map sizes: initial {} max {}",
                options.initial_map_size, options.max_map_size
            )));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let released = Arc::new(AtomicU64::new(0));
        let worker = UnmapWorker::spawn("seqkv-unmap", Arc::clone(&released))?;

        tracing::info!("Opened append sink {:?} at offset {}", path, offset);

        Ok(Self {
            path,
            file,
            map: None,
            map_offset: offset,
            position: 0,
            map_size: options.initial_map_size,
            max_map_size: options.max_map_size,
            mode: options.unmap_mode,
            retired_since_sync: false,
            worker: Some(worker),
            released,
            remaps: 0,
            closed: false,
            #[cfg(test)]
            failed_remaps_pending: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset one past the last appended byte.
    pub fn logical_end(&self) -> u64 {
        self.map_offset + self.position as u64
    }

    /// Size of the current mapping.
    pub fn map_size(&self) -> usize {
        self.map_size
    }

    /// Number of mappings created so far.
    pub fn remaps(&self) -> u64 {
        self.remaps
    }

    /// Number of mappings released so far, on either thread.
    pub fn released_mappings(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn unmap_mode(&self) -> UnmapMode {
        self.mode
    }

    pub fn set_unmap_mode(&mut self, mode: UnmapMode) {
        self.mode = mode;
    }

    pub fn append_byte(&mut self, byte: u8) -> Result<()> {
        self.append_slice(&[byte])
    }

    /// Appends `data`, remapping as many times as needed.
    pub fn append_slice(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }

        while !data.is_empty() {
            let position = self.position;
            match self.map.as_mut() {
                Some(map) if position < map.len() => {
                    let n = (map.len() - position).min(data.len());
                    map[position..position + n].copy_from_slice(&data[..n]);
                    self.position += n;
                    data = &data[n..];
                }
                _ => self.remap()?,
            }
        }
        Ok(())
    }

    /// Appends every chunk of `view` without materializing it.
    pub fn append_view(&mut self, view: &ByteView) -> Result<()> {
        view.for_each_chunk(|chunk| self.append_slice(chunk))
    }

    /// Maps the next region of the file and retires the current mapping.
    ///
    /// Nothing changes unless the new region is mapped.
    fn remap(&mut self) -> Result<()> {
        let (next_offset, next_size) = match &self.map {
            Some(old) => (
                self.map_offset + old.len() as u64,
                self.map_size.saturating_mul(2).min(self.max_map_size),
            ),
            None => (self.logical_end(), self.map_size),
        };
        let end = next_offset + next_size as u64;

        #[cfg(test)]
        if self.failed_remaps_pending > 0 {
            self.failed_remaps_pending -= 1;
            return Err(StorageError::IoError(io::Error::new(
                io::ErrorKind::Other,
                "File too large",
            )));
        }

        if self.file.metadata()?.len() < end {
            self.file.set_len(end)?;
        }

        // SAFETY: the file is owned by this sink and only ever accessed
        // through the mapping at [next_offset, end), which lies inside it.
        let map = unsafe {
            MmapOptions::new()
                .offset(next_offset)
                .len(next_size)
                .map_mut(&self.file)?
        };

        if let Some(old) = self.map.replace(map) {
            self.retire(old);
        }
        self.map_offset = next_offset;
        self.map_size = next_size;
        self.position = 0;
        self.remaps += 1;

        tracing::debug!(
            "Mapped {} bytes of {:?} at offset {}",
            next_size,
            self.path,
            next_offset
        );
        Ok(())
    }

    /// Discards everything appended after `end`.
    ///
    /// Inside the current mapping the discarded bytes are zeroed. Further
    /// back, the mapping is retired and the file truncated to `end`.
    pub fn rewind(&mut self, end: u64) -> Result<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        let current = self.logical_end();
        if end > current {
            return Err(StorageError::InvalidRange {
                start: end as usize,
                len: 0,
                available: current as usize,
            });
        }
        if end == current {
            return Ok(());
        }

        let in_window = self.map.is_some() && end >= self.map_offset;
        if in_window {
            let start = (end - self.map_offset) as usize;
            if let Some(map) = self.map.as_mut() {
                map[start..self.position].fill(0);
            }
            self.position = start;
        } else {
            if let Some(old) = self.map.take() {
                self.retire(old);
            }
            self.map_offset = end;
            self.position = 0;
            self.file.set_len(end)?;
        }

        tracing::warn!(
            "Rewound append sink {:?} from {} to {}",
            self.path,
            current,
            end
        );
        Ok(())
    }

    fn retire(&mut self, map: MmapMut) {
        self.retired_since_sync = true;
        match (self.mode, &self.worker) {
            (UnmapMode::Async, Some(worker)) => worker.submit(map),
            _ => {
                drop(map);
                self.released.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Flushes the current mapping, and fsyncs the file if mappings were
    /// retired since the last sync.
    pub fn sync(&mut self) -> Result<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        if let Some(map) = &self.map {
            if self.position > 0 {
                map.flush_range(0, self.position)?;
            }
        }
        if self.retired_since_sync {
            self.file.sync_data()?;
            self.retired_since_sync = false;
        }
        Ok(())
    }

    /// Releases all mappings and truncates the file to the appended length.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let logical_end = self.logical_end();
        let unused = self
            .map
            .as_ref()
            .map_or(0, |map| map.len() - self.position);

        self.mode = UnmapMode::Sync;
        if let Some(map) = self.map.take() {
            if self.position > 0 {
                map.flush_range(0, self.position)?;
            }
            self.retire(map);
        }
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown()?;
        }

        self.file.set_len(logical_end)?;
        self.file.sync_all()?;

        tracing::info!(
            "Closed append sink {:?}: {} bytes, {} unused bytes trimmed",
            self.path,
            logical_end,
            unused
        );
        Ok(())
    }
}

impl DurableSink for GrowableAppendSink {
    fn append(&mut self, data: &ByteView) -> Result<()> {
        self.append_view(data)
    }

    fn sync(&mut self) -> Result<()> {
        GrowableAppendSink::sync(self)
    }

    fn end(&self) -> u64 {
        self.logical_end()
    }

    fn rewind(&mut self, end: u64) -> Result<()> {
        GrowableAppendSink::rewind(self, end)
    }

    fn close(&mut self) -> Result<()> {
        GrowableAppendSink::close(self)
    }
}

impl io::Write for GrowableAppendSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append_slice(buf).map_err(into_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        GrowableAppendSink::sync(self).map_err(into_io_error)
    }
}

fn into_io_error(error: StorageError) -> io::Error {
    match error {
        StorageError::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

impl Drop for GrowableAppendSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close append sink {:?}: {}", self.path, e);
        }
    }
}
