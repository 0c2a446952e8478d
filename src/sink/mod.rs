mod mmap;
mod unmap;

pub use mmap::{GrowableAppendSink, SinkOptions, UnmapMode};
pub use unmap::UnmapWorker;

use crate::error::Result;
use crate::view::ByteView;

/// Sequential append-only durable byte sink.
pub trait DurableSink: Send {
    /// Appends every byte of `data` after the previously appended bytes.
    fn append(&mut self, data: &ByteView) -> Result<()>;

    /// Forces appended bytes to durable storage.
    fn sync(&mut self) -> Result<()>;

    /// Offset one past the last appended byte.
    fn end(&self) -> u64;

    /// Discards every byte appended after offset `end`.
    fn rewind(&mut self, end: u64) -> Result<()>;

    /// Flushes and releases the sink. Appends after close fail.
    fn close(&mut self) -> Result<()>;
}

impl<S: DurableSink + ?Sized> DurableSink for Box<S> {
    fn append(&mut self, data: &ByteView) -> Result<()> {
        (**self).append(data)
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }

    fn end(&self) -> u64 {
        (**self).end()
    }

    fn rewind(&mut self, end: u64) -> Result<()> {
        (**self).rewind(end)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
