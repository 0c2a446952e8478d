use crate::error::{Result, StorageError};
use crossbeam_channel::{Receiver, Sender};
use memmap2::MmapMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Dedicated thread that releases retired mappings off the write path.
///
/// Dropping an `MmapMut` unmaps it, so the worker only has to receive and
/// drop. Shutdown closes the channel and joins, which drains every pending
/// mapping first.
pub struct UnmapWorker {
    sender: Option<Sender<MmapMut>>,
    handle: Option<JoinHandle<()>>,
    released: Arc<AtomicU64>,
}

impl UnmapWorker {
    /// Starts the worker thread. `released` counts every mapping it drops.
    pub fn spawn(name: &str, released: Arc<AtomicU64>) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let counter = Arc::clone(&released);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(receiver, counter))?;

        tracing::debug!("Started unmap worker {}", name);

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            released,
        })
    }

    /// Hands a mapping to the worker. After shutdown it is released inline.
    pub fn submit(&self, map: MmapMut) {
        let map = match &self.sender {
            Some(sender) => match sender.send(map) {
                Ok(()) => return,
                Err(error) => error.into_inner(),
            },
            None => map,
        };
        drop(map);
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Stops accepting work and waits for every queued mapping to be released.
    pub fn shutdown(&mut self) -> Result<()> {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| StorageError::BackgroundTask("unmap worker panicked".to_string()))?;
        }
        Ok(())
    }
}

fn run(receiver: Receiver<MmapMut>, released: Arc<AtomicU64>) {
    for map in receiver {
        let len = map.len();
        drop(map);
        released.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Released mapping of {} bytes", len);
    }
}

impl Drop for UnmapWorker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Failed to stop unmap worker: {}", e);
        }
    }
}
