//! Bounded read-ahead of instance payloads.
//!
//! The pipeline overlaps the latency-dominated blob-store reads with the
//! CPU-dominated compression happening on the driver thread. It never
//! parallelizes writes: payloads may be fetched out of order, but slots
//! are drained strictly in launch order, so the writer observes commands
//! exactly as they appear in the command stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::storage::{BlobFetchError, BlobStore};
use crate::{Error, Result};

/// Default number of read-ahead slots.
pub(crate) const DEFAULT_PREFETCH_SLOTS: usize = 3;

/// A payload fetched for one command: `None` when the instance vanished.
type FetchedPayload = Option<Vec<u8>>;

struct PrefetchSlot {
    command_index: usize,
    handle: JoinHandle<Result<FetchedPayload>>,
}

/// Fixed pool of read-ahead workers, drained in launch order.
pub(crate) struct PrefetchPipeline {
    blobs: Arc<dyn BlobStore>,
    cancel: Arc<AtomicBool>,
    capacity: usize,
    in_flight: VecDeque<PrefetchSlot>,
}

impl PrefetchPipeline {
    pub(crate) fn new(blobs: Arc<dyn BlobStore>, capacity: usize) -> Self {
        Self {
            blobs,
            cancel: Arc::new(AtomicBool::new(false)),
            capacity: capacity.max(1),
            in_flight: VecDeque::new(),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.in_flight.len() >= self.capacity
    }

    /// Starts reading the payload of `instance_id` for the command at
    /// `command_index`.
    pub(crate) fn launch(&mut self, command_index: usize, instance_id: &str) -> Result<()> {
        if self.is_full() {
            return Err(Error::Internal("prefetch pool is full"));
        }

        let blobs = Arc::clone(&self.blobs);
        let cancel = Arc::clone(&self.cancel);
        let instance_id = instance_id.to_string();
        let handle = thread::spawn(move || read_payload(blobs.as_ref(), &cancel, &instance_id));

        self.in_flight.push_back(PrefetchSlot {
            command_index,
            handle,
        });
        Ok(())
    }

    /// Joins the oldest in-flight slot, blocking until its read completes.
    ///
    /// Returns the command index the slot was launched for and the payload
    /// (`None` when the instance vanished), or `Ok(None)` when the pool is
    /// idle.
    pub(crate) fn drain_front(&mut self) -> Result<Option<(usize, FetchedPayload)>> {
        let slot = match self.in_flight.pop_front() {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let payload = slot
            .handle
            .join()
            .map_err(|_| Error::Internal("prefetch worker panicked"))??;
        Ok(Some((slot.command_index, payload)))
    }

    /// Signals cancellation and joins every in-flight worker, discarding
    /// their payloads.
    pub(crate) fn abort(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        while let Some(slot) = self.in_flight.pop_front() {
            let _ = slot.handle.join();
        }
    }
}

impl Drop for PrefetchPipeline {
    fn drop(&mut self) {
        self.abort();
    }
}

fn read_payload(
    blobs: &dyn BlobStore,
    cancel: &AtomicBool,
    instance_id: &str,
) -> Result<FetchedPayload> {
    if cancel.load(Ordering::SeqCst) {
        return Ok(None);
    }

    match blobs.read_dicom(instance_id) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(BlobFetchError::NotFound) => {
            warn!(
                instance = instance_id,
                "an instance was removed after the job was issued"
            );
            Ok(None)
        }
        Err(BlobFetchError::Transient(reason)) => Err(Error::Storage(reason)),
    }
}
