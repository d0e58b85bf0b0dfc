//! Shared retention of completed asynchronous archives.
//!
//! Jobs running in asynchronous mode materialize their ZIP into a
//! temporary file; once finalized, the file is handed to the
//! [`MediaArchive`] under a generated identifier so the host can serve it
//! later. The archive owns the files: removing an entry (or evicting the
//! oldest one past the capacity) deletes the file from disk.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tempfile::TempPath;
use uuid::Uuid;

struct Inner {
    items: HashMap<String, TempPath>,
    order: VecDeque<String>,
    max_items: usize,
}

/// Thread-safe store of finished archive files.
pub struct MediaArchive {
    inner: Mutex<Inner>,
}

impl MediaArchive {
    /// Creates an archive retaining at most `max_items` files; beyond
    /// that, the oldest entry is evicted and its file deleted. A capacity
    /// of zero disables eviction.
    pub fn new(max_items: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                order: VecDeque::new(),
                max_items,
            }),
        }
    }

    /// Takes ownership of a finished archive file and returns its
    /// reservation identifier.
    pub fn add(&self, file: TempPath) -> String {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.lock();

        if inner.max_items > 0 {
            while inner.items.len() >= inner.max_items {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.items.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        inner.items.insert(id.clone(), file);
        inner.order.push_back(id.clone());
        id
    }

    /// Reads the archive bytes behind a reservation, or `None` if the
    /// reservation is unknown or its file unreadable.
    pub fn read(&self, id: &str) -> Option<Vec<u8>> {
        let inner = self.lock();
        let path = inner.items.get(id)?;
        std::fs::read(path).ok()
    }

    /// Drops a reservation, deleting its file.
    pub fn remove(&self, id: &str) {
        let mut inner = self.lock();
        inner.items.remove(id);
        inner.order.retain(|retained| retained != id);
    }

    /// Number of retained archives.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns `true` if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MediaArchive {
    /// Creates an archive without an eviction bound.
    fn default() -> Self {
        Self::new(0)
    }
}
