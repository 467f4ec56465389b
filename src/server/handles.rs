//! Server-side handle table (`spec.md` §4.7).
//!
//! Maps the opaque handle strings issued by `OPEN`/`OPENDIR` back to
//! whatever state a [`crate::server::handler::Handler`] attached to them.
//! Access is a reader-writer lock since lookups (`READ`/`WRITE`/`FSTAT`)
//! vastly outnumber allocations and releases.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::protocol::StatusCode;

/// Handle table keyed by the decimal-string handle issued to clients.
pub struct HandleTable<T> {
    next_id: AtomicU64,
    entries: RwLock<HashMap<Vec<u8>, Arc<T>>>,
    max_handles: usize,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::with_max(0)
    }
}

impl<T> HandleTable<T> {
    /// An empty, unbounded table.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty table that refuses to grow past `max_handles`
    /// simultaneously open entries. `0` means unbounded.
    pub fn with_max(max_handles: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
            max_handles,
        }
    }

    /// Allocate a fresh handle for `state`, returning the wire bytes to
    /// send back in a `HANDLE` response.
    ///
    /// # Errors
    ///
    /// Returns a [`StatusCode::Failure`] status if the table is already
    /// at its configured `max_handles`.
    pub async fn allocate(&self, state: T) -> Result<Vec<u8>> {
        let mut entries = self.entries.write().await;
        if self.max_handles != 0 && entries.len() >= self.max_handles {
            return Err(Error::status(
                StatusCode::Failure,
                "too many open handles",
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = id.to_string().into_bytes();
        entries.insert(handle.clone(), Arc::new(state));
        Ok(handle)
    }

    /// Look up a handle's state without removing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if `handle` is not open.
    pub async fn lookup(&self, handle: &[u8]) -> Result<Arc<T>> {
        self.entries
            .read()
            .await
            .get(handle)
            .cloned()
            .ok_or(Error::InvalidHandle)
    }

    /// Remove and return a handle's state, the `CLOSE` counterpart to
    /// [`HandleTable::allocate`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if `handle` is not open.
    pub async fn release(&self, handle: &[u8]) -> Result<Arc<T>> {
        self.entries
            .write()
            .await
            .remove(handle)
            .ok_or(Error::InvalidHandle)
    }

    /// Drain every open handle, for session shutdown. The caller is
    /// responsible for releasing whatever native resources each state
    /// holds (files, directory iterators).
    pub async fn drain(&self) -> Vec<Arc<T>> {
        self.entries.write().await.drain().map(|(_, v)| v).collect()
    }

    /// Number of currently open handles.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True if no handles are open.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
