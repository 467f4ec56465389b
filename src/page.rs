//! Page allocator: a fixed-size buffer pool keyed by "order id".
//!
//! Bounds per-request memory to roughly `max_inflight * max_packet` bytes
//! without per-packet allocator churn. An order id groups every page one
//! request (client) or worker slot (server) is holding, so releasing the
//! whole group back to the pool is one call instead of tracking each
//! page's lifetime individually — see the design note against
//! garbage-collecting pages one at a time.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::Mutex;

/// Default page size: 32 KiB of payload plus a little header room.
pub const DEFAULT_PAGE_SIZE: usize = 32 * 1024 + 256;

/// A pooled buffer. Shared (not copied) between the allocator's
/// bookkeeping and whatever caller currently holds it, so releasing an
/// order hands the exact same allocation back to the free list rather
/// than a fresh or duplicated one.
pub type Page = Arc<Mutex<BytesMut>>;

struct Inner {
    page_size: usize,
    available: Vec<Page>,
    used: HashMap<u64, Vec<Page>>,
}

impl Inner {
    fn take_or_alloc(&mut self) -> Page {
        self.available
            .pop()
            .unwrap_or_else(|| Arc::new(Mutex::new(BytesMut::zeroed(self.page_size))))
    }
}

/// A pool of fixed-size pages, grouped by a caller-assigned order id.
///
/// `Get` hands out one page at a time; `Release` returns every page a
/// given order holds to the free list in one step; `Free` drops
/// everything. A page is always tracked in exactly one of `used[order]`
/// or `available` — the caller's own handle is an `Arc` clone of that
/// same tracked page, not a separate copy.
#[derive(Clone)]
pub struct PageAllocator {
    inner: Arc<Mutex<Inner>>,
}

impl PageAllocator {
    /// Build an allocator whose pages are each `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                page_size,
                available: Vec::new(),
                used: HashMap::new(),
            })),
        }
    }

    /// Take a free page (allocating a fresh one if none are idle),
    /// recording it under `order`. The returned handle is an `Arc` clone
    /// of the same page kept in the bookkeeping map, so the free list is
    /// actually drawn down instead of every call forcing a fresh
    /// allocation.
    pub async fn get(&self, order: u64) -> Page {
        let mut inner = self.inner.lock().await;
        let page = inner.take_or_alloc();
        inner.used.entry(order).or_default().push(page.clone());
        page
    }

    /// Return every page `order` holds to the free list. `order` is
    /// absent from the used-set afterward.
    pub async fn release(&self, order: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(pages) = inner.used.remove(&order) {
            inner.available.extend(pages);
        }
    }

    /// Drop every page, used or idle. Used for shutdown.
    pub async fn free(&self) {
        let mut inner = self.inner.lock().await;
        inner.available.clear();
        inner.used.clear();
    }

    /// Total pages currently tracked (used + available), for diagnostics and tests.
    pub async fn total_allocated(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.available.len() + inner.used.values().map(Vec::len).sum::<usize>()
    }

    /// True if `order` currently holds any pages.
    pub async fn has_order(&self, order: u64) -> bool {
        let inner = self.inner.lock().await;
        inner.used.contains_key(&order)
    }
}
