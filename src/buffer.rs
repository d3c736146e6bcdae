//! FIFO hand-off buffers between modules.
//!
//! A [`Buffer`] is either bounded (full buffers refuse pushes, which is how a
//! slow consumer throttles its producer) or unbounded (memory may grow; chosen
//! explicitly per edge, never by default).
//!
//! ## Tick staging
//!
//! Items pushed during a controller invocation are *staged*: they count toward
//! `len()` and capacity but are not poppable until [`Buffer::commit`] runs at
//! the end of the invocation. Staged items always sit behind the visible ones,
//! so FIFO order is unaffected.
//!
//! ```text
//!   front                                   back
//!   [ visible (poppable) | staged (this tick) ]
//! ```

use crate::error::Overflow;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Arrival stamps are global so fan-in modules can merge several buffers by
/// push order.
static ARRIVAL_CLOCK: AtomicU64 = AtomicU64::new(0);

/// Buffer identities, used by sequence validation to match producers with consumers.
static BUFFER_IDS: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Capacity
// ============================================================================

/// Capacity choice for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// At most this many items (visible + staged).
    Bounded(usize),
    /// No limit. Memory grows if the consumer falls behind.
    Unbounded,
}

impl Capacity {
    pub fn limit(self) -> Option<usize> {
        match self {
            Capacity::Bounded(n) => Some(n),
            Capacity::Unbounded => None,
        }
    }
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capacity::Bounded(n) => write!(f, "{n}"),
            Capacity::Unbounded => write!(f, "unbounded"),
        }
    }
}

// ============================================================================
// Buffer
// ============================================================================

/// Ordered staging area between one producer and one consumer.
#[derive(Debug)]
pub struct Buffer<T> {
    items: VecDeque<(u64, T)>,
    capacity: Capacity,
    /// Number of items at the back of `items` pushed since the last commit.
    staged: usize,
    high_water: usize,
}

impl<T> Buffer<T> {
    pub fn new(capacity: Capacity) -> Self {
        let items = match capacity {
            Capacity::Bounded(n) => VecDeque::with_capacity(n),
            Capacity::Unbounded => VecDeque::new(),
        };
        Self {
            items,
            capacity,
            staged: 0,
            high_water: 0,
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::new(Capacity::Bounded(capacity))
    }

    pub fn unbounded() -> Self {
        Self::new(Capacity::Unbounded)
    }

    /// Stage an item at the back. It becomes poppable after the next [`commit`](Self::commit).
    ///
    /// Fails with [`Overflow`] when the buffer is bounded and full; the item
    /// is returned inside the error.
    pub fn push(&mut self, item: T) -> Result<(), Overflow<T>> {
        if let Capacity::Bounded(limit) = self.capacity {
            if self.items.len() >= limit {
                return Err(Overflow {
                    item,
                    capacity: limit,
                });
            }
        }
        let stamp = ARRIVAL_CLOCK.fetch_add(1, Ordering::Relaxed);
        self.items.push_back((stamp, item));
        self.staged += 1;
        self.high_water = self.high_water.max(self.items.len());
        Ok(())
    }

    /// Remove up to `n` visible items from the front, lazily, in FIFO order.
    ///
    /// Items not pulled from the iterator are still removed when it drops.
    pub fn pop_up_to(&mut self, n: usize) -> impl Iterator<Item = T> + '_ {
        let take = n.min(self.available());
        self.items.drain(..take).map(|(_, item)| item)
    }

    /// Pop a single visible item.
    pub fn pop(&mut self) -> Option<T> {
        if self.available() == 0 {
            return None;
        }
        self.items.pop_front().map(|(_, item)| item)
    }

    /// Arrival stamp of the next visible item.
    pub fn front_stamp(&self) -> Option<u64> {
        if self.available() == 0 {
            return None;
        }
        self.items.front().map(|(stamp, _)| *stamp)
    }

    /// Make everything staged so far visible to the consumer.
    pub fn commit(&mut self) {
        self.staged = 0;
    }

    /// Put items back at the front, ahead of everything else, as visible.
    ///
    /// Used when a module is unspliced from a sequence and its in-flight items
    /// must stay ahead of the items still queued for it. Callers check
    /// `remaining()` first; this does not.
    pub fn requeue_front(&mut self, items: impl IntoIterator<Item = T>) {
        let mut restored: Vec<(u64, T)> = items
            .into_iter()
            .map(|item| (ARRIVAL_CLOCK.fetch_add(1, Ordering::Relaxed), item))
            .collect();
        while let Some(entry) = restored.pop() {
            self.items.push_front(entry);
        }
        self.high_water = self.high_water.max(self.items.len());
    }

    /// Total items held, visible and staged.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items the consumer may pop right now.
    pub fn available(&self) -> usize {
        self.items.len() - self.staged
    }

    pub fn staged(&self) -> usize {
        self.staged
    }

    /// Maximum number of items; `usize::MAX` when unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity.limit().unwrap_or(usize::MAX)
    }

    pub fn capacity_choice(&self) -> Capacity {
        self.capacity
    }

    /// Free slots before a push would overflow.
    pub fn remaining(&self) -> usize {
        self.capacity().saturating_sub(self.items.len())
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Largest `len()` ever observed.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Drain everything, visible and staged, in FIFO order.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.staged = 0;
        self.items.drain(..).map(|(_, item)| item).collect()
    }
}

// ============================================================================
// Link (shared buffer handle)
// ============================================================================

/// Shared handle to a buffer connecting a producer module to a consumer module.
///
/// Buffer operations are the only synchronization between modules; the lock
/// is held for single operations only and never across two links.
pub struct Link<T> {
    id: u64,
    inner: Arc<Mutex<Buffer<T>>>,
}

impl<T> Link<T> {
    pub fn new(capacity: Capacity) -> Self {
        Self {
            id: BUFFER_IDS.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(Mutex::new(Buffer::new(capacity))),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Lock the buffer. A poisoned lock is recovered: buffer state is always
    /// consistent between individual operations.
    pub fn lock(&self) -> MutexGuard<'_, Buffer<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn available(&self) -> usize {
        self.lock().available()
    }

    pub fn remaining(&self) -> usize {
        self.lock().remaining()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn commit(&self) {
        self.lock().commit();
    }

    pub fn snapshot(&self) -> BufferStats {
        let buf = self.lock();
        BufferStats {
            len: buf.len(),
            available: buf.available(),
            capacity: buf.capacity_choice(),
            high_water: buf.high_water(),
        }
    }
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Point-in-time view of a buffer, for reports and dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub len: usize,
    pub available: usize,
    pub capacity: Capacity,
    pub high_water: usize,
}
