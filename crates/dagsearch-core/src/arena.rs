//! Bulk-preallocated object arena shared by all worker threads.
//!
//! Mirrors `rshogi-core`'s `ClusterTable` (`tt/table.rs`): one flat
//! allocation, raw-pointer access behind an unsafe `Sync` impl, and a single
//! atomic cursor carving it into ranges. Here the ranges are handed out to
//! per-thread `ArenaLocal` cursors instead of being indexed by hash, so a
//! thread can bump-allocate locally for thousands of objects between trips
//! to the shared atomic.
//!
//! A cleared arena is never re-initialized slot by slot — `clear_global`
//! just rewinds the cursor to zero, the same way `TranspositionTable::clear`
//! zeroes clusters in bulk rather than dropping entries one at a time.

use std::cell::{RefCell, UnsafeCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::{ARENA_BATCH_MIN, ARENA_BATCH_RANDOM};
use crate::error::{EngineError, Result};

/// A stable index into an `ArenaPool<T>`. Carries no lifetime and is cheap to
/// use as a hash-map key; `PhantomData<T>` just keeps indices from different
/// arenas from being mixed up at the type level.
pub struct ArenaIndex<T> {
    idx: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArenaIndex<T> {
    pub(crate) fn new(idx: usize) -> Self {
        Self {
            idx: idx as u32,
            _marker: PhantomData,
        }
    }

    pub fn raw(self) -> u32 {
        self.idx
    }
}

impl<T> Clone for ArenaIndex<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ArenaIndex<T> {}
impl<T> PartialEq for ArenaIndex<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}
impl<T> Eq for ArenaIndex<T> {}
impl<T> Hash for ArenaIndex<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.idx.hash(state);
    }
}
impl<T> fmt::Debug for ArenaIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({})", self.idx)
    }
}

/// Per-thread view into an `ArenaPool`: a `[cursor, end)` range claimed from
/// the shared atomic cursor in one batch. One of these lives per (thread,
/// arena) pair for the lifetime of a `BeamWorker`.
#[derive(Default)]
pub struct ArenaLocal {
    cursor: usize,
    end: usize,
}

impl ArenaLocal {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct ArenaPool<T> {
    storage: Box<[UnsafeCell<MaybeUninit<T>>]>,
    capacity: usize,
    cursor: AtomicUsize,
}

// SAFETY: access is mediated entirely through `allocate` (which hands out
// each index to exactly one thread before it is ever read) and `get` (which
// only ever reads slots that `allocate` has already initialized). No two
// threads ever reach the same slot through `allocate`, since the slot range
// comes from a `fetch_add` on `cursor`.
unsafe impl<T: Send> Sync for ArenaPool<T> {}

impl<T> ArenaPool<T> {
    pub fn new(capacity: usize) -> Self {
        let storage = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            storage,
            capacity,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rewinds the shared cursor. Does not drop previously written values;
    /// they are simply overwritten on reuse. Safe because every `T` stored
    /// here (`SearchNode`, `Notify`, map nodes) owns no heap allocation.
    pub fn clear_global(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }

    fn reserve(&self, local: &mut ArenaLocal, rng: &RefCell<Xoshiro256PlusPlus>) -> Result<()> {
        if local.cursor < local.end {
            return Ok(());
        }
        let batch = ARENA_BATCH_MIN + rng.borrow_mut().random_range(0..ARENA_BATCH_RANDOM);
        let start = self.cursor.fetch_add(batch, Ordering::Relaxed);
        if start >= self.capacity {
            return Err(EngineError::ResourceExhaustion {
                pool_size: self.capacity,
            });
        }
        local.cursor = start;
        local.end = (start + batch).min(self.capacity);
        Ok(())
    }

    pub fn allocate(
        &self,
        local: &mut ArenaLocal,
        rng: &RefCell<Xoshiro256PlusPlus>,
        value: T,
    ) -> Result<ArenaIndex<T>> {
        self.reserve(local, rng)?;
        let idx = local.cursor;
        local.cursor += 1;
        // SAFETY: `idx` came from this thread's exclusive `[cursor, end)`
        // range, never handed to any other thread. The slot is written
        // exactly once here, before `ArenaIndex` escapes to a shared map.
        unsafe {
            (*self.storage[idx].get()).write(value);
        }
        Ok(ArenaIndex::new(idx))
    }

    pub fn get(&self, idx: ArenaIndex<T>) -> &T {
        // SAFETY: every live `ArenaIndex<T>` was produced by `allocate`,
        // which initializes the slot before returning the index, and the
        // arena is only ever rewound wholesale (`clear_global`), never freed
        // slot by slot.
        unsafe { (*self.storage[idx.idx as usize].get()).assume_init_ref() }
    }
}
