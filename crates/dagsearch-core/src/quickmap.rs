//! Fixed-capacity inline associative array embedded directly in a
//! `SearchNode`, avoiding a hash-map lookup for the common case of a node
//! with only a handful of outgoing steps.
//!
//! Single-writer/multi-reader by construction: only the thread that created
//! (or currently holds the expand-cache for) a node ever calls
//! `get_or_create` on its quick-map. Multiple threads may still read
//! resident slots concurrently once `len` has been published, which is why
//! `len` uses `Acquire`/`Release` rather than `Relaxed`.
//!
//! Once full, every resident entry is forwarded into the caller-provided
//! fallback (the per-batch step-score hash map) and `len` is latched one
//! past capacity, so all subsequent calls skip the inline array entirely.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::Result;
use crate::score::LogScore;

const EMPTY_KEY: u32 = u32::MAX;

pub struct QuickMap<const N: usize> {
    len: AtomicU32,
    keys: [AtomicU32; N],
    values: [LogScore; N],
}

impl<const N: usize> QuickMap<N> {
    pub fn new() -> Self {
        Self {
            len: AtomicU32::new(0),
            keys: std::array::from_fn(|_| AtomicU32::new(EMPTY_KEY)),
            values: std::array::from_fn(|_| LogScore::neg_infinity()),
        }
    }

    /// Returns the slot for `key`, creating it (inline if there's room,
    /// otherwise by spilling into `fallback`) if absent. `fallback` is
    /// called once per resident entry during a spill, plus once more for
    /// `key` itself if the map was already full.
    /// Reads the inline slot for `key`, if resident. Returns `None` once the
    /// map has spilled past `key`'s slot (or never held it), without
    /// touching the fallback — callers fall back to the shared map
    /// themselves.
    pub fn peek(&self, key: u32) -> Option<f32> {
        let len = self.len.load(Ordering::Acquire) as usize;
        if len > N {
            // Already spilled: every resident entry was forwarded to the
            // fallback map, so this inline array no longer holds the
            // authoritative value for any key.
            return None;
        }
        for i in 0..len {
            if self.keys[i].load(Ordering::Relaxed) == key {
                return Some(self.values[i].load());
            }
        }
        None
    }

    pub fn get_or_create<'a>(
        &'a self,
        key: u32,
        init: f32,
        mut fallback: impl FnMut(u32, f32) -> Result<(&'a LogScore, bool)>,
    ) -> Result<(&'a LogScore, bool)> {
        let len = self.len.load(Ordering::Acquire) as usize;
        if len <= N {
            for i in 0..len {
                if self.keys[i].load(Ordering::Relaxed) == key {
                    return Ok((&self.values[i], false));
                }
            }
            if len < N {
                self.keys[len].store(key, Ordering::Relaxed);
                self.values[len].store(init);
                self.len.store((len + 1) as u32, Ordering::Release);
                return Ok((&self.values[len], true));
            }
            // Exactly full: spill every resident entry, then latch past N
            // so future calls go straight to the fallback.
            for i in 0..N {
                let k = self.keys[i].load(Ordering::Relaxed);
                let v = self.values[i].load();
                fallback(k, v)?;
            }
            self.len.store((N + 1) as u32, Ordering::Release);
        }
        fallback(key, init)
    }
}

impl<const N: usize> Default for QuickMap<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn fallback_harness<'a>(
        store: &'a RefCell<Vec<(u32, LogScore)>>,
    ) -> impl FnMut(u32, f32) -> Result<(&'a LogScore, bool)> + 'a {
        move |key, init| {
            let mut store = store.borrow_mut();
            if let Some(pos) = store.iter().position(|(k, _)| *k == key) {
                // SAFETY: entries are never removed, so the reference stays
                // valid as long as `store`'s `RefCell` does.
                let ptr: *const LogScore = &store[pos].1;
                return Ok((unsafe { &*ptr }, false));
            }
            store.push((key, LogScore::new(init)));
            let ptr: *const LogScore = &store.last().unwrap().1;
            Ok((unsafe { &*ptr }, true))
        }
    }

    #[test]
    fn resident_entries_stay_inline_until_full() {
        let map: QuickMap<3> = QuickMap::new();
        let store = RefCell::new(Vec::new());
        for k in 0..3 {
            let (slot, created) = map.get_or_create(k, k as f32, fallback_harness(&store)).unwrap();
            assert!(created);
            assert_eq!(slot.load(), k as f32);
        }
        assert!(store.borrow().is_empty());

        let (slot, created) = map.get_or_create(1, 99.0, fallback_harness(&store)).unwrap();
        assert!(!created);
        assert_eq!(slot.load(), 1.0);
    }

    #[test]
    fn spills_all_resident_entries_when_full() {
        let map: QuickMap<2> = QuickMap::new();
        let store = RefCell::new(Vec::new());
        map.get_or_create(10, 1.0, fallback_harness(&store)).unwrap();
        map.get_or_create(20, 2.0, fallback_harness(&store)).unwrap();
        assert!(store.borrow().is_empty());

        // Third insert overflows capacity: both resident entries forward
        // into the fallback, plus the new key.
        let (slot, created) = map.get_or_create(30, 3.0, fallback_harness(&store)).unwrap();
        assert!(created);
        assert_eq!(slot.load(), 3.0);
        let keys: Vec<u32> = store.borrow().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![10, 20, 30]);

        // Subsequent calls go straight to the fallback.
        let (slot, created) = map.get_or_create(10, 0.0, fallback_harness(&store)).unwrap();
        assert!(!created);
        assert_eq!(slot.load(), 1.0);
    }

    #[test]
    fn peek_returns_none_for_a_key_that_has_spilled() {
        let map: QuickMap<2> = QuickMap::new();
        let store = RefCell::new(Vec::new());
        map.get_or_create(10, 1.0, fallback_harness(&store)).unwrap();
        assert_eq!(map.peek(10), Some(1.0));

        map.get_or_create(20, 2.0, fallback_harness(&store)).unwrap();
        map.get_or_create(30, 3.0, fallback_harness(&store)).unwrap(); // spills

        // The inline array is no longer authoritative for any key, even
        // ones that were resident before the spill.
        assert_eq!(map.peek(10), None);
        assert_eq!(map.peek(20), None);
        assert_eq!(map.peek(30), None);

        // The fallback still has the up-to-date value.
        assert_eq!(store.borrow().iter().find(|(k, _)| *k == 10).unwrap().1.load(), 1.0);
    }
}
