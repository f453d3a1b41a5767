//! Open-chained concurrent hash map with atomic, versioned head pointers.
//!
//! Grounded on the same lock-free publish pattern as `rshogi-core`'s
//! `TranspositionTable`: entries are never removed one at a time, and a
//! generation counter (`current_version` here, `generation8` there) makes a
//! full-table clear an O(1) atomic bump instead of a per-bucket sweep. The
//! difference is that a TT entry is looked up by direct index, while this
//! map chains entries per bucket to handle arbitrary keys, with new nodes
//! published into the chain via a compare-exchange retry loop.
//!
//! Node storage itself lives in a caller-supplied `ArenaPool<MapNode<K,V>>`
//! (usually shared, via `Arc`, across every per-batch map of the same
//! specialization) rather than being owned by the map — the same
//! handle-not-owner relationship `rshogi-core`'s workers have with their
//! `Arc<TranspositionTable>`.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use rand_xoshiro::Xoshiro256PlusPlus;

use crate::arena::{ArenaIndex, ArenaLocal, ArenaPool};
use crate::error::Result;

const NULL_NEXT: u32 = u32::MAX;

pub struct MapNode<K, V> {
    key: K,
    value: V,
    next: AtomicU32,
}

#[derive(Clone, Copy)]
struct HeadPointer {
    pos: u32,
    version: u32,
}

impl HeadPointer {
    fn pack(self) -> u64 {
        (self.pos as u64) | ((self.version as u64) << 32)
    }
    fn unpack(bits: u64) -> Self {
        Self {
            pos: (bits & 0xFFFF_FFFF) as u32,
            version: (bits >> 32) as u32,
        }
    }
}

pub struct ConcurrentMap<K, V> {
    heads: Box<[AtomicU64]>,
    head_size: usize,
    current_version: AtomicU32,
    arena: Arc<ArenaPool<MapNode<K, V>>>,
}

impl<K: Copy + Eq + Hash, V> ConcurrentMap<K, V> {
    pub fn new(head_size: usize, arena: Arc<ArenaPool<MapNode<K, V>>>) -> Self {
        let head_size = head_size.max(1);
        let empty = HeadPointer { pos: 0, version: 0 }.pack();
        Self {
            heads: (0..head_size).map(|_| AtomicU64::new(empty)).collect(),
            head_size,
            // Starts ahead of every head's initial version (0) so an
            // unwritten bucket is correctly "empty" from the first search.
            current_version: AtomicU32::new(1),
            arena,
        }
    }

    /// Invalidates every bucket in O(1) by bumping the version counter.
    /// Physical node storage is reclaimed separately via the arena's own
    /// `clear_global`.
    pub fn clear(&self) {
        self.current_version.fetch_add(1, Ordering::Relaxed);
    }

    fn bucket(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.head_size
    }

    fn walk<'a>(&'a self, mut pos: Option<u32>, key: &K) -> Option<&'a V> {
        while let Some(p) = pos {
            let node = self.arena.get(ArenaIndex::new(p as usize));
            if node.key == *key {
                return Some(&node.value);
            }
            let next = node.next.load(Ordering::Relaxed);
            pos = if next == NULL_NEXT { None } else { Some(next) };
        }
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.bucket(key);
        let cur_version = self.current_version.load(Ordering::Acquire);
        let head = HeadPointer::unpack(self.heads[idx].load(Ordering::Acquire));
        if head.version != cur_version {
            return None;
        }
        self.walk(Some(head.pos), key)
    }

    /// Returns the existing slot for `key`, or creates it by allocating one
    /// `MapNode` from `arena` and CAS-publishing it at the bucket head.
    /// Re-walks the chain from the freshly observed head on every CAS
    /// failure, so a node inserted by another thread during our own retry
    /// is still found rather than shadowed.
    pub fn get_or_create<'a>(
        &'a self,
        key: K,
        local: &mut ArenaLocal,
        rng: &RefCell<Xoshiro256PlusPlus>,
        make_value: impl FnOnce() -> Result<V>,
    ) -> Result<(&'a V, bool)> {
        let idx = self.bucket(&key);
        let mut make_value = Some(make_value);
        let mut pending: Option<ArenaIndex<MapNode<K, V>>> = None;

        loop {
            let cur_version = self.current_version.load(Ordering::Acquire);
            let observed = self.heads[idx].load(Ordering::Acquire);
            let head = HeadPointer::unpack(observed);
            let head_valid = head.version == cur_version;

            if let Some(existing) = self.walk(head_valid.then_some(head.pos), &key) {
                return Ok((existing, false));
            }

            let next_val = if head_valid { head.pos } else { NULL_NEXT };
            let new_idx = match pending {
                Some(idx) => {
                    self.arena.get(idx).next.store(next_val, Ordering::Relaxed);
                    idx
                }
                None => {
                    let value = (make_value.take().expect("called at most once"))()?;
                    let node = MapNode {
                        key,
                        value,
                        next: AtomicU32::new(next_val),
                    };
                    let idx = self.arena.allocate(local, rng, node)?;
                    pending = Some(idx);
                    idx
                }
            };

            let new_head = HeadPointer {
                pos: new_idx.raw(),
                version: cur_version,
            }
            .pack();

            match self.heads[idx].compare_exchange_weak(
                observed,
                new_head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok((&self.arena.get(new_idx).value, true)),
                Err(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicUsize;

    fn new_map(head_size: usize, capacity: usize) -> ConcurrentMap<(u32, u32), u32> {
        ConcurrentMap::new(head_size, Arc::new(ArenaPool::new(capacity)))
    }

    fn rng() -> RefCell<Xoshiro256PlusPlus> {
        RefCell::new(Xoshiro256PlusPlus::seed_from_u64(7))
    }

    #[test]
    fn get_or_create_deduplicates_same_key() {
        let map = new_map(8, 1024);
        let mut local = ArenaLocal::new();
        let rng = rng();
        let (v1, created1) = map
            .get_or_create((1, 2), &mut local, &rng, || Ok(100))
            .unwrap();
        assert!(created1);
        assert_eq!(*v1, 100);

        let (v2, created2) = map
            .get_or_create((1, 2), &mut local, &rng, || Ok(999))
            .unwrap();
        assert!(!created2);
        assert_eq!(*v2, 100);
    }

    #[test]
    fn distinct_keys_in_same_bucket_chain_correctly() {
        let map = new_map(1, 1024); // force every key into bucket 0
        let mut local = ArenaLocal::new();
        let rng = rng();
        for i in 0..50u32 {
            let (v, created) = map
                .get_or_create((i, 0), &mut local, &rng, || Ok(i * 10))
                .unwrap();
            assert!(created);
            assert_eq!(*v, i * 10);
        }
        for i in 0..50u32 {
            assert_eq!(*map.get(&(i, 0)).unwrap(), i * 10);
        }
    }

    #[test]
    fn clear_hides_old_entries_without_reuse_collision() {
        let map = new_map(8, 1024);
        let mut local = ArenaLocal::new();
        let rng = rng();
        map.get_or_create((1, 1), &mut local, &rng, || Ok(1))
            .unwrap();
        assert!(map.get(&(1, 1)).is_some());
        map.clear();
        assert!(map.get(&(1, 1)).is_none());
    }

    #[test]
    fn concurrent_get_or_create_converges_on_one_winner() {
        let map = new_map(4, 4096);
        let calls = AtomicUsize::new(0);
        let winners: Vec<u32> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let map = &map;
                    let calls = &calls;
                    scope.spawn(move || {
                        let mut local = ArenaLocal::new();
                        let rng = RefCell::new(Xoshiro256PlusPlus::seed_from_u64(t));
                        let (v, _) = map
                            .get_or_create((0, 0), &mut local, &rng, || {
                                calls.fetch_add(1, Ordering::Relaxed);
                                Ok(t as u32)
                            })
                            .unwrap();
                        *v
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let first = winners[0];
        assert!(winners.iter().all(|w| *w == first));
    }
}
