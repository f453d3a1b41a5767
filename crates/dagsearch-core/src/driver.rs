//! Parallel beam-expansion driver: per-thread state, chunk-manifest
//! flattening of (batch, beam slot) pairs into one parallel iteration space,
//! and the static work split across worker threads.
//!
//! The parallel region itself is built on `std::thread::scope`, the same
//! primitive `rshogi-core`'s `TranspositionTable::clear` uses to zero
//! clusters across threads — standing in for the reference implementation's
//! `#pragma omp parallel for schedule(static) nowait`, including the flush
//! happening inside the same parallel region rather than after a join.

use std::cell::RefCell;
use std::ops::Range;

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::arena::ArenaLocal;
use crate::cache::{ExpandBeamCache, NotifyCache};
use crate::tensor::TensorView;

/// Per-thread scratch state for a search. `Engine` keeps one of these alive
/// per worker thread for the engine's lifetime, reset only when `init_beam`
/// starts a new search — so a thread's arena batch reservations carry over
/// across the `expand_beam` calls of one search instead of re-reserving a
/// fresh batch (and burning pool capacity) on every call.
///
/// `rng` is the single randomness source shared by all five of this
/// worker's arena-local cursors (for their randomized refill batch sizes).
/// It's wrapped in a `RefCell` because a single expand step may need it
/// twice in the same expression — once for the children-map's own node
/// allocation, once inside the value-construction closure that allocates
/// the new `SearchNode` itself — and those two uses are sequential, never
/// reentrant, so the runtime borrow check never contends.
pub struct BeamWorker {
    pub thread_id: usize,
    pub rng: RefCell<Xoshiro256PlusPlus>,
    pub node_local: ArenaLocal,
    pub notify_local: ArenaLocal,
    pub step_map_local: ArenaLocal,
    pub children_map_local: ArenaLocal,
    pub notify_map_local: ArenaLocal,
    pub expand_cache: ExpandBeamCache,
    pub notify_cache: NotifyCache,
}

impl BeamWorker {
    pub fn new(thread_id: usize) -> Self {
        log::trace!("beam worker {thread_id} (re)initialized for a new search");
        Self {
            thread_id,
            // Each worker gets an independently seeded stream; reseeding
            // per call (rather than keeping one RNG alive across the
            // engine's lifetime) keeps worker construction free of shared
            // mutable state.
            rng: RefCell::new(Xoshiro256PlusPlus::seed_from_u64(
                0x9E37_79B9_7F4A_7C15 ^ thread_id as u64,
            )),
            node_local: ArenaLocal::new(),
            notify_local: ArenaLocal::new(),
            step_map_local: ArenaLocal::new(),
            children_map_local: ArenaLocal::new(),
            notify_map_local: ArenaLocal::new(),
            expand_cache: ExpandBeamCache::new(),
            notify_cache: NotifyCache::new(),
        }
    }
}

/// Splits `[0, total)` into at most `thread_num` contiguous, near-equal
/// ranges (`schedule(static)`), skipping empty trailing ranges when
/// `total` doesn't divide evenly.
pub fn split_static(total: usize, thread_num: usize) -> Vec<Range<usize>> {
    let thread_num = thread_num.max(1);
    let chunk = total.div_ceil(thread_num);
    if chunk == 0 {
        return Vec::new();
    }
    (0..thread_num)
        .filter_map(|t| {
            let start = t * chunk;
            if start >= total {
                return None;
            }
            Some(start..(start + chunk).min(total))
        })
        .collect()
}

/// Flattens (batch, beam-slot) pairs that are still eligible for expansion
/// at `step` into one contiguous index space, via an exclusive prefix sum
/// over each batch's beam length — mirroring `ChunkManager::prepare_chunk`.
pub struct ChunkManifest {
    prefix: Vec<usize>,
    total: usize,
}

impl ChunkManifest {
    pub fn build(
        batch_size: usize,
        step: u32,
        output_length: &TensorView<i32>,
        beam_len: impl Fn(usize) -> usize,
    ) -> Self {
        let mut prefix = Vec::with_capacity(batch_size);
        let mut sum = 0usize;
        for b in 0..batch_size {
            prefix.push(sum);
            if (step as i64) < output_length.at1(b) as i64 - 1 {
                sum += beam_len(b);
            }
        }
        Self { prefix, total: sum }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Maps a flat index back to `(batch, beam_slot)`.
    pub fn locate(&self, i: usize) -> (usize, usize) {
        let b = self.prefix.partition_point(|&x| x <= i) - 1;
        (b, i - self.prefix[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_static_covers_every_index_exactly_once() {
        for total in [0, 1, 7, 16, 100] {
            for threads in [1, 2, 3, 8] {
                let ranges = split_static(total, threads);
                let mut covered: Vec<usize> = ranges.iter().flat_map(|r| r.clone()).collect();
                covered.sort_unstable();
                let expected: Vec<usize> = (0..total).collect();
                assert_eq!(covered, expected, "total={total} threads={threads}");
            }
        }
    }

    #[test]
    fn chunk_manifest_skips_batches_already_at_max_length() {
        let lengths = [5i32, 1]; // batch 1 has already produced its only position
        let view = TensorView::from_row_major_1d(&lengths);
        let manifest = ChunkManifest::build(2, 0, &view, |_| 3);
        assert_eq!(manifest.total(), 3);
        assert_eq!(manifest.locate(0), (0, 0));
        assert_eq!(manifest.locate(2), (0, 2));
    }

    #[test]
    fn chunk_manifest_flattens_variable_beam_lengths() {
        let lengths = [10i32, 10, 10];
        let view = TensorView::from_row_major_1d(&lengths);
        let beam_len = |b: usize| [2, 0, 3][b];
        let manifest = ChunkManifest::build(3, 0, &view, beam_len);
        assert_eq!(manifest.total(), 5);
        assert_eq!(manifest.locate(0), (0, 0));
        assert_eq!(manifest.locate(1), (0, 1));
        assert_eq!(manifest.locate(2), (2, 0));
        assert_eq!(manifest.locate(4), (2, 2));
    }
}
