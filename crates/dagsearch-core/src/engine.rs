//! Top-level engine: owns every shared arena and per-batch map, and wires
//! `init_beam`/`expand_beam` the way `rshogi-core` wires a `SearchWorker`
//! fleet around a shared `Arc<TranspositionTable>` — except here the whole
//! thing is an explicit value a caller owns, rather than a process-wide
//! singleton, since nothing about this search is inherently global state.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::arena::{ArenaLocal, ArenaPool};
use crate::concurrent_map::{ConcurrentMap, MapNode};
use crate::config::Config;
use crate::driver::{split_static, BeamWorker, ChunkManifest};
use crate::error::{EngineError, Result};
use crate::lm::{LanguageModel, LmState};
use crate::node::{AtomicNotifyHead, Notify, NodeId, NotifyId, SearchNode};
use crate::tensor::TensorView;

type ChildKey = (NodeId, u32); // (parent, word)
type StepKey = (NodeId, u32); // (node, step)
type NotifyKey = (u32, u32); // (step, length)

struct BatchMaps {
    children: ConcurrentMap<ChildKey, NodeId>,
    step_score: ConcurrentMap<StepKey, crate::score::LogScore>,
    notify: ConcurrentMap<NotifyKey, AtomicNotifyHead>,
}

pub struct Engine {
    config: Config,
    lm: Option<Box<dyn LanguageModel>>,

    node_arena: ArenaPool<SearchNode>,
    notify_arena: ArenaPool<Notify>,
    children_arena: Arc<ArenaPool<MapNode<ChildKey, NodeId>>>,
    step_arena: Arc<ArenaPool<MapNode<StepKey, crate::score::LogScore>>>,
    notify_map_arena: Arc<ArenaPool<MapNode<NotifyKey, AtomicNotifyHead>>>,

    batches: Vec<BatchMaps>,
    beams: Vec<Vec<(f32, NodeId)>>,

    /// One worker per thread, persisted for the engine's lifetime so each
    /// thread's `ArenaLocal` batch reservations carry over between
    /// `init_beam` and the `expand_beam` calls of the same search instead of
    /// re-reserving a fresh batch (and burning pool capacity) on every call.
    /// `init_beam` resets each worker's local cursors alongside the arenas'
    /// own `clear_global`.
    workers: Vec<Mutex<BeamWorker>>,
}

impl Engine {
    /// Builds an engine with no language model: every node's `lmscore` is
    /// `0.0`. Never touches the filesystem, even if `config.lm_path` is set
    /// — per the spec, loading the model is the caller's job.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        if let Some(path) = &config.lm_path {
            warn!(
                "config requested a language model at {path:?} but Engine::new does not load one; \
                 use Engine::with_language_model, proceeding with lmscore=0"
            );
        }
        Self::build(config, None)
    }

    /// Builds an engine with an already-loaded language model plugged in.
    pub fn with_language_model(config: Config, lm: Box<dyn LanguageModel>) -> Result<Self> {
        config.validate()?;
        Self::build(config, Some(lm))
    }

    fn build(config: Config, lm: Option<Box<dyn LanguageModel>>) -> Result<Self> {
        let node_pool_size = config.node_pool_size();
        let notify_pool_size = config.notify_pool_size();
        let head_size = config.map_head_size();
        let batch_size = config.batch_size;

        let children_arena = Arc::new(ArenaPool::new(notify_pool_size));
        let step_arena = Arc::new(ArenaPool::new(notify_pool_size));
        let notify_map_arena = Arc::new(ArenaPool::new(notify_pool_size));

        let batches = (0..batch_size)
            .map(|_| BatchMaps {
                children: ConcurrentMap::new(head_size, Arc::clone(&children_arena)),
                step_score: ConcurrentMap::new(head_size, Arc::clone(&step_arena)),
                notify: ConcurrentMap::new(head_size, Arc::clone(&notify_map_arena)),
            })
            .collect();

        let thread_num = config.thread_num.max(1);
        let workers = (0..thread_num)
            .map(|tid| Mutex::new(BeamWorker::new(tid)))
            .collect();

        Ok(Self {
            node_arena: ArenaPool::new(node_pool_size),
            notify_arena: ArenaPool::new(notify_pool_size),
            children_arena,
            step_arena,
            notify_map_arena,
            batches,
            beams: vec![Vec::new(); batch_size],
            workers,
            config,
            lm,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Total capacity of the shared node arena, for reporting hashfull-style
    /// occupancy figures.
    pub fn node_pool_capacity(&self) -> usize {
        self.node_arena.capacity()
    }

    fn thread_num(&self) -> usize {
        self.config.thread_num.max(1)
    }

    // ---- node store -----------------------------------------------------

    pub fn node(&self, id: NodeId) -> &SearchNode {
        self.node_arena.get(id)
    }

    fn allocate_node(
        &self,
        node_local: &mut ArenaLocal,
        rng: &RefCell<Xoshiro256PlusPlus>,
        parent: Option<NodeId>,
        word: u32,
        lm_word: u32,
    ) -> Result<NodeId> {
        let node = match parent {
            None => {
                let lm_state = self
                    .lm
                    .as_ref()
                    .map(|lm| lm.begin_sentence())
                    .unwrap_or_default();
                SearchNode::root(word, lm_state)
            }
            Some(parent_id) => {
                let parent_node = self.node_arena.get(parent_id);
                let mut next_state = LmState::default();
                let lmscore = match &self.lm {
                    Some(lm) => parent_node.lmscore + lm.score(&parent_node.lm_state, lm_word, &mut next_state),
                    None => 0.0,
                };
                SearchNode::child(parent_id, word, parent_node.length + 1, lmscore, next_state)
            }
        };
        self.node_arena.allocate(node_local, rng, node)
    }

    /// Allocates a fresh root, publishes it at `dagscore = 0`, and notifies
    /// any reader waiting on `(step=0, length=0)`.
    fn start_node(&self, worker: &mut BeamWorker, batch: usize, go_id: u32) -> Result<NodeId> {
        let root = self.allocate_node(&mut worker.node_local, &worker.rng, None, go_id, go_id)?;
        self.node_arena.get(root).dagscore.store(0.0);

        // Seed step 0's score through the root's own quick-map, the same
        // path `add_step_score`/`expand_one` use, so a later `get_or_create`
        // for (root, 0) finds this value inline instead of silently shadowing
        // it with a fresh -inf slot.
        let search_node = self.node_arena.get(root);
        let rng = &worker.rng;
        let step_map_local = &mut worker.step_map_local;
        let batches = &self.batches;
        search_node.quickmap.get_or_create(0, 0.0, |k, init| {
            batches[batch]
                .step_score
                .get_or_create((root, k), step_map_local, rng, || Ok(crate::score::LogScore::new(init)))
        })?;

        let (slot, _created) = self.batches[batch].notify.get_or_create(
            (0, 0),
            &mut worker.notify_map_local,
            &worker.rng,
            || Ok(AtomicNotifyHead::new_empty()),
        )?;
        let entry = self.notify_arena.allocate(
            &mut worker.notify_local,
            &worker.rng,
            Notify::new(root),
        )?;
        let previous = slot.exchange(entry);
        self.notify_arena.get(entry).set_next(previous);

        Ok(root)
    }

    fn expand_cache_load(
        &self,
        worker: &mut BeamWorker,
        batch: usize,
        node: NodeId,
        word: u32,
        lm_word: u32,
    ) -> Result<NodeId> {
        if let Some(child) = worker.expand_cache.hit(node, word) {
            return Ok(child);
        }
        self.expand_cache_write_back(worker);

        let rng = &worker.rng;
        let node_local = &mut worker.node_local;
        let (child_ref, _created) = self.batches[batch].children.get_or_create(
            (node, word),
            &mut worker.children_map_local,
            rng,
            || self.allocate_node(node_local, rng, Some(node), word, lm_word),
        )?;
        let child = *child_ref;
        worker.expand_cache.begin(node, word, child);
        Ok(child)
    }

    fn expand_cache_write_back(&self, worker: &mut BeamWorker) {
        worker.expand_cache.write_back(&self.node_arena);
    }

    fn add_step_score(
        &self,
        worker: &mut BeamWorker,
        batch: usize,
        node: NodeId,
        step: u32,
        contribution: f32,
    ) -> Result<()> {
        let search_node = self.node_arena.get(node);
        let length = search_node.length;

        let rng = &worker.rng;
        let step_map_local = &mut worker.step_map_local;
        let batches = &self.batches;
        let (slot, created) = search_node.quickmap.get_or_create(step, contribution, |k, init| {
            batches[batch]
                .step_score
                .get_or_create((node, k), step_map_local, rng, || Ok(crate::score::LogScore::new(init)))
        })?;

        if created {
            worker
                .notify_cache
                .insert(&self.notify_arena, &mut worker.notify_local, &worker.rng, batch as u32, node, step, length)?;
        } else {
            slot.merge(contribution);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_path(
        &self,
        worker: &mut BeamWorker,
        batch: usize,
        node: NodeId,
        nextstep: u32,
        word: u32,
        lm_word: u32,
        contribution: f32,
    ) -> Result<()> {
        let child = self.expand_cache_load(worker, batch, node, word, lm_word)?;
        worker.expand_cache.add_score(contribution);
        self.add_step_score(worker, batch, child, nextstep, contribution)
    }

    // ---- external accessors ----------------------------------------------

    pub fn beam(&self, batch: usize) -> &[(f32, NodeId)] {
        &self.beams[batch]
    }

    pub fn set_beam(&mut self, batch: usize, beam: Vec<(f32, NodeId)>) {
        self.beams[batch] = beam;
    }

    /// Reads the current merged log-score for `(node, step)`, without
    /// creating an entry if one doesn't exist yet.
    pub fn step_score(&self, batch: usize, node: NodeId, step: u32) -> Option<f32> {
        let search_node = self.node_arena.get(node);
        if let Some(v) = search_node.quickmap.peek(step) {
            return Some(v);
        }
        self.batches[batch].step_score.get(&(node, step)).map(|s| s.load())
    }

    /// Iterates the published `(step, length)` notify chain in reverse
    /// publication order.
    pub fn notify_chain(&self, batch: usize, step: u32, length: u32) -> NotifyIter<'_> {
        let head = self.batches[batch]
            .notify
            .get(&(step, length))
            .and_then(|h| h.load());
        NotifyIter {
            engine: self,
            cur: head,
        }
    }

    // ---- driver entry points ----------------------------------------------

    /// Resets every arena and per-batch map, then allocates one fresh root
    /// per batch element, splitting the work across `config.thread_num`
    /// threads the way `expand_beam` splits its own chunk range.
    pub fn init_beam(&mut self, batch_size: usize, go_id: u32) -> Result<()> {
        if batch_size > self.batches.len() {
            return Err(EngineError::BatchSizeExceeded {
                requested: batch_size,
                max: self.batches.len(),
            });
        }
        self.node_arena.clear_global();
        self.notify_arena.clear_global();
        self.children_arena.clear_global();
        self.step_arena.clear_global();
        self.notify_map_arena.clear_global();
        for b in 0..batch_size {
            self.batches[b].children.clear();
            self.batches[b].step_score.clear();
            self.batches[b].notify.clear();
        }
        // The arenas were just rewound to zero, so every worker's stale
        // `[cursor, end)` batch reservations would now point at recycled
        // slots; a fresh `BeamWorker` resets them along with reseeding its
        // RNG for the new search.
        for (tid, worker) in self.workers.iter().enumerate() {
            *worker.lock().expect("worker mutex poisoned") = BeamWorker::new(tid);
        }

        let thread_num = self.thread_num();
        let ranges = split_static(batch_size, thread_num);
        let roots: Vec<(usize, NodeId)> = std::thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .into_iter()
                .enumerate()
                .map(|(tid, range)| {
                    let engine: &Engine = self;
                    scope.spawn(move || -> Result<Vec<(usize, NodeId)>> {
                        let mut guard = engine.workers[tid].lock().expect("worker mutex poisoned");
                        let worker = &mut *guard;
                        debug_assert_eq!(worker.thread_id, tid);
                        let mut out = Vec::with_capacity(range.len());
                        for b in range {
                            let root = engine.start_node(worker, b, go_id)?;
                            out.push((b, root));
                        }
                        engine.expand_cache_write_back(worker);
                        worker.notify_cache.flush(
                            &engine.notify_arena,
                            &engine.batches.iter().map(|bm| &bm.notify).collect::<Vec<_>>(),
                            &mut worker.notify_map_local,
                            &worker.rng,
                        )?;
                        Ok(out)
                    })
                })
                .collect();
            let mut all = Vec::new();
            for h in handles {
                all.extend(h.join().expect("init_beam worker thread panicked")?);
            }
            Result::Ok(all)
        })?;

        for (b, root) in roots {
            self.beams[b] = vec![(0.0, root)];
        }
        Ok(())
    }

    /// Expands every beam slot eligible at `step` in parallel, following the
    /// top-p nucleus cutoff over each slot's top-`k` candidates.
    #[allow(clippy::too_many_arguments)]
    pub fn expand_beam(
        &self,
        step: u32,
        output_length: TensorView<i32>,
        dagscores: TensorView<f32>,
        nextstep_idx: TensorView<i32>,
        logits_idx: TensorView<i32>,
        lm_vocab: TensorView<i32>,
        top_p: f32,
    ) -> Result<()> {
        let batch_size = self.beams.len();
        let manifest = ChunkManifest::build(batch_size, step, &output_length, |b| self.beams[b].len());
        let total = manifest.total();
        if total == 0 {
            return Ok(());
        }

        let ranges = split_static(total, self.thread_num());
        std::thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .into_iter()
                .enumerate()
                .map(|(tid, range)| {
                    let engine: &Engine = self;
                    let manifest = &manifest;
                    scope.spawn(move || -> Result<()> {
                        let mut guard = engine.workers[tid].lock().expect("worker mutex poisoned");
                        let worker = &mut *guard;
                        debug_assert_eq!(worker.thread_id, tid);
                        for i in range {
                            let (batch, slot) = manifest.locate(i);
                            let (_score, node) = engine.beams[batch][slot];
                            engine.expand_one(
                                worker,
                                batch,
                                node,
                                step,
                                &dagscores,
                                &nextstep_idx,
                                &logits_idx,
                                &lm_vocab,
                                top_p,
                            )?;
                        }
                        engine.expand_cache_write_back(worker);
                        worker.notify_cache.flush(
                            &engine.notify_arena,
                            &engine.batches.iter().map(|bm| &bm.notify).collect::<Vec<_>>(),
                            &mut worker.notify_map_local,
                            &worker.rng,
                        )?;
                        Ok(())
                    })
                })
                .collect();
            for h in handles {
                h.join().expect("expand_beam worker thread panicked")?;
            }
            Result::Ok(())
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_one(
        &self,
        worker: &mut BeamWorker,
        batch: usize,
        node: NodeId,
        step: u32,
        dagscores: &TensorView<f32>,
        nextstep_idx: &TensorView<i32>,
        logits_idx: &TensorView<i32>,
        lm_vocab: &TensorView<i32>,
        top_p: f32,
    ) -> Result<()> {
        let top_cand_n = self.config.top_cand_n;
        let search_node = self.node_arena.get(node);

        let rng = &worker.rng;
        let step_map_local = &mut worker.step_map_local;
        let batches = &self.batches;
        let (base_slot, created) = search_node.quickmap.get_or_create(step, f32::NEG_INFINITY, |k, init| {
            batches[batch]
                .step_score
                .get_or_create((node, k), step_map_local, rng, || Ok(crate::score::LogScore::new(init)))
        })?;
        #[cfg(debug_assertions)]
        if created {
            debug!(
                "expand_beam: no step-score entry existed yet for a beam node (batch={batch}, step={step}); \
                 treating its base score as -inf"
            );
        }
        debug_assert!(
            !created,
            "expand_beam: beam node at (batch={batch}, step={step}) has no step-score entry; \
             every live beam node should have been seeded by start_node or a prior add_step_score"
        );
        let base = base_slot.load();

        let mut cumulative = 0.0f32;
        for j in 0..top_cand_n {
            if cumulative >= top_p {
                break;
            }
            let word = logits_idx.at3(batch, step as usize, j) as u32;
            let lm_word = lm_vocab.at1(word as usize) as u32;
            let nextstep = nextstep_idx.at3(batch, step as usize, j) as u32;
            let ds = dagscores.at3(batch, step as usize, j);
            cumulative += ds.exp();
            self.expand_path(worker, batch, node, nextstep, word, lm_word, base + ds)?;
        }
        Ok(())
    }
}

pub struct NotifyIter<'a> {
    engine: &'a Engine,
    cur: Option<NotifyId>,
}

impl<'a> Iterator for NotifyIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cur?;
        let notify = self.engine.notify_arena.get(id);
        self.cur = notify.next_id();
        Some(notify.target)
    }
}
