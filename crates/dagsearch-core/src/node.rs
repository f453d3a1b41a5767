//! The search node store: node identity, its DAG-accumulated score, and the
//! notify-list linked-list nodes used to fan hypotheses back out by
//! (step, length).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::arena::ArenaIndex;
use crate::config::QUICKMAP_INLINE_SLOTS;
use crate::lm::LmState;
use crate::quickmap::QuickMap;
use crate::score::LogScore;

pub type NodeId = ArenaIndex<SearchNode>;
pub type NotifyId = ArenaIndex<Notify>;

const NULL_NOTIFY: u32 = u32::MAX;

/// One decoded hypothesis. Identity is by arena position (`NodeId`); once
/// allocated a node's `parent`/`word`/`length`/`lmscore`/`lm_state` never
/// change, while `dagscore` and the embedded `quickmap` accumulate
/// concurrently as more paths converge on it.
pub struct SearchNode {
    pub parent: Option<NodeId>,
    pub word: u32,
    pub length: u32,
    pub lmscore: f32,
    pub dagscore: LogScore,
    pub quickmap: QuickMap<QUICKMAP_INLINE_SLOTS>,
    pub lm_state: LmState,
}

impl SearchNode {
    pub(crate) fn root(word: u32, lm_state: LmState) -> Self {
        Self {
            parent: None,
            word,
            length: 0,
            lmscore: 0.0,
            dagscore: LogScore::new(0.0),
            quickmap: QuickMap::new(),
            lm_state,
        }
    }

    pub(crate) fn child(parent: NodeId, word: u32, length: u32, lmscore: f32, lm_state: LmState) -> Self {
        Self {
            parent: Some(parent),
            word,
            length,
            lmscore,
            dagscore: LogScore::neg_infinity(),
            quickmap: QuickMap::new(),
            lm_state,
        }
    }
}

/// One link in a (step, length) notify chain. `next` is written exactly
/// once, by the thread that allocates this entry, before the entry is
/// published into a shared head pointer — never mutated afterward, so a
/// plain atomic store (not a CAS loop) suffices.
pub struct Notify {
    pub target: NodeId,
    next: AtomicU32,
}

impl Notify {
    pub(crate) fn new(target: NodeId) -> Self {
        Self {
            target,
            next: AtomicU32::new(NULL_NOTIFY),
        }
    }

    pub(crate) fn set_next(&self, next: Option<NotifyId>) {
        let raw = next.map(|n| n.raw()).unwrap_or(NULL_NOTIFY);
        self.next.store(raw, Ordering::Relaxed);
    }

    pub(crate) fn next_id(&self) -> Option<NotifyId> {
        let raw = self.next.load(Ordering::Relaxed);
        (raw != NULL_NOTIFY).then(|| ArenaIndex::new(raw as usize))
    }
}

/// The published head of a (step, length) notify chain: a lock-free
/// singly-linked-list head that new entries splice themselves onto via
/// `exchange`, mirroring `direct_insert_notify`'s atomic pointer swap.
pub struct AtomicNotifyHead(AtomicU32);

impl AtomicNotifyHead {
    pub fn new_empty() -> Self {
        Self(AtomicU32::new(NULL_NOTIFY))
    }

    /// Publishes `new_head`, returning whatever was previously there so the
    /// caller can link it as `new_head.next`.
    pub fn exchange(&self, new_head: NotifyId) -> Option<NotifyId> {
        let old = self.0.swap(new_head.raw(), Ordering::AcqRel);
        (old != NULL_NOTIFY).then(|| ArenaIndex::new(old as usize))
    }

    pub fn load(&self) -> Option<NotifyId> {
        let raw = self.0.load(Ordering::Acquire);
        (raw != NULL_NOTIFY).then(|| ArenaIndex::new(raw as usize))
    }
}
