//! The n-gram language-model adapter seam.
//!
//! The model itself — loading a KenLM-style binary, scoring an n-gram state
//! transition — is treated as an opaque external collaborator, the same way
//! `rshogi-core`'s evaluation function is a pluggable `Arc<EvalHash>` handed
//! to a `SearchWorker` rather than something the search crate implements.
//! Loading is therefore the caller's responsibility: `Engine::new` never
//! touches the filesystem, and a missing model degrades to `lmscore = 0`
//! rather than failing the search.

use std::fmt;

/// Opaque, fixed-size n-gram model state. 32 bytes is generous for typical
/// KenLM state representations; callers that need more should widen this.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct LmState(pub [u8; 32]);

impl fmt::Debug for LmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LmState({:02x?})", &self.0[..8])
    }
}

/// A scorer capable of producing incremental n-gram log-probabilities.
/// Implementations are expected to be cheap to call from many threads at
/// once; `score` takes `&self` for exactly that reason.
pub trait LanguageModel: Send + Sync {
    /// State for an empty prefix (the root of a search).
    fn begin_sentence(&self) -> LmState;

    /// Score transitioning from `prev` by emitting `lm_word`, writing the
    /// resulting state into `next`. Returns a log-probability.
    fn score(&self, prev: &LmState, lm_word: u32, next: &mut LmState) -> f32;

    /// Maps a surface vocabulary id to this model's internal id, if known.
    fn vocabulary_index(&self, word: u32) -> Option<u32>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A trivial stand-in used only by this crate's own tests: charges a
    /// fixed per-word penalty, state is just the running word count.
    pub struct ConstantLm {
        pub penalty: f32,
    }

    impl LanguageModel for ConstantLm {
        fn begin_sentence(&self) -> LmState {
            LmState::default()
        }

        fn score(&self, prev: &LmState, _lm_word: u32, next: &mut LmState) -> f32 {
            let count = u32::from_le_bytes(prev.0[0..4].try_into().unwrap());
            next.0[0..4].copy_from_slice(&(count + 1).to_le_bytes());
            self.penalty
        }

        fn vocabulary_index(&self, word: u32) -> Option<u32> {
            Some(word)
        }
    }
}
