//! Engine configuration, loaded from TOML the way `rshogi-core`'s tools load
//! their YAML/JSON configs: a plain `serde::Deserialize` struct plus a couple
//! of `from_*` constructors that turn parse errors into `EngineError`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Minimum and randomized-extra size (in objects) of each per-thread arena
/// refill batch. Mirrors the reference implementation's `buf_per_thread` and
/// `randomized_buf_per_thread` constants.
pub const ARENA_BATCH_MIN: usize = 1024;
pub const ARENA_BATCH_RANDOM: usize = 1024;

/// Number of inline (step, score) slots carried directly on a `SearchNode`
/// before the quick-map spills into the shared step-score hash map.
pub const QUICKMAP_INLINE_SLOTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of independent sequences decoded side by side.
    pub batch_size: usize,
    /// Beam width carried at each decoding position.
    pub beam_size: usize,
    /// Number of top candidates considered per expansion (top-k window).
    pub top_cand_n: usize,
    /// Maximum sequence length a batch element may reach.
    pub max_pos: usize,
    /// Worker thread count used by `init_beam` and `expand_beam`.
    #[serde(default = "default_thread_num")]
    pub thread_num: usize,
    /// Optional path to an n-gram language model. Loading it is the caller's
    /// responsibility (see `Engine::with_language_model`); this field exists
    /// purely so it round-trips through config files.
    #[serde(default)]
    pub lm_path: Option<PathBuf>,
}

fn default_thread_num() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::Configuration(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Configuration(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EngineError::Configuration("batch_size must be > 0".into()));
        }
        if self.beam_size == 0 {
            return Err(EngineError::Configuration("beam_size must be > 0".into()));
        }
        if self.top_cand_n == 0 {
            return Err(EngineError::Configuration("top_cand_n must be > 0".into()));
        }
        if self.max_pos == 0 {
            return Err(EngineError::Configuration("max_pos must be > 0".into()));
        }
        Ok(())
    }

    /// Upper bound on the number of `SearchNode`s a full search can create:
    /// every (batch, beam slot, position) triple expanding into every
    /// top-candidate word, plus per-thread refill slack.
    pub fn node_pool_size(&self) -> usize {
        self.batch_size * self.beam_size * self.top_cand_n * self.max_pos
            + self.thread_num.max(1) * (ARENA_BATCH_MIN + ARENA_BATCH_RANDOM)
    }

    /// Upper bound on notify-list entries; same shape as the node pool.
    pub fn notify_pool_size(&self) -> usize {
        self.node_pool_size()
    }

    /// Hash-bucket count for a per-batch concurrent map. Entries accumulate
    /// across every position between `init_beam` clears (not just one
    /// step), so this scales by `max_pos` the same way `node_pool_size`/
    /// `notify_pool_size` do, just divided down since a bucket chain can
    /// hold several entries cheaply.
    pub fn map_head_size(&self) -> usize {
        ((self.beam_size * self.top_cand_n * self.max_pos) / 10).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let cfg = Config::from_toml_str(
            r#"
            batch_size = 2
            beam_size = 4
            top_cand_n = 8
            max_pos = 16
            thread_num = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.batch_size, 2);
        assert_eq!(cfg.thread_num, 2);
        assert!(cfg.lm_path.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_zero_batch_size() {
        let cfg = Config::from_toml_str(
            "batch_size = 0\nbeam_size = 1\ntop_cand_n = 1\nmax_pos = 1\n",
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }
}
