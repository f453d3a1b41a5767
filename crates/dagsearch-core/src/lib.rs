//! Non-autoregressive DAG beam search engine.
//!
//! `Engine` owns every shared arena and per-batch concurrent map; callers
//! drive a decode by alternating `Engine::init_beam` and `Engine::expand_beam`
//! calls, reading each step's beam back out via `Engine::beam`.

mod arena;
mod cache;
mod concurrent_map;
mod config;
mod driver;
mod engine;
mod error;
mod lm;
mod node;
mod quickmap;
mod score;
mod tensor;

pub use config::Config;
pub use engine::{Engine, NotifyIter};
pub use error::{EngineError, Result};
pub use lm::{LanguageModel, LmState};
pub use node::{NodeId, NotifyId, SearchNode};
pub use score::{logsumexp, LogScore};
pub use tensor::TensorView;
