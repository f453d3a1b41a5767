//! Synthetic-tensor bench/demo harness for `dagsearch-core`.
//!
//! Builds random candidate tensors shaped like what a real decoder would
//! hand the engine, drives `Engine` through `max_pos` steps, and reports
//! timing plus a hashfull-style node-pool occupancy figure, in the manner of
//! the teacher's `tools` self-play binaries.
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use dagsearch_core::{Config, Engine};
use rand::distr::{Distribution, Uniform};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Drives the DAG beam-search engine over synthetic candidate tensors.
#[derive(Parser, Debug)]
#[command(author, version, about = "dagsearch synthetic bench/demo harness")]
struct Cli {
    /// Path to a TOML config file; falls back to the `--batch-size`/etc flags below.
    #[arg(long)]
    config: Option<String>,

    /// Number of independent sequences decoded side by side.
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    /// Beam width carried at each decoding position.
    #[arg(long, default_value_t = 8)]
    beam_size: usize,

    /// Number of top candidates considered per expansion.
    #[arg(long, default_value_t = 4)]
    top_cand_n: usize,

    /// Maximum sequence length a batch element may reach.
    #[arg(long, default_value_t = 16)]
    max_pos: usize,

    /// Worker thread count; defaults to the engine's own default.
    #[arg(long)]
    thread_num: Option<usize>,

    /// Vocabulary size to sample synthetic candidate words from.
    #[arg(long, default_value_t = 1000)]
    vocab_size: usize,

    /// Nucleus (top-p) cutoff applied per expansion step.
    #[arg(long, default_value_t = 0.9)]
    top_p: f32,

    /// RNG seed for the synthetic tensors.
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn build_config(cli: &Cli) -> Result<Config> {
    if let Some(path) = &cli.config {
        return Config::from_file(path).with_context(|| format!("loading config from {path}"));
    }
    let mut config = Config {
        batch_size: cli.batch_size,
        beam_size: cli.beam_size,
        top_cand_n: cli.top_cand_n,
        max_pos: cli.max_pos,
        thread_num: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        lm_path: None,
    };
    if let Some(threads) = cli.thread_num {
        config.thread_num = threads;
    }
    Ok(config)
}

/// One step's worth of candidate tensors, owned so the `TensorView`s handed
/// to the engine stay valid for the call.
struct StepTensors {
    output_length: Vec<i32>,
    dagscores: Vec<f32>,
    nextstep_idx: Vec<i32>,
    logits_idx: Vec<i32>,
    lm_vocab: Vec<i32>,
}

fn synthesize_step(
    rng: &mut Xoshiro256PlusPlus,
    batch_size: usize,
    top_cand_n: usize,
    max_pos: usize,
    vocab_size: usize,
) -> StepTensors {
    use rand::Rng;

    let word_dist = Uniform::new(0, vocab_size as i32).unwrap();
    let nextstep_dist = Uniform::new(0, max_pos as i32).unwrap();

    let output_length = vec![max_pos as i32; batch_size];
    let lm_vocab: Vec<i32> = (0..vocab_size as i32).collect();

    let mut logits_idx = Vec::with_capacity(batch_size * max_pos * top_cand_n);
    let mut nextstep_idx = Vec::with_capacity(batch_size * max_pos * top_cand_n);
    let mut raw_scores = Vec::with_capacity(batch_size * max_pos * top_cand_n);
    for _ in 0..batch_size * max_pos {
        let mut row = Vec::with_capacity(top_cand_n);
        for _ in 0..top_cand_n {
            logits_idx.push(word_dist.sample(rng));
            nextstep_idx.push(nextstep_dist.sample(rng));
            row.push(-rng.random_range(0.0f32..4.0));
        }
        let total: f32 = row.iter().map(|s| s.exp()).sum::<f32>().ln();
        raw_scores.extend(row.into_iter().map(|s| s - total));
    }

    StepTensors {
        output_length,
        dagscores: raw_scores,
        nextstep_idx,
        logits_idx,
        lm_vocab,
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let mut engine = Engine::new(config.clone())?;
    let node_pool_size = engine.node_pool_capacity();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(cli.seed);

    let start = Instant::now();
    engine.init_beam(config.batch_size, /* go_id = */ 0)?;

    for step in 0..config.max_pos as u32 {
        let tensors = synthesize_step(
            &mut rng,
            config.batch_size,
            config.top_cand_n,
            config.max_pos,
            cli.vocab_size,
        );
        let output_length = dagsearch_core::TensorView::from_row_major_1d(&tensors.output_length);
        let dagscores = dagsearch_core::TensorView::from_row_major_3d(
            &tensors.dagscores,
            [config.batch_size, config.max_pos, config.top_cand_n],
        );
        let nextstep_idx = dagsearch_core::TensorView::from_row_major_3d(
            &tensors.nextstep_idx,
            [config.batch_size, config.max_pos, config.top_cand_n],
        );
        let logits_idx = dagsearch_core::TensorView::from_row_major_3d(
            &tensors.logits_idx,
            [config.batch_size, config.max_pos, config.top_cand_n],
        );
        let lm_vocab = dagsearch_core::TensorView::from_row_major_1d(&tensors.lm_vocab);

        engine.expand_beam(
            step,
            output_length,
            dagscores,
            nextstep_idx,
            logits_idx,
            lm_vocab,
            cli.top_p,
        )?;
        log::debug!("step {step} expanded");
    }

    let elapsed = start.elapsed();
    let live_nodes: usize = (0..config.batch_size).map(|b| engine.beam(b).len()).sum();
    println!(
        "decoded batch_size={} beam_size={} max_pos={} in {:.3}s (node pool hashfull-style occupancy: {}/{} live beam entries)",
        config.batch_size,
        config.beam_size,
        config.max_pos,
        elapsed.as_secs_f64(),
        live_nodes,
        node_pool_size,
    );
    Ok(())
}
