//! Log-domain score accumulation shared by `SearchNode::dagscore`, the
//! quick-map's inline slots, and the step-score hash map's spilled slots.
//!
//! All three are "the same kind of cell": a log-probability that multiple
//! threads may fold a new contribution into concurrently via
//! log-sum-exp. Pulling that into one atomic-CAS type keeps the merge logic
//! (and its correctness argument) in a single place instead of duplicated at
//! each of the three call sites.

use std::sync::atomic::{AtomicU32, Ordering};

/// Numerically stable `log(exp(a) + exp(b))`.
#[inline]
pub fn logsumexp(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// A log-probability cell that can be merged into concurrently via a
/// compare-exchange retry loop, storing the `f32` bit pattern in an
/// `AtomicU32`.
pub struct LogScore(AtomicU32);

impl LogScore {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn neg_infinity() -> Self {
        Self::new(f32::NEG_INFINITY)
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Folds `contribution` into the current value via log-sum-exp,
    /// retrying the CAS if another thread merges in concurrently. This is
    /// the atomic fix for the reference implementation's non-atomic
    /// read-modify-write on `dagscore` (see `DESIGN.md`).
    pub fn merge(&self, contribution: f32) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let merged = logsumexp(f32::from_bits(current), contribution).to_bits();
            match self.0.compare_exchange_weak(
                current,
                merged,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Clone for LogScore {
    fn clone(&self) -> Self {
        Self::new(self.load())
    }
}

impl std::fmt::Debug for LogScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LogScore({})", self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logsumexp_matches_naive_computation() {
        let a = 0.1f32;
        let b = 0.7f32;
        let expected = (a.exp() + b.exp()).ln();
        assert!((logsumexp(a, b) - expected).abs() < 1e-5);
    }

    #[test]
    fn logsumexp_short_circuits_neg_infinity() {
        assert_eq!(logsumexp(f32::NEG_INFINITY, 1.0), 1.0);
        assert_eq!(logsumexp(1.0, f32::NEG_INFINITY), 1.0);
        assert_eq!(logsumexp(f32::NEG_INFINITY, f32::NEG_INFINITY), f32::NEG_INFINITY);
    }

    #[test]
    fn merge_accumulates_under_contention() {
        let score = LogScore::neg_infinity();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let score = &score;
                scope.spawn(move || {
                    for _ in 0..1000 {
                        score.merge(1.0_f32.ln());
                    }
                });
            }
        });
        let expected = 8000.0_f32.ln();
        assert!((score.load() - expected).abs() < 1e-2);
    }
}
