use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::HintStat;

/// Exploration rate of the epsilon-greedy policy.
pub const EPSILON: f64 = 0.15;

/// Weight of the average-delta bonus in the exploitation score.
const DELTA_BONUS_WEIGHT: f64 = 0.05;

/// Injectable randomness so tests can force the exploration and exploitation
/// branches deterministically.
pub trait RandomSource: Send + Sync {
    /// Uniform draw in [0, 1).
    fn roll(&self) -> f64;
    /// Uniform index in [0, len). `len` is always >= 1.
    fn pick(&self, len: usize) -> usize;
}

/// Production source backed by the thread-local generator.
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn roll(&self) -> f64 {
        rand::rng().random()
    }

    fn pick(&self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// Deterministic source for reproducible runs.
pub struct SeededRandom(Mutex<StdRng>);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl RandomSource for SeededRandom {
    fn roll(&self) -> f64 {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random()
    }

    fn pick(&self, len: usize) -> usize {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(0..len)
    }
}

/// Epsilon-greedy chooser over the phrasing variants of one (cluster, level).
pub struct VariantSelector {
    rng: Box<dyn RandomSource>,
    epsilon: f64,
}

impl Default for VariantSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl VariantSelector {
    pub fn new() -> Self {
        Self::with_random(Box::new(ThreadRandom))
    }

    pub fn with_random(rng: Box<dyn RandomSource>) -> Self {
        Self {
            rng,
            epsilon: EPSILON,
        }
    }

    /// Picks a variant name. `variants` is in catalog-declared order and
    /// `stats` holds the persisted rows for the same (language, cluster,
    /// level). Single-variant entries bypass exploration entirely.
    pub fn choose(&self, variants: &[String], stats: &[HintStat]) -> String {
        if variants.is_empty() {
            return "default".to_string();
        }
        if variants.len() == 1 {
            return variants[0].clone();
        }

        if self.rng.roll() < self.epsilon {
            return variants[self.rng.pick(variants.len())].clone();
        }

        // Conservative score = Laplace-smoothed success rate + tiny bonus for
        // average improvement magnitude.
        let mut score_by_variant: HashMap<&str, f64> = HashMap::new();
        for row in stats {
            let rate = (row.improvements as f64 + 1.0) / (row.exposures as f64 + 2.0);
            let bonus = DELTA_BONUS_WEIGHT * row.total_delta / (row.exposures as f64).max(1.0);
            score_by_variant.insert(row.hint_variant.as_str(), rate + bonus);
        }

        // Variants with no data yet are preferred to bootstrap collection.
        let unseen: Vec<&String> = variants
            .iter()
            .filter(|v| !score_by_variant.contains_key(v.as_str()))
            .collect();
        if !unseen.is_empty() {
            return unseen[self.rng.pick(unseen.len())].clone();
        }

        let mut best = &variants[0];
        let mut best_score = f64::NEG_INFINITY;
        for variant in variants {
            let score = score_by_variant
                .get(variant.as_str())
                .copied()
                .unwrap_or(0.0);
            // Strict comparison keeps catalog order on ties.
            if score > best_score {
                best = variant;
                best_score = score;
            }
        }
        best.clone()
    }
}
