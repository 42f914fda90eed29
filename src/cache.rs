//! Single-flight memoisation of candidate evaluations
//!
//! Keys are the bit patterns of the candidate parameters rounded to a fixed
//! number of decimals, together with the exact bit patterns of the
//! meteorological state. Each
//! fingerprint owns a slot holding a `OnceLock`: the first worker to reach
//! the slot computes, every concurrent worker blocks on the same cell and
//! shares the result. Shard locks of the map are held only while the slot is
//! looked up, never while the forward model runs.

use crate::error::{InversionError, Result};
use crate::population::{Candidate, Evaluation};
use crate::scenario::{Meteorology, Source, StabilityClass};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::error;

/// 64-bit hash of a `CanonicalKey`
pub type Fingerprint = u64;

/// Largest supported rounding precision
pub const MAX_FINGERPRINT_DECIMALS: u32 = 12;

/// Exact identity of an evaluation request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey {
    decimals: u32,
    /// Bits of the rounded parameters
    params: [u64; 4],
    meteorology: [u64; 8],
}

fn stability_code(stability: Option<StabilityClass>) -> u64 {
    match stability {
        None => 0,
        Some(StabilityClass::A) => 1,
        Some(StabilityClass::B) => 2,
        Some(StabilityClass::C) => 3,
        Some(StabilityClass::D) => 4,
        Some(StabilityClass::E) => 5,
        Some(StabilityClass::F) => 6,
    }
}

/// Round in floating point; large coordinates keep their magnitude instead
/// of saturating an integer. `-0.0` folds into `0.0`.
fn round_to_scale(value: f64, scale: f64) -> f64 {
    let scaled = value * scale;
    let rounded = if scaled.is_finite() {
        scaled.round() / scale
    } else {
        value
    };
    rounded + 0.0
}

impl CanonicalKey {
    pub fn new(candidate: &Candidate, meteorology: &Meteorology, decimals: u32) -> Self {
        let decimals = decimals.min(MAX_FINGERPRINT_DECIMALS);
        let scale = 10f64.powi(decimals as i32);
        let genes = candidate.genes();
        let mut params = [0u64; 4];
        for (slot, value) in params.iter_mut().zip(genes) {
            *slot = round_to_scale(value, scale).to_bits();
        }

        Self {
            decimals,
            params,
            meteorology: [
                meteorology.wind_speed.to_bits(),
                meteorology.wind_direction.to_bits(),
                meteorology.temperature.to_bits(),
                meteorology.humidity.to_bits(),
                meteorology.pressure.to_bits(),
                meteorology.solar_radiation.to_bits(),
                meteorology.cloud_cover.to_bits(),
                stability_code(meteorology.stability),
            ],
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Source at the rounded parameters; the value the forward model sees
    pub fn source(&self) -> Source {
        Source::from_genes(self.params.map(f64::from_bits))
    }
}

struct Slot {
    key: CanonicalKey,
    cell: OnceLock<Arc<Evaluation>>,
}

/// Counters for one run's cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups, hits included
    pub requests: u64,
    /// Forward-model evaluations actually performed
    pub computations: u64,
    /// Distinct fingerprints stored
    pub entries: usize,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.requests.saturating_sub(self.computations)
    }

    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits() as f64 / self.requests as f64
        }
    }
}

/// Fingerprint → evaluation map scoped to one run
#[derive(Default)]
pub struct EvaluationCache {
    slots: DashMap<Fingerprint, Arc<Slot>>,
    requests: AtomicU64,
    computations: AtomicU64,
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the evaluation stored for `key`, running `compute` exactly once
    /// per fingerprint across all threads.
    ///
    /// A slot whose stored key differs from `key` is a fingerprint collision
    /// and fails with `InversionError::CacheInvariant`.
    pub fn get_or_compute<F>(&self, key: CanonicalKey, compute: F) -> Result<Arc<Evaluation>>
    where
        F: FnOnce(&CanonicalKey) -> Evaluation,
    {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let fingerprint = key.fingerprint();

        let slot = Arc::clone(
            self.slots
                .entry(fingerprint)
                .or_insert_with(|| {
                    Arc::new(Slot {
                        key: key.clone(),
                        cell: OnceLock::new(),
                    })
                })
                .value(),
        );

        if slot.key != key {
            error!(fingerprint, "fingerprint collision in evaluation cache");
            return Err(InversionError::cache_invariant(format!(
                "fingerprint {:016x} maps to {:?} but was requested for {:?}",
                fingerprint, slot.key, key
            )));
        }

        let evaluation = slot.cell.get_or_init(|| {
            self.computations.fetch_add(1, Ordering::Relaxed);
            Arc::new(compute(&slot.key))
        });

        Ok(Arc::clone(evaluation))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            requests: self.requests.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            entries: self.slots.len(),
        }
    }
}
