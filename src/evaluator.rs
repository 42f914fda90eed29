//! Parallel candidate evaluation on a bounded worker pool

use crate::cache::{CacheStats, CanonicalKey, EvaluationCache};
use crate::error::Result;
use crate::objective::Objective;
use crate::plume::ForwardModel;
use crate::population::{Candidate, EvaluatedCandidate, Evaluation};
use crate::scenario::ScenarioConfig;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Scores candidates through the cache on a dedicated rayon pool.
///
/// `evaluate` returns only when every candidate of the batch is done, which
/// makes each call a generation barrier.
pub struct ParallelEvaluator {
    pool: rayon::ThreadPool,
    model: Arc<dyn ForwardModel>,
    objective: Arc<Objective>,
    scenario: Arc<ScenarioConfig>,
    cache: Arc<EvaluationCache>,
    fingerprint_decimals: u32,
}

impl ParallelEvaluator {
    /// `workers == 0` uses rayon's default thread count
    pub fn new(
        workers: usize,
        model: Arc<dyn ForwardModel>,
        objective: Arc<Objective>,
        scenario: Arc<ScenarioConfig>,
        cache: Arc<EvaluationCache>,
        fingerprint_decimals: u32,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("plume-eval-{i}"))
            .build()?;

        Ok(Self {
            pool,
            model,
            objective,
            scenario,
            cache,
            fingerprint_decimals,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Evaluate a batch; output order matches input order
    pub fn evaluate(&self, candidates: Vec<Candidate>) -> Result<Vec<EvaluatedCandidate>> {
        self.pool.install(|| {
            candidates
                .into_par_iter()
                .map(|candidate| self.evaluate_one(candidate))
                .collect()
        })
    }

    fn evaluate_one(&self, candidate: Candidate) -> Result<EvaluatedCandidate> {
        let key = CanonicalKey::new(&candidate, self.scenario.meteorology(), self.fingerprint_decimals);
        let evaluation = self.cache.get_or_compute(key, |key| self.compute(key))?;
        Ok(EvaluatedCandidate::new(candidate, evaluation))
    }

    fn compute(&self, key: &CanonicalKey) -> Evaluation {
        let fingerprint = key.fingerprint();
        let source = key.source();

        match self
            .model
            .predict(&source, self.scenario.receptors(), self.scenario.meteorology())
        {
            Ok(predictions) => {
                let objectives = self.objective.score(&predictions);
                if objectives.iter().all(|f| f.is_finite()) {
                    Evaluation::scored(fingerprint, objectives, predictions)
                } else {
                    debug!(?source, "non-finite objective, penalising");
                    Evaluation::penalized(
                        fingerprint,
                        self.objective.dimensions(),
                        "objective is not finite",
                    )
                }
            }
            Err(err) => {
                debug!(?source, %err, "forward model rejected candidate");
                Evaluation::penalized(fingerprint, self.objective.dimensions(), err.to_string())
            }
        }
    }

    /// Forward-model runs performed so far
    pub fn forward_evaluations(&self) -> u64 {
        self.cache.stats().computations
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
