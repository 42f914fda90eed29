//! Inversion driver: one run end to end, or several policies side by side

use crate::cache::{CacheStats, EvaluationCache};
use crate::comparison::{ComparisonSummary, PolicyRun};
use crate::convergence::{GenerationRecord, TerminationReason};
use crate::error::Result;
use crate::evaluator::ParallelEvaluator;
use crate::objective::{Objective, ObjectiveMode};
use crate::operators::InversionRng;
use crate::optimizer::GeneticOptimizer;
use crate::options::{Policy, RunOptions};
use crate::pareto;
use crate::plume::{ForwardModel, GaussianPlume};
use crate::population::EvaluatedCandidate;
use crate::scenario::{ParamRange, ScenarioConfig, SearchBounds, SensorObservations, Source};
use crate::strategy;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Reference point for the hypervolume of a multi-objective front
pub const HYPERVOLUME_REFERENCE: (f64, f64) = (1.0, 1.0);

/// z-score of the two-sided 95 % interval
const Z_95: f64 = 1.96;

/// Single best candidate or the non-dominated front
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "members", rename_all = "snake_case")]
pub enum BestEstimate {
    Single(EvaluatedCandidate),
    /// Ordered by the primary objective
    ParetoFront(Vec<EvaluatedCandidate>),
}

impl BestEstimate {
    /// Member with the lowest primary fitness
    pub fn representative(&self) -> Option<&EvaluatedCandidate> {
        match self {
            Self::Single(best) => Some(best),
            Self::ParetoFront(front) => front.iter().min_by(|a, b| a.cmp_fitness(b)),
        }
    }

    pub fn members(&self) -> &[EvaluatedCandidate] {
        match self {
            Self::Single(best) => std::slice::from_ref(best),
            Self::ParetoFront(front) => front,
        }
    }
}

/// Spread of one parameter over the estimate sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterUncertainty {
    pub mean: f64,
    pub std_dev: f64,
    /// 95 % interval, clamped to the search bounds
    pub lower: f64,
    pub upper: f64,
}

impl ParameterUncertainty {
    fn from_samples(values: &[f64], range: &ParamRange) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                mean: f64::NAN,
                std_dev: f64::NAN,
                lower: range.lower,
                upper: range.upper,
            };
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let std_dev = if n > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        Self {
            mean,
            std_dev,
            lower: range.clamp(mean - Z_95 * std_dev),
            upper: range.clamp(mean + Z_95 * std_dev),
        }
    }
}

/// Parameter uncertainty over the best quartile or the Pareto front
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UncertaintyEstimate {
    pub sample_size: usize,
    pub x: ParameterUncertainty,
    pub y: ParameterUncertainty,
    pub height: ParameterUncertainty,
    pub emission_rate: ParameterUncertainty,
}

impl UncertaintyEstimate {
    pub fn from_members(members: &[EvaluatedCandidate], bounds: &SearchBounds) -> Self {
        let sample: Vec<[f64; 4]> = members
            .iter()
            .filter(|m| !m.evaluation.is_penalized())
            .map(|m| m.candidate.genes())
            .collect();
        let ranges = bounds.ranges();
        let column = |d: usize| {
            let values: Vec<f64> = sample.iter().map(|g| g[d]).collect();
            ParameterUncertainty::from_samples(&values, &ranges[d])
        };

        Self {
            sample_size: sample.len(),
            x: column(0),
            y: column(1),
            height: column(2),
            emission_rate: column(3),
        }
    }
}

/// Error of the estimate against a known source
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationMetrics {
    /// Horizontal distance [m]
    pub position_error: f64,
    /// Absolute height difference [m]
    pub height_error: f64,
    /// Relative emission rate error [%]
    pub emission_error: f64,
}

impl ValidationMetrics {
    pub fn compute(estimate: &Source, truth: &Source) -> Self {
        let q_err = (estimate.emission_rate - truth.emission_rate).abs();
        let emission_error = if truth.emission_rate.abs() > 0.0 {
            q_err / truth.emission_rate.abs() * 100.0
        } else {
            q_err * 100.0
        };
        Self {
            position_error: estimate.horizontal_distance(truth),
            height_error: (estimate.height - truth.height).abs(),
            emission_error,
        }
    }
}

/// Outcome of one inversion run.
///
/// Contains no wall-clock data, so identical inputs and seed give an equal
/// result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InversionResult {
    pub policy: Policy,
    pub best: BestEstimate,
    /// Objective vector of the representative estimate
    pub best_fitness: Vec<f64>,
    pub termination: TerminationReason,
    pub generations: usize,
    pub history: Vec<GenerationRecord>,
    pub uncertainty: UncertaintyEstimate,
    pub validation: Option<ValidationMetrics>,
    pub cache: CacheStats,
    /// Multi-objective only
    pub hypervolume: Option<f64>,
}

impl InversionResult {
    /// Source of the representative estimate
    pub fn estimate(&self) -> Option<Source> {
        self.best.representative().map(|m| *m.candidate.source())
    }
}

/// Runs inversions for one scenario and observation set
pub struct InversionDriver {
    scenario: Arc<ScenarioConfig>,
    observations: SensorObservations,
    model: Arc<dyn ForwardModel>,
    ground_truth: Option<Source>,
    progress: Option<Sender<GenerationRecord>>,
}

impl InversionDriver {
    pub fn new(scenario: ScenarioConfig, observations: SensorObservations) -> Self {
        Self {
            scenario: Arc::new(scenario),
            observations,
            model: Arc::new(GaussianPlume::default()),
            ground_truth: None,
            progress: None,
        }
    }

    /// Replace the default Gaussian plume
    pub fn with_forward_model(mut self, model: Arc<dyn ForwardModel>) -> Self {
        self.model = model;
        self
    }

    /// Enable validation metrics against a known source
    pub fn with_ground_truth(mut self, truth: Source) -> Self {
        self.ground_truth = Some(truth);
        self
    }

    /// Stream every generation record to `tx`
    pub fn with_progress(mut self, tx: Sender<GenerationRecord>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn scenario(&self) -> &ScenarioConfig {
        &self.scenario
    }

    /// One complete inversion with its own cache, RNG and worker pool
    pub fn run(&self, options: &RunOptions) -> Result<InversionResult> {
        options.validate()?;

        let mode = match options.policy {
            Policy::MultiObjective => ObjectiveMode::Multi,
            Policy::Standard | Policy::Adaptive => ObjectiveMode::Single,
        };
        let objective = Objective::new(
            &self.observations,
            self.scenario.receptors().len(),
            options.error_metric,
            mode,
        )?;

        info!(
            policy = %options.policy,
            population = options.population_size,
            max_generations = options.max_generations,
            seed = options.seed,
            readings = objective.term_count(),
            "starting inversion"
        );

        let cache = Arc::new(EvaluationCache::new());
        let evaluator = ParallelEvaluator::new(
            options.workers,
            Arc::clone(&self.model),
            Arc::new(objective),
            Arc::clone(&self.scenario),
            Arc::clone(&cache),
            options.fingerprint_decimals,
        )?;
        let rng = InversionRng::seed_from_u64(options.seed);
        let bounds = *self.scenario.bounds();

        let outcome = GeneticOptimizer::new(
            options,
            bounds,
            &evaluator,
            strategy::for_options(options),
            rng,
            self.progress.clone(),
        )
        .run()?;

        let (best, uncertainty, hypervolume) = match options.policy {
            Policy::MultiObjective => {
                let front = pareto::first_front(&outcome.population.members);
                let uncertainty = UncertaintyEstimate::from_members(&front, &bounds);
                let hv = pareto::hypervolume_2d(&front, HYPERVOLUME_REFERENCE);
                (BestEstimate::ParetoFront(front), uncertainty, Some(hv))
            }
            Policy::Standard | Policy::Adaptive => {
                let members = &outcome.population.members;
                let quartile = (members.len() / 4).max(2).min(members.len());
                let uncertainty = UncertaintyEstimate::from_members(&members[..quartile], &bounds);
                (BestEstimate::Single(outcome.best.clone()), uncertainty, None)
            }
        };

        let representative = best.representative().unwrap_or(&outcome.best);
        let best_fitness = representative.objectives().to_vec();
        let validation = self
            .ground_truth
            .as_ref()
            .map(|truth| ValidationMetrics::compute(representative.candidate.source(), truth));

        let cache = cache.stats();
        info!(
            policy = %options.policy,
            termination = %outcome.termination,
            generations = outcome.generations,
            best = best_fitness.first().copied().unwrap_or(f64::NAN),
            evaluations = cache.computations,
            hit_rate = cache.hit_rate(),
            "inversion finished"
        );

        Ok(InversionResult {
            policy: options.policy,
            best,
            best_fitness,
            termination: outcome.termination,
            generations: outcome.generations,
            history: outcome.history,
            uncertainty,
            validation,
            cache,
            hypervolume,
        })
    }

    /// Run each option set in parallel; runs share no mutable state
    pub fn compare(&self, runs: &[RunOptions]) -> Result<ComparisonSummary> {
        let results: Vec<PolicyRun> = runs
            .par_iter()
            .map(|options| -> Result<PolicyRun> {
                let started = Instant::now();
                let result = self.run(options)?;
                Ok(PolicyRun {
                    elapsed: started.elapsed(),
                    result,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ComparisonSummary::from_runs(results))
    }
}
