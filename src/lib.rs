//! plumetrace: emission source inversion with genetic optimizers
//!
//! A Gaussian-plume forward model is wrapped by a genetic optimizer that
//! searches `(x, y, height, emission_rate)` for the source that best explains
//! a set of sensor readings. Three policies share one generational loop:
//!
//! - **standard**: fixed mutation rate, tournament selection, elitism
//! - **adaptive**: mutation pressure reacts to diversity and stagnation
//! - **multi_objective**: NSGA-II ranking, the full Pareto front is returned
//!
//! Evaluations are memoised per run in a single-flight cache and scored on a
//! bounded rayon pool.
//!
//! ```no_run
//! use plumetrace::{
//!     GaussianPlume, InversionDriver, Meteorology, RunOptions, ScenarioConfig, SearchBounds,
//!     Source, SyntheticNetwork, InversionRng,
//! };
//! use rand::SeedableRng;
//!
//! let met = Meteorology::default();
//! let network = SyntheticNetwork::default();
//! let truth = Source::new(150.0, 200.0, 25.0, 2.5);
//! let mut rng = InversionRng::seed_from_u64(7);
//! let (receptors, observations) = network.observe(&GaussianPlume::default(), &truth, &met, &mut rng)?;
//! let bounds = SearchBounds::around_receptors(&receptors);
//!
//! let scenario = ScenarioConfig::new(met, receptors, bounds)?;
//! let result = InversionDriver::new(scenario, observations)
//!     .with_ground_truth(truth)
//!     .run(&RunOptions::default())?;
//! println!("{:?}", result.estimate());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cache;
pub mod comparison;
pub mod config;
pub mod convergence;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod io;
pub mod objective;
pub mod operators;
pub mod optimizer;
pub mod options;
pub mod pareto;
pub mod plume;
pub mod population;
pub mod scenario;
pub mod strategy;

pub use cache::{CacheStats, CanonicalKey, EvaluationCache, Fingerprint};
pub use comparison::{ComparisonEntry, ComparisonSummary, PolicyRun};
pub use convergence::{GenerationRecord, TerminationReason};
pub use driver::{
    BestEstimate, InversionDriver, InversionResult, ParameterUncertainty, UncertaintyEstimate,
    ValidationMetrics,
};
pub use error::{DomainError, InversionError, Result};
pub use evaluator::ParallelEvaluator;
pub use objective::{ErrorMetric, Objective, ObjectiveMode};
pub use operators::{Crossover, Initialization, InversionRng};
pub use optimizer::{GeneticOptimizer, OptimizationOutcome, Phase};
pub use options::{AdaptiveSettings, Policy, RunOptions};
pub use plume::{ForwardModel, GaussianPlume, CONCENTRATION_FLOOR};
pub use population::{
    Candidate, EvaluatedCandidate, Evaluation, EvaluationStatus, Population, MAX_SCORED_FITNESS,
    PENALTY_FITNESS,
};
pub use scenario::{
    Meteorology, ParamRange, Receptor, ScenarioConfig, SearchBounds, SensorObservations, SensorReading,
    Source, StabilityClass, SyntheticNetwork,
};
pub use strategy::{GenerationContext, SelectionStrategy};

#[cfg(test)]
mod tests;
