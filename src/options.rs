//! Run options and policy presets

use crate::cache::MAX_FINGERPRINT_DECIMALS;
use crate::error::{InversionError, Result};
use crate::objective::ErrorMetric;
use crate::operators::{Crossover, Initialization};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Optimizer policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Fixed mutation rate, elitism, tournament selection
    #[default]
    Standard,
    /// Mutation rate and selection pressure react to diversity and stagnation
    Adaptive,
    /// NSGA-II ranking on the objective vector
    MultiObjective,
}

impl Policy {
    pub const ALL: [Policy; 3] = [Policy::Standard, Policy::Adaptive, Policy::MultiObjective];

    pub fn name(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Adaptive => "adaptive",
            Self::MultiObjective => "multi_objective",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Policy {
    type Err = InversionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(Self::Standard),
            "adaptive" => Ok(Self::Adaptive),
            "multi_objective" | "multi" | "nsga2" => Ok(Self::MultiObjective),
            other => Err(InversionError::configuration(format!(
                "unknown policy '{}' (use standard, adaptive or multi_objective)",
                other
            ))),
        }
    }
}

/// Parameters of the adaptive mutation schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    /// Diversity below which the rate is raised
    pub diversity_threshold: f64,
    /// Multiplier applied when diversity is low or the search stalls
    pub increase_factor: f64,
    /// Multiplier applied while the best keeps improving
    pub decay_factor: f64,
    pub min_rate: f64,
    pub max_rate: f64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            diversity_threshold: 0.05,
            increase_factor: 1.5,
            decay_factor: 0.95,
            min_rate: 0.01,
            max_rate: 0.5,
        }
    }
}

/// Everything that parameterises one optimizer run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub policy: Policy,
    pub population_size: usize,
    /// Generations after the initial population
    pub max_generations: usize,
    /// Generations without improvement considered a stall
    pub stagnation_window: usize,
    /// Minimum best-so-far improvement over the window
    pub epsilon: f64,
    /// Stop once the best fitness reaches this value
    pub target_fitness: Option<f64>,
    pub seed: u64,
    /// Evaluation threads; 0 uses the rayon default
    pub workers: usize,
    /// Parents copied unchanged into the next generation (standard and adaptive)
    pub elite_count: usize,
    pub tournament_size: usize,
    pub crossover: Crossover,
    /// Mutation standard deviation as a fraction of each parameter's span
    pub base_mutation_rate: f64,
    pub gene_mutation_probability: f64,
    pub adaptive: AdaptiveSettings,
    pub initialization: Initialization,
    pub error_metric: ErrorMetric,
    /// Rounding applied to parameters before fingerprinting
    pub fingerprint_decimals: u32,
    /// Checked between generations
    pub time_limit: Option<Duration>,
    /// Keep every generation's population in the history
    pub retain_populations: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            policy: Policy::Standard,
            population_size: 60,
            max_generations: 200,
            stagnation_window: 30,
            epsilon: 1e-9,
            target_fitness: None,
            seed: 42,
            workers: 0,
            elite_count: 2,
            tournament_size: 3,
            crossover: Crossover::default(),
            base_mutation_rate: 0.1,
            gene_mutation_probability: 0.25,
            adaptive: AdaptiveSettings::default(),
            initialization: Initialization::Uniform,
            error_metric: ErrorMetric::Squared,
            fingerprint_decimals: 6,
            time_limit: None,
            retain_populations: false,
        }
    }
}

impl RunOptions {
    /// Defaults tuned per policy.
    ///
    /// Adaptive watches a longer stagnation window and reacts to diversity
    /// below 0.1. Multi-objective trades generations for a 1.5× larger
    /// population and uses a diversity threshold of 0.15.
    pub fn for_policy(policy: Policy) -> Self {
        let mut options = Self {
            policy,
            ..Self::default()
        };
        match policy {
            Policy::Standard => {}
            Policy::Adaptive => {
                options.adaptive.diversity_threshold = 0.1;
                options.stagnation_window = 50;
            }
            Policy::MultiObjective => {
                options.population_size = (options.population_size as f64 * 1.5).round() as usize;
                options.max_generations = (options.max_generations as f64 * 0.8).round() as usize;
                options.adaptive.diversity_threshold = 0.15;
            }
        }
        options
    }

    /// Same options under another policy
    pub fn with_policy(&self, policy: Policy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(InversionError::configuration(msg));

        if self.population_size < 2 {
            return fail(format!("population_size must be at least 2 (got {})", self.population_size));
        }
        if self.max_generations == 0 {
            return fail("max_generations must be positive".to_string());
        }
        if self.policy != Policy::MultiObjective && self.elite_count >= self.population_size {
            return fail(format!(
                "elite_count {} must be smaller than population_size {}",
                self.elite_count, self.population_size
            ));
        }
        if self.tournament_size == 0 {
            return fail("tournament_size must be positive".to_string());
        }
        if self.stagnation_window == 0 {
            return fail("stagnation_window must be positive".to_string());
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return fail(format!("epsilon must be finite and non-negative (got {})", self.epsilon));
        }
        if let Some(target) = self.target_fitness {
            if target.is_nan() {
                return fail("target_fitness must not be NaN".to_string());
            }
        }
        if !(self.base_mutation_rate.is_finite() && self.base_mutation_rate >= 0.0) {
            return fail(format!(
                "base_mutation_rate must be finite and non-negative (got {})",
                self.base_mutation_rate
            ));
        }
        if !(0.0..=1.0).contains(&self.gene_mutation_probability) {
            return fail(format!(
                "gene_mutation_probability must lie in [0, 1] (got {})",
                self.gene_mutation_probability
            ));
        }
        if self.fingerprint_decimals > MAX_FINGERPRINT_DECIMALS {
            return fail(format!(
                "fingerprint_decimals must not exceed {} (got {})",
                MAX_FINGERPRINT_DECIMALS, self.fingerprint_decimals
            ));
        }
        self.crossover.validate()?;

        let a = &self.adaptive;
        if !(a.diversity_threshold.is_finite() && a.diversity_threshold >= 0.0) {
            return fail("adaptive.diversity_threshold must be finite and non-negative".to_string());
        }
        if !(a.increase_factor.is_finite() && a.increase_factor >= 1.0) {
            return fail(format!("adaptive.increase_factor must be >= 1 (got {})", a.increase_factor));
        }
        if !(a.decay_factor > 0.0 && a.decay_factor <= 1.0) {
            return fail(format!("adaptive.decay_factor must lie in (0, 1] (got {})", a.decay_factor));
        }
        if !(a.min_rate.is_finite() && a.max_rate.is_finite() && 0.0 <= a.min_rate && a.min_rate <= a.max_rate) {
            return fail(format!(
                "adaptive rates must satisfy 0 <= min_rate <= max_rate (got {} and {})",
                a.min_rate, a.max_rate
            ));
        }
        Ok(())
    }
}
