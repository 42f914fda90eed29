//! Selection strategies: the seam between the three optimizer policies
//!
//! The optimizer loop is shared; a strategy decides how a population is
//! ranked, how parents are picked, which mutation rate is used, how many
//! offspring are bred and who survives into the next generation.

use crate::operators::{tournament, InversionRng};
use crate::options::{AdaptiveSettings, Policy, RunOptions};
use crate::pareto;
use crate::population::EvaluatedCandidate;
use tracing::debug;

/// Search state handed to a strategy before breeding a generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationContext {
    /// Generation just completed
    pub generation: usize,
    pub diversity: f64,
    /// Best-so-far improved in the generation just completed
    pub improved: bool,
    /// Generations since the best-so-far last improved
    pub stagnant_generations: usize,
}

pub trait SelectionStrategy: Send {
    fn policy(&self) -> Policy;

    /// Order `members` best-first and fill in rank bookkeeping
    fn rank(&self, members: &mut Vec<EvaluatedCandidate>);

    /// Index of one parent in a ranked population
    fn select(&self, ranked: &[EvaluatedCandidate], rng: &mut InversionRng) -> usize;

    /// Rate currently in effect
    fn current_mutation_rate(&self) -> f64;

    /// Update per-generation parameters and return the rate for the next brood
    fn mutation_rate(&mut self, context: &GenerationContext) -> f64;

    /// Offspring bred per generation
    fn offspring_count(&self, population_size: usize) -> usize;

    /// Next generation from ranked parents and freshly evaluated offspring
    fn survivors(
        &self,
        parents: &[EvaluatedCandidate],
        offspring: Vec<EvaluatedCandidate>,
        population_size: usize,
    ) -> Vec<EvaluatedCandidate>;
}

/// Build the strategy for `options.policy`
pub fn for_options(options: &RunOptions) -> Box<dyn SelectionStrategy> {
    match options.policy {
        Policy::Standard => Box::new(StandardStrategy::new(options)),
        Policy::Adaptive => Box::new(AdaptiveStrategy::new(options)),
        Policy::MultiObjective => Box::new(MultiObjectiveStrategy::new(options)),
    }
}

fn rank_by_fitness(members: &mut [EvaluatedCandidate]) {
    members.sort_by(|a, b| a.cmp_fitness(b));
    for (i, m) in members.iter_mut().enumerate() {
        m.rank = i;
        m.crowding_distance = 0.0;
    }
}

fn elitist_survivors(
    parents: &[EvaluatedCandidate],
    offspring: Vec<EvaluatedCandidate>,
    elite_count: usize,
    population_size: usize,
) -> Vec<EvaluatedCandidate> {
    let mut next: Vec<EvaluatedCandidate> = parents.iter().take(elite_count).cloned().collect();
    next.extend(offspring);
    next.truncate(population_size);
    next
}

// ============================================================================
// Standard
// ============================================================================

/// Fixed rate, fixed tournament, elitism
#[derive(Debug, Clone)]
pub struct StandardStrategy {
    rate: f64,
    tournament_size: usize,
    elite_count: usize,
}

impl StandardStrategy {
    pub fn new(options: &RunOptions) -> Self {
        Self {
            rate: options.base_mutation_rate,
            tournament_size: options.tournament_size,
            elite_count: options.elite_count,
        }
    }
}

impl SelectionStrategy for StandardStrategy {
    fn policy(&self) -> Policy {
        Policy::Standard
    }

    fn rank(&self, members: &mut Vec<EvaluatedCandidate>) {
        rank_by_fitness(members);
    }

    fn select(&self, ranked: &[EvaluatedCandidate], rng: &mut InversionRng) -> usize {
        tournament(ranked, self.tournament_size, rng)
    }

    fn current_mutation_rate(&self) -> f64 {
        self.rate
    }

    fn mutation_rate(&mut self, _context: &GenerationContext) -> f64 {
        self.rate
    }

    fn offspring_count(&self, population_size: usize) -> usize {
        population_size.saturating_sub(self.elite_count)
    }

    fn survivors(
        &self,
        parents: &[EvaluatedCandidate],
        offspring: Vec<EvaluatedCandidate>,
        population_size: usize,
    ) -> Vec<EvaluatedCandidate> {
        elitist_survivors(parents, offspring, self.elite_count, population_size)
    }
}

// ============================================================================
// Adaptive
// ============================================================================

/// Elitist strategy whose mutation rate and tournament size follow the search.
///
/// Low diversity or a stall of half the stagnation window raises the rate by
/// `increase_factor` and loosens the tournament by one (never below 2).
/// While the best keeps improving the rate decays towards `min_rate` and the
/// tournament returns to its configured size.
#[derive(Debug, Clone)]
pub struct AdaptiveStrategy {
    settings: AdaptiveSettings,
    rate: f64,
    tournament_size: usize,
    base_tournament_size: usize,
    elite_count: usize,
    stall_trigger: usize,
}

impl AdaptiveStrategy {
    pub fn new(options: &RunOptions) -> Self {
        let settings = options.adaptive;
        Self {
            settings,
            rate: options
                .base_mutation_rate
                .max(settings.min_rate)
                .min(settings.max_rate),
            tournament_size: options.tournament_size,
            base_tournament_size: options.tournament_size,
            elite_count: options.elite_count,
            stall_trigger: (options.stagnation_window / 2).max(1),
        }
    }

    pub fn tournament_size(&self) -> usize {
        self.tournament_size
    }
}

impl SelectionStrategy for AdaptiveStrategy {
    fn policy(&self) -> Policy {
        Policy::Adaptive
    }

    fn rank(&self, members: &mut Vec<EvaluatedCandidate>) {
        rank_by_fitness(members);
    }

    fn select(&self, ranked: &[EvaluatedCandidate], rng: &mut InversionRng) -> usize {
        tournament(ranked, self.tournament_size, rng)
    }

    fn current_mutation_rate(&self) -> f64 {
        self.rate
    }

    fn mutation_rate(&mut self, context: &GenerationContext) -> f64 {
        let s = &self.settings;
        let low_diversity = context.diversity < s.diversity_threshold;
        let stalled = context.stagnant_generations >= self.stall_trigger;

        if low_diversity || stalled {
            self.rate = (self.rate * s.increase_factor).min(s.max_rate);
            if self.tournament_size > 2 {
                self.tournament_size -= 1;
            }
            debug!(
                generation = context.generation,
                rate = self.rate,
                tournament = self.tournament_size,
                low_diversity,
                stalled,
                "raising mutation pressure"
            );
        } else if context.improved {
            self.rate = (self.rate * s.decay_factor).max(s.min_rate);
            self.tournament_size = self.base_tournament_size;
        }
        self.rate
    }

    fn offspring_count(&self, population_size: usize) -> usize {
        population_size.saturating_sub(self.elite_count)
    }

    fn survivors(
        &self,
        parents: &[EvaluatedCandidate],
        offspring: Vec<EvaluatedCandidate>,
        population_size: usize,
    ) -> Vec<EvaluatedCandidate> {
        elitist_survivors(parents, offspring, self.elite_count, population_size)
    }
}

// ============================================================================
// Multi-objective
// ============================================================================

/// NSGA-II ranking, binary crowded tournament, environmental selection.
///
/// The mutation rate rises while diversity is below the threshold and
/// relaxes back to the base rate otherwise.
#[derive(Debug, Clone)]
pub struct MultiObjectiveStrategy {
    settings: AdaptiveSettings,
    base_rate: f64,
    rate: f64,
}

impl MultiObjectiveStrategy {
    pub fn new(options: &RunOptions) -> Self {
        Self {
            settings: options.adaptive,
            base_rate: options.base_mutation_rate,
            rate: options.base_mutation_rate,
        }
    }
}

impl SelectionStrategy for MultiObjectiveStrategy {
    fn policy(&self) -> Policy {
        Policy::MultiObjective
    }

    fn rank(&self, members: &mut Vec<EvaluatedCandidate>) {
        pareto::rank_and_sort(members);
    }

    fn select(&self, ranked: &[EvaluatedCandidate], rng: &mut InversionRng) -> usize {
        tournament(ranked, 2, rng)
    }

    fn current_mutation_rate(&self) -> f64 {
        self.rate
    }

    fn mutation_rate(&mut self, context: &GenerationContext) -> f64 {
        let s = &self.settings;
        if context.diversity < s.diversity_threshold {
            self.rate = (self.rate * s.increase_factor).min(s.max_rate.max(self.base_rate));
        } else {
            self.rate = (self.rate * s.decay_factor).max(self.base_rate);
        }
        self.rate
    }

    fn offspring_count(&self, population_size: usize) -> usize {
        population_size
    }

    fn survivors(
        &self,
        parents: &[EvaluatedCandidate],
        offspring: Vec<EvaluatedCandidate>,
        population_size: usize,
    ) -> Vec<EvaluatedCandidate> {
        let mut combined = parents.to_vec();
        combined.extend(offspring);
        pareto::environmental_selection(combined, population_size)
    }
}
