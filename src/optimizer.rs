//! Genetic optimizer: one generational loop shared by every policy
//!
//! ```text
//! INITIALIZE -> EVALUATE -> (CHECK_TERMINATION -> SELECT -> RECOMBINE
//!            -> MUTATE -> EVALUATE)* -> FINALIZE
//! ```
//!
//! The loop is synchronous; only EVALUATE fans out to the worker pool and it
//! returns once the whole brood is scored.

use crate::convergence::{ConvergenceTracker, GenerationRecord, TerminationReason};
use crate::error::{InversionError, Result};
use crate::evaluator::ParallelEvaluator;
use crate::operators::{gaussian_mutation, InversionRng};
use crate::options::RunOptions;
use crate::population::{Candidate, EvaluatedCandidate, Population};
use crate::scenario::SearchBounds;
use crate::strategy::SelectionStrategy;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, trace, warn};

/// Optimizer state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialize,
    Evaluate,
    CheckTermination,
    Select,
    Recombine,
    Mutate,
    Finalize,
}

/// What the optimizer hands back to the driver
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    /// Final population, ranked best-first by the strategy
    pub population: Arc<Population>,
    /// Best candidate seen in any generation
    pub best: EvaluatedCandidate,
    pub termination: TerminationReason,
    /// Generations run after the initial population
    pub generations: usize,
    pub history: Vec<GenerationRecord>,
}

pub struct GeneticOptimizer<'a> {
    options: &'a RunOptions,
    bounds: SearchBounds,
    evaluator: &'a ParallelEvaluator,
    strategy: Box<dyn SelectionStrategy>,
    rng: InversionRng,
    tracker: ConvergenceTracker,
    phase: Phase,
}

impl<'a> GeneticOptimizer<'a> {
    pub fn new(
        options: &'a RunOptions,
        bounds: SearchBounds,
        evaluator: &'a ParallelEvaluator,
        strategy: Box<dyn SelectionStrategy>,
        rng: InversionRng,
        progress: Option<Sender<GenerationRecord>>,
    ) -> Self {
        let tracker = ConvergenceTracker::new(strategy.policy(), options.retain_populations, progress);
        Self {
            options,
            bounds,
            evaluator,
            strategy,
            rng,
            tracker,
            phase: Phase::Initialize,
        }
    }

    fn enter(&mut self, phase: Phase, generation: usize) {
        trace!(?phase, generation, "phase transition");
        self.phase = phase;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run to termination
    pub fn run(mut self) -> Result<OptimizationOutcome> {
        let started = Instant::now();
        let n = self.options.population_size;

        self.enter(Phase::Initialize, 0);
        let initial = self.options.initialization.sample(&self.bounds, n, &mut self.rng);

        self.enter(Phase::Evaluate, 0);
        let mut members = self.evaluator.evaluate(initial)?;
        self.strategy.rank(&mut members);
        let mut population = Arc::new(Population::new(0, members));
        let rate = self.strategy.current_mutation_rate();
        self.tracker
            .record(&population, &self.bounds, rate, self.evaluator.forward_evaluations());

        let termination = loop {
            let generation = population.generation;
            self.enter(Phase::CheckTermination, generation);
            if let Some(reason) = self.tracker.check(self.options, started.elapsed()) {
                break reason;
            }

            let context = self.tracker.context();
            let rate = self.strategy.mutation_rate(&context);
            let offspring = self.breed(&population.members, rate, generation + 1);

            self.enter(Phase::Evaluate, generation + 1);
            let offspring = self.evaluator.evaluate(offspring)?;

            let mut next = self.strategy.survivors(&population.members, offspring, n);
            self.strategy.rank(&mut next);
            population = Arc::new(Population::new(generation + 1, next));
            self.tracker
                .record(&population, &self.bounds, rate, self.evaluator.forward_evaluations());
        };

        self.enter(Phase::Finalize, population.generation);
        match termination {
            TerminationReason::Timeout => warn!(
                generation = population.generation,
                best = self.tracker.best_so_far(),
                "time limit reached, returning best so far"
            ),
            reason => info!(
                %reason,
                generation = population.generation,
                best = self.tracker.best_so_far(),
                "optimizer finished"
            ),
        }

        let best = match self.tracker.best() {
            Some(best) => best.clone(),
            None => population
                .best()
                .cloned()
                .ok_or_else(|| InversionError::configuration("empty population"))?,
        };

        Ok(OptimizationOutcome {
            generations: population.generation,
            population,
            best,
            termination,
            history: self.tracker.into_history(),
        })
    }

    /// SELECT, RECOMBINE and MUTATE one brood
    fn breed(&mut self, ranked: &[EvaluatedCandidate], rate: f64, generation: usize) -> Vec<Candidate> {
        let count = self.strategy.offspring_count(ranked.len());

        self.enter(Phase::Select, generation);
        let mut pairs = Vec::with_capacity(count.div_ceil(2));
        for _ in 0..count.div_ceil(2) {
            let a = self.strategy.select(ranked, &mut self.rng);
            let b = self.strategy.select(ranked, &mut self.rng);
            pairs.push((ranked[a].candidate, ranked[b].candidate));
        }

        self.enter(Phase::Recombine, generation);
        let mut children = Vec::with_capacity(count + 1);
        for (a, b) in &pairs {
            let (c1, c2) = self.options.crossover.apply(a, b, &self.bounds, &mut self.rng);
            children.push(c1);
            children.push(c2);
        }
        children.truncate(count);

        self.enter(Phase::Mutate, generation);
        children
            .iter()
            .map(|c| {
                gaussian_mutation(
                    c,
                    &self.bounds,
                    rate,
                    self.options.gene_mutation_probability,
                    &mut self.rng,
                )
            })
            .collect()
    }
}
