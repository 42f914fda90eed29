//! Per-generation history, diversity and termination

use crate::options::{Policy, RunOptions};
use crate::population::{EvaluatedCandidate, Population};
use crate::scenario::SearchBounds;
use crate::strategy::GenerationContext;
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Generation budget exhausted without another criterion firing
    /// (convergence failure, but a normal outcome)
    MaxGenerations,
    /// Best-so-far improved less than `epsilon` over the stagnation window
    Stagnation,
    TargetReached,
    /// Time limit exceeded after a completed generation
    Timeout,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MaxGenerations => "max_generations",
            Self::Stagnation => "stagnation",
            Self::TargetReached => "target_reached",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Summary of one completed generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRecord {
    /// Policy of the run that produced the record
    pub policy: Policy,
    /// 0 is the initial population
    pub generation: usize,
    pub best_fitness: f64,
    pub best_so_far: f64,
    pub mean_fitness: f64,
    pub diversity: f64,
    /// Rate used to breed this generation
    pub mutation_rate: f64,
    /// Cumulative forward-model evaluations
    pub evaluations: u64,
    #[serde(skip)]
    pub population: Option<Arc<Population>>,
}

/// Mean over dimensions of `std_dev(gene) / span(bound)`.
///
/// Dimensions with zero span are skipped; an empty population has zero
/// diversity.
pub fn diversity(members: &[EvaluatedCandidate], bounds: &SearchBounds) -> f64 {
    if members.len() < 2 {
        return 0.0;
    }
    let n = members.len() as f64;
    let mut total = 0.0;
    let mut dims = 0;

    for (d, range) in bounds.ranges().iter().enumerate() {
        let span = range.span();
        if span <= 0.0 {
            continue;
        }
        let mean = members.iter().map(|m| m.candidate.genes()[d]).sum::<f64>() / n;
        let var = members
            .iter()
            .map(|m| {
                let diff = m.candidate.genes()[d] - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        total += var.sqrt() / span;
        dims += 1;
    }

    if dims == 0 {
        0.0
    } else {
        total / dims as f64
    }
}

/// Append-only generation history with best-so-far bookkeeping
pub struct ConvergenceTracker {
    policy: Policy,
    records: Vec<GenerationRecord>,
    best: Option<EvaluatedCandidate>,
    improved: bool,
    stagnant_generations: usize,
    retain_populations: bool,
    progress: Option<Sender<GenerationRecord>>,
}

impl ConvergenceTracker {
    pub fn new(policy: Policy, retain_populations: bool, progress: Option<Sender<GenerationRecord>>) -> Self {
        Self {
            policy,
            records: Vec::new(),
            best: None,
            improved: false,
            stagnant_generations: 0,
            retain_populations,
            progress,
        }
    }

    /// Record a completed generation and forward it to the progress channel
    pub fn record(
        &mut self,
        population: &Arc<Population>,
        bounds: &SearchBounds,
        mutation_rate: f64,
        evaluations: u64,
    ) -> &GenerationRecord {
        let generation_best = population.best();
        let best_fitness = generation_best.map(|m| m.fitness()).unwrap_or(f64::INFINITY);

        let previous = self.best.as_ref().map(|b| b.fitness());
        self.improved = match previous {
            None => true,
            Some(prev) => best_fitness < prev,
        };
        if self.improved {
            self.best = generation_best.cloned();
            self.stagnant_generations = 0;
        } else {
            self.stagnant_generations += 1;
        }

        let record = GenerationRecord {
            policy: self.policy,
            generation: population.generation,
            best_fitness,
            best_so_far: self.best_so_far(),
            mean_fitness: population.mean_fitness(),
            diversity: diversity(&population.members, bounds),
            mutation_rate,
            evaluations,
            population: self.retain_populations.then(|| Arc::clone(population)),
        };

        debug!(
            policy = %record.policy,
            generation = record.generation,
            best = record.best_fitness,
            best_so_far = record.best_so_far,
            mean = record.mean_fitness,
            diversity = record.diversity,
            rate = record.mutation_rate,
            evaluations = record.evaluations,
            "generation complete"
        );

        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is listening
            let _ = tx.send(record.clone());
        }

        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    pub fn best_so_far(&self) -> f64 {
        self.best.as_ref().map(|b| b.fitness()).unwrap_or(f64::INFINITY)
    }

    /// Best candidate seen in any generation
    pub fn best(&self) -> Option<&EvaluatedCandidate> {
        self.best.as_ref()
    }

    pub fn stagnant_generations(&self) -> usize {
        self.stagnant_generations
    }

    pub fn records(&self) -> &[GenerationRecord] {
        &self.records
    }

    pub fn context(&self) -> GenerationContext {
        let last = self.records.last();
        GenerationContext {
            generation: last.map(|r| r.generation).unwrap_or(0),
            diversity: last.map(|r| r.diversity).unwrap_or(0.0),
            improved: self.improved,
            stagnant_generations: self.stagnant_generations,
        }
    }

    /// Termination criterion met after the latest generation, if any
    pub fn check(&self, options: &RunOptions, elapsed: Duration) -> Option<TerminationReason> {
        let last = self.records.last()?;

        if let Some(target) = options.target_fitness {
            if last.best_so_far <= target {
                return Some(TerminationReason::TargetReached);
            }
        }
        if last.generation >= options.max_generations {
            return Some(TerminationReason::MaxGenerations);
        }

        let window = options.stagnation_window;
        if last.generation >= window {
            let then = &self.records[self.records.len() - 1 - window];
            if then.best_so_far - last.best_so_far < options.epsilon {
                return Some(TerminationReason::Stagnation);
            }
        }

        if let Some(limit) = options.time_limit {
            if elapsed >= limit {
                return Some(TerminationReason::Timeout);
            }
        }
        None
    }

    pub fn into_history(self) -> Vec<GenerationRecord> {
        self.records
    }
}
