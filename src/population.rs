//! Candidates, evaluations and populations

use crate::cache::Fingerprint;
use crate::scenario::{SearchBounds, Source};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

/// Fitness assigned to every objective of a candidate the forward model rejects
pub const PENALTY_FITNESS: f64 = 1e12;

/// Ceiling of every scored objective; keeps penalized candidates strictly last
pub const MAX_SCORED_FITNESS: f64 = PENALTY_FITNESS / 10.0;

/// Source hypothesis that always lies inside the search bounds.
///
/// The only way to build one is through a clamping constructor, so no code
/// path can hold an out-of-bounds candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Candidate {
    source: Source,
}

impl Candidate {
    /// Number of search dimensions
    pub const DIMENSIONS: usize = 4;

    /// Clamp `source` into `bounds`
    pub fn new(source: Source, bounds: &SearchBounds) -> Self {
        Self::from_genes(source.genes(), bounds)
    }

    /// Clamp a gene vector `[x, y, height, emission_rate]` into `bounds`
    pub fn from_genes(genes: [f64; 4], bounds: &SearchBounds) -> Self {
        let ranges = bounds.ranges();
        let mut clamped = [0.0; 4];
        for (i, (value, range)) in genes.iter().zip(ranges.iter()).enumerate() {
            clamped[i] = range.clamp(*value);
        }
        Self {
            source: Source::from_genes(clamped),
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn genes(&self) -> [f64; 4] {
        self.source.genes()
    }

    pub fn within(&self, bounds: &SearchBounds) -> bool {
        bounds.contains(&self.source)
    }
}

/// Outcome of scoring one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum EvaluationStatus {
    Scored,
    /// Forward model rejected the inputs; carries the domain error message
    Penalized(String),
}

/// Cached result of one forward-model run plus objective scoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub fingerprint: Fingerprint,
    /// Objective vector; entry 0 is the scalar fitness
    pub objectives: Vec<f64>,
    /// Predicted concentration at every receptor [μg/m³]
    pub predictions: Vec<f64>,
    pub status: EvaluationStatus,
}

impl Evaluation {
    /// Objectives above `MAX_SCORED_FITNESS` are capped there
    pub fn scored(fingerprint: Fingerprint, objectives: Vec<f64>, predictions: Vec<f64>) -> Self {
        Self {
            fingerprint,
            objectives: objectives.into_iter().map(|f| f.min(MAX_SCORED_FITNESS)).collect(),
            predictions,
            status: EvaluationStatus::Scored,
        }
    }

    /// Evaluation with every objective at `PENALTY_FITNESS`
    pub fn penalized(fingerprint: Fingerprint, dimensions: usize, reason: impl Into<String>) -> Self {
        Self {
            fingerprint,
            objectives: vec![PENALTY_FITNESS; dimensions.max(1)],
            predictions: Vec::new(),
            status: EvaluationStatus::Penalized(reason.into()),
        }
    }

    /// Scalar fitness (lower is better)
    pub fn fitness(&self) -> f64 {
        self.objectives.first().copied().unwrap_or(PENALTY_FITNESS)
    }

    pub fn is_penalized(&self) -> bool {
        matches!(self.status, EvaluationStatus::Penalized(_))
    }
}

/// Population member: candidate, shared evaluation and Pareto bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedCandidate {
    pub candidate: Candidate,
    pub evaluation: Arc<Evaluation>,
    /// Pareto rank (0 = non-dominated front); position in single-objective ranking
    pub rank: usize,
    pub crowding_distance: f64,
}

impl EvaluatedCandidate {
    pub fn new(candidate: Candidate, evaluation: Arc<Evaluation>) -> Self {
        Self {
            candidate,
            evaluation,
            rank: usize::MAX,
            crowding_distance: 0.0,
        }
    }

    pub fn fitness(&self) -> f64 {
        self.evaluation.fitness()
    }

    pub fn objectives(&self) -> &[f64] {
        &self.evaluation.objectives
    }

    /// Order by scalar fitness, best first
    pub fn cmp_fitness(&self, other: &Self) -> Ordering {
        self.fitness().total_cmp(&other.fitness())
    }
}

/// One generation's members, replaced wholesale each generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Population {
    pub generation: usize,
    pub members: Vec<EvaluatedCandidate>,
}

impl Population {
    pub fn new(generation: usize, members: Vec<EvaluatedCandidate>) -> Self {
        Self { generation, members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member with the lowest scalar fitness
    pub fn best(&self) -> Option<&EvaluatedCandidate> {
        self.members.iter().min_by(|a, b| a.cmp_fitness(b))
    }

    pub fn mean_fitness(&self) -> f64 {
        if self.members.is_empty() {
            return f64::NAN;
        }
        self.members.iter().map(|m| m.fitness()).sum::<f64>() / self.members.len() as f64
    }
}
