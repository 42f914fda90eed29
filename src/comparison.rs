//! Ranking of policy runs on the same scenario

use crate::driver::InversionResult;
use crate::options::Policy;
use serde::Serialize;
use std::time::Duration;

/// One run of a comparison together with its wall-clock time
#[derive(Debug, Clone)]
pub struct PolicyRun {
    pub result: InversionResult,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonEntry {
    pub policy: Policy,
    pub best_fitness: f64,
    pub position_error: Option<f64>,
    pub emission_error: Option<f64>,
    pub elapsed_seconds: f64,
    pub generations: usize,
    pub evaluations: u64,
    /// Lower is better
    pub score: f64,
}

/// Runs ordered best-first by composite score.
///
/// With ground truth the score is `position_error [m] + emission_error [%]
/// + elapsed minutes`; without it the score is the best fitness.
#[derive(Debug, Clone)]
pub struct ComparisonSummary {
    pub entries: Vec<ComparisonEntry>,
    pub runs: Vec<PolicyRun>,
}

impl ComparisonSummary {
    pub fn from_runs(runs: Vec<PolicyRun>) -> Self {
        let mut entries: Vec<ComparisonEntry> = runs
            .iter()
            .map(|run| {
                let r = &run.result;
                let best_fitness = r.best_fitness.first().copied().unwrap_or(f64::INFINITY);
                let elapsed_seconds = run.elapsed.as_secs_f64();
                let score = match &r.validation {
                    Some(v) => v.position_error + v.emission_error + elapsed_seconds / 60.0,
                    None => best_fitness,
                };
                ComparisonEntry {
                    policy: r.policy,
                    best_fitness,
                    position_error: r.validation.map(|v| v.position_error),
                    emission_error: r.validation.map(|v| v.emission_error),
                    elapsed_seconds,
                    generations: r.generations,
                    evaluations: r.cache.computations,
                    score,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.score.total_cmp(&b.score));

        Self { entries, runs }
    }

    /// Policy with the lowest score
    pub fn best_policy(&self) -> Option<Policy> {
        self.entries.first().map(|e| e.policy)
    }

    pub fn result(&self, policy: Policy) -> Option<&InversionResult> {
        self.runs.iter().map(|r| &r.result).find(|r| r.policy == policy)
    }
}
