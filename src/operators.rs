//! Variation operators: initialization, crossover, mutation, tournament
//!
//! All operators draw from the run's explicit RNG handle and re-clamp their
//! output through `Candidate`, so nothing leaves the search bounds.

use crate::error::{InversionError, Result};
use crate::population::{Candidate, EvaluatedCandidate};
use crate::scenario::SearchBounds;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// RNG threaded through one run
pub type InversionRng = rand_pcg::Pcg64;

/// How the initial population is sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initialization {
    #[default]
    Uniform,
    /// One sample per stratum in every dimension
    LatinHypercube,
}

impl Initialization {
    pub fn sample(self, bounds: &SearchBounds, n: usize, rng: &mut InversionRng) -> Vec<Candidate> {
        match self {
            Self::Uniform => uniform(bounds, n, rng),
            Self::LatinHypercube => latin_hypercube(bounds, n, rng),
        }
    }
}

pub fn uniform(bounds: &SearchBounds, n: usize, rng: &mut InversionRng) -> Vec<Candidate> {
    let ranges = bounds.ranges();
    (0..n)
        .map(|_| {
            let mut genes = [0.0; 4];
            for (g, r) in genes.iter_mut().zip(ranges.iter()) {
                *g = r.lower + rng.gen::<f64>() * r.span();
            }
            Candidate::from_genes(genes, bounds)
        })
        .collect()
}

pub fn latin_hypercube(bounds: &SearchBounds, n: usize, rng: &mut InversionRng) -> Vec<Candidate> {
    let ranges = bounds.ranges();

    // Shuffled stratum indices per dimension
    let mut strata: Vec<Vec<usize>> = (0..Candidate::DIMENSIONS).map(|_| (0..n).collect()).collect();
    for dim in strata.iter_mut() {
        for i in (1..n).rev() {
            let j = rng.gen_range(0..=i);
            dim.swap(i, j);
        }
    }

    (0..n)
        .map(|i| {
            let mut genes = [0.0; 4];
            for (d, (g, r)) in genes.iter_mut().zip(ranges.iter()).enumerate() {
                let u = (strata[d][i] as f64 + rng.gen::<f64>()) / n as f64;
                *g = r.lower + u * r.span();
            }
            Candidate::from_genes(genes, bounds)
        })
        .collect()
}

/// Recombination operator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Crossover {
    /// Simulated-binary crossover with distribution index `eta`
    SimulatedBinary { eta: f64, probability: f64 },
    /// Arithmetic blend with a random weight per pair
    Blend { probability: f64 },
}

impl Default for Crossover {
    fn default() -> Self {
        Self::SimulatedBinary {
            eta: 15.0,
            probability: 0.9,
        }
    }
}

impl Crossover {
    pub fn probability(&self) -> f64 {
        match *self {
            Self::SimulatedBinary { probability, .. } | Self::Blend { probability } => probability,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let p = self.probability();
        if !(0.0..=1.0).contains(&p) {
            return Err(InversionError::configuration(format!(
                "crossover probability must lie in [0, 1] (got {})",
                p
            )));
        }
        if let Self::SimulatedBinary { eta, .. } = *self {
            if !(eta.is_finite() && eta >= 0.0) {
                return Err(InversionError::configuration(format!(
                    "crossover eta must be finite and non-negative (got {})",
                    eta
                )));
            }
        }
        Ok(())
    }

    /// Two children from two parents; parents are copied when no crossover happens
    pub fn apply(
        &self,
        a: &Candidate,
        b: &Candidate,
        bounds: &SearchBounds,
        rng: &mut InversionRng,
    ) -> (Candidate, Candidate) {
        if rng.gen::<f64>() > self.probability() {
            return (*a, *b);
        }
        match *self {
            Self::SimulatedBinary { eta, .. } => sbx(a, b, bounds, eta, rng),
            Self::Blend { .. } => blend(a, b, bounds, rng),
        }
    }
}

fn sbx(
    a: &Candidate,
    b: &Candidate,
    bounds: &SearchBounds,
    eta: f64,
    rng: &mut InversionRng,
) -> (Candidate, Candidate) {
    let ranges = bounds.ranges();
    let (pa, pb) = (a.genes(), b.genes());
    let mut c1 = pa;
    let mut c2 = pb;

    for i in 0..Candidate::DIMENSIONS {
        if rng.gen::<f64>() > 0.5 {
            continue;
        }

        let lo = ranges[i].lower;
        let y1 = pa[i].min(pb[i]);
        let y2 = pa[i].max(pb[i]);
        if (y2 - y1).abs() < 1e-12 {
            continue;
        }

        let beta = 1.0 + 2.0 * (y1 - lo) / (y2 - y1);
        let alpha = 2.0 - beta.powf(-(eta + 1.0));
        let u = rng.gen::<f64>();
        let betaq = if u <= 1.0 / alpha {
            (u * alpha).powf(1.0 / (eta + 1.0))
        } else {
            (1.0 / (2.0 - u * alpha)).powf(1.0 / (eta + 1.0))
        };

        c1[i] = 0.5 * ((y1 + y2) - betaq * (y2 - y1));
        c2[i] = 0.5 * ((y1 + y2) + betaq * (y2 - y1));
    }

    (Candidate::from_genes(c1, bounds), Candidate::from_genes(c2, bounds))
}

fn blend(a: &Candidate, b: &Candidate, bounds: &SearchBounds, rng: &mut InversionRng) -> (Candidate, Candidate) {
    let w = rng.gen::<f64>();
    let (pa, pb) = (a.genes(), b.genes());
    let mut c1 = [0.0; 4];
    let mut c2 = [0.0; 4];
    for i in 0..Candidate::DIMENSIONS {
        c1[i] = w * pa[i] + (1.0 - w) * pb[i];
        c2[i] = (1.0 - w) * pa[i] + w * pb[i];
    }
    (Candidate::from_genes(c1, bounds), Candidate::from_genes(c2, bounds))
}

/// Gaussian mutation: each gene with probability `gene_probability` gets
/// `N(0, (rate · span)²)` noise.
pub fn gaussian_mutation(
    candidate: &Candidate,
    bounds: &SearchBounds,
    rate: f64,
    gene_probability: f64,
    rng: &mut InversionRng,
) -> Candidate {
    let ranges = bounds.ranges();
    let mut genes = candidate.genes();
    for (g, r) in genes.iter_mut().zip(ranges.iter()) {
        if rng.gen::<f64>() >= gene_probability {
            continue;
        }
        let sigma = rate * r.span();
        if sigma > 0.0 {
            if let Ok(noise) = Normal::new(0.0, sigma) {
                *g += noise.sample(rng);
            }
        }
    }
    Candidate::from_genes(genes, bounds)
}

/// Tournament on a best-first ranked slice; returns the winner's index.
///
/// Because the slice is ranked, the winner is the contestant with the
/// smallest index.
pub fn tournament(ranked: &[EvaluatedCandidate], size: usize, rng: &mut InversionRng) -> usize {
    let n = ranked.len();
    if n == 0 {
        return 0;
    }
    (0..size.max(1))
        .map(|_| rng.gen_range(0..n))
        .min()
        .unwrap_or(0)
}
