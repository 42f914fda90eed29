//! Mismatch between predicted and observed concentrations

use crate::error::{InversionError, Result};
use crate::scenario::SensorObservations;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lower bound of normalising denominators
const DENOMINATOR_FLOOR: f64 = 1e-12;

/// Offset added to |observed| in the relative metric [μg/m³]
const RELATIVE_OFFSET: f64 = 1e-3;

/// Primary error metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMetric {
    /// `Σ w (p - o)² / Σ w o²`
    #[default]
    Squared,
    /// `Σ w ((p - o) / (|o| + 1e-3))² / Σ w`
    Relative,
}

impl fmt::Display for ErrorMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Squared => write!(f, "squared"),
            Self::Relative => write!(f, "relative"),
        }
    }
}

impl FromStr for ErrorMetric {
    type Err = InversionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "squared" => Ok(Self::Squared),
            "relative" => Ok(Self::Relative),
            other => Err(InversionError::configuration(format!(
                "unknown error metric '{}' (use squared or relative)",
                other
            ))),
        }
    }
}

/// Scalar fitness or objective vector for Pareto ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveMode {
    Single,
    /// `[primary metric, normalised worst-case residual]`
    Multi,
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    sensor: usize,
    observed: f64,
    weight: f64,
}

/// Objective built once per run from the usable readings
#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    terms: Vec<Term>,
    metric: ErrorMetric,
    mode: ObjectiveMode,
    squared_norm: f64,
    weight_sum: f64,
    max_observed: f64,
}

impl Objective {
    /// Fails when no reading is usable or a reading addresses a sensor
    /// outside the `receptor_count`-long layout.
    pub fn new(
        observations: &SensorObservations,
        receptor_count: usize,
        metric: ErrorMetric,
        mode: ObjectiveMode,
    ) -> Result<Self> {
        let mut terms = Vec::with_capacity(observations.len());
        for reading in observations.readings() {
            if reading.sensor >= receptor_count {
                return Err(InversionError::configuration(format!(
                    "reading refers to sensor {} but the layout has {} receptors",
                    reading.sensor, receptor_count
                )));
            }
            if let Some(observed) = reading.usable() {
                terms.push(Term {
                    sensor: reading.sensor,
                    observed,
                    weight: reading.weight(),
                });
            }
        }

        if terms.is_empty() {
            return Err(InversionError::configuration(
                "no usable sensor observations",
            ));
        }

        let squared_norm = terms.iter().map(|t| t.weight * t.observed * t.observed).sum();
        let weight_sum = terms.iter().map(|t| t.weight).sum();
        let max_observed = terms.iter().map(|t| t.observed).fold(f64::NEG_INFINITY, f64::max);

        Ok(Self {
            terms,
            metric,
            mode,
            squared_norm,
            weight_sum,
            max_observed,
        })
    }

    pub fn mode(&self) -> ObjectiveMode {
        self.mode
    }

    pub fn metric(&self) -> ErrorMetric {
        self.metric
    }

    /// Length of the vector returned by `score`
    pub fn dimensions(&self) -> usize {
        match self.mode {
            ObjectiveMode::Single => 1,
            ObjectiveMode::Multi => 2,
        }
    }

    /// Readings that enter the objective
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Score a full prediction vector (one value per receptor)
    pub fn score(&self, predictions: &[f64]) -> Vec<f64> {
        let primary = match self.metric {
            ErrorMetric::Squared => {
                let sse: f64 = self
                    .terms
                    .iter()
                    .map(|t| {
                        let r = predictions[t.sensor] - t.observed;
                        t.weight * r * r
                    })
                    .sum();
                sse / self.squared_norm.max(DENOMINATOR_FLOOR)
            }
            ErrorMetric::Relative => {
                let sum: f64 = self
                    .terms
                    .iter()
                    .map(|t| {
                        let r = (predictions[t.sensor] - t.observed) / (t.observed.abs() + RELATIVE_OFFSET);
                        t.weight * r * r
                    })
                    .sum();
                sum / self.weight_sum.max(DENOMINATOR_FLOOR)
            }
        };

        match self.mode {
            ObjectiveMode::Single => vec![primary],
            ObjectiveMode::Multi => {
                let worst = self
                    .terms
                    .iter()
                    .map(|t| (predictions[t.sensor] - t.observed).abs())
                    .fold(0.0, f64::max);
                vec![primary, worst / self.max_observed.max(DENOMINATOR_FLOOR)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::SensorReading;

    fn observations() -> SensorObservations {
        SensorObservations::new(vec![
            SensorReading::new(0, 2.0),
            SensorReading::new(1, 4.0).with_uncertainty(1.0),
            SensorReading::missing(2),
            SensorReading::new(3, 100.0).flagged(),
        ])
    }

    #[test]
    fn test_perfect_prediction_scores_zero() {
        let obj = Objective::new(&observations(), 4, ErrorMetric::Squared, ObjectiveMode::Multi).unwrap();
        assert_eq!(obj.term_count(), 2);
        // Excluded sensors never count, whatever is predicted there
        assert_eq!(obj.score(&[2.0, 4.0, 55.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_squared_metric() {
        let obj = Objective::new(&observations(), 4, ErrorMetric::Squared, ObjectiveMode::Single).unwrap();
        // w = [1, 0.5]; sse = 1*1 + 0.5*4 = 3; norm = 4 + 8 = 12
        let f = obj.score(&[3.0, 2.0, 0.0, 0.0]);
        approx::assert_relative_eq!(f[0], 0.25, max_relative = 1e-12);
    }

    #[test]
    fn test_relative_metric() {
        let readings = SensorObservations::new(vec![SensorReading::new(0, 1.0)]);
        let obj = Objective::new(&readings, 1, ErrorMetric::Relative, ObjectiveMode::Single).unwrap();
        let f = obj.score(&[2.0]);
        approx::assert_relative_eq!(f[0], (1.0f64 / 1.001).powi(2), max_relative = 1e-12);
    }

    #[test]
    fn test_worst_case_residual() {
        let obj = Objective::new(&observations(), 4, ErrorMetric::Squared, ObjectiveMode::Multi).unwrap();
        let f = obj.score(&[2.0, 6.0, 0.0, 0.0]);
        approx::assert_relative_eq!(f[1], 0.5, max_relative = 1e-12);
    }

    #[test]
    fn test_rejects_empty_and_out_of_range() {
        let empty = SensorObservations::default();
        assert!(Objective::new(&empty, 4, ErrorMetric::Squared, ObjectiveMode::Single)
            .unwrap_err()
            .is_configuration());

        let only_invalid = SensorObservations::new(vec![SensorReading::missing(0)]);
        assert!(Objective::new(&only_invalid, 4, ErrorMetric::Squared, ObjectiveMode::Single)
            .unwrap_err()
            .is_configuration());

        let stray = SensorObservations::new(vec![SensorReading::new(9, 1.0)]);
        assert!(Objective::new(&stray, 4, ErrorMetric::Squared, ObjectiveMode::Single)
            .unwrap_err()
            .is_configuration());
    }
}
