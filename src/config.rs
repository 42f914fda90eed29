//! TOML scenario files
//!
//! ```toml
//! [scenario]
//! name = "stack-leak"
//!
//! [meteorology]
//! wind_speed = 3.5
//! wind_direction = 225.0
//! solar_radiation = 500.0
//!
//! [[sensors]]
//! id = "S1"
//! x = -100.0
//! y = -100.0
//! z = 2.0
//! concentration = 12.4
//!
//! [run]
//! policy = "adaptive"
//! population_size = 80
//! ```
//!
//! `[bounds]` is optional (derived from the layout when absent). A
//! `[synthetic]` grid replaces `[[sensors]]` and needs a `[truth]` source.

use crate::objective::ErrorMetric;
use crate::operators::{Crossover, Initialization, InversionRng};
use crate::options::{Policy, RunOptions};
use crate::plume::GaussianPlume;
use crate::scenario::{
    Meteorology, ParamRange, Receptor, ScenarioConfig, SearchBounds, SensorObservations,
    SensorReading, Source, StabilityClass, SyntheticNetwork,
};
use anyhow::{bail, Context, Result};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Root {
    #[serde(default)]
    pub scenario: ScenarioSection,
    pub meteorology: MeteorologySection,
    pub bounds: Option<BoundsSection>,
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
    pub synthetic: Option<SyntheticSection>,
    pub truth: Option<SourceSection>,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScenarioSection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeteorologySection {
    pub wind_speed: f64,
    pub wind_direction: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_humidity")]
    pub humidity: f64,
    #[serde(default = "default_pressure")]
    pub pressure: f64,
    #[serde(default)]
    pub solar_radiation: f64,
    #[serde(default)]
    pub cloud_cover: f64,
    /// Pasquill class "A".."F"; derived when absent
    pub stability: Option<StabilityClass>,
}

fn default_temperature() -> f64 {
    20.0
}
fn default_humidity() -> f64 {
    60.0
}
fn default_pressure() -> f64 {
    101_325.0
}

impl MeteorologySection {
    pub fn to_meteorology(&self) -> Meteorology {
        Meteorology {
            wind_speed: self.wind_speed,
            wind_direction: self.wind_direction,
            temperature: self.temperature,
            humidity: self.humidity,
            pressure: self.pressure,
            solar_radiation: self.solar_radiation,
            cloud_cover: self.cloud_cover,
            stability: self.stability,
        }
    }
}

/// `[lower, upper]` pairs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoundsSection {
    pub x: [f64; 2],
    pub y: [f64; 2],
    pub height: [f64; 2],
    pub emission_rate: [f64; 2],
}

impl BoundsSection {
    pub fn to_bounds(&self) -> SearchBounds {
        let range = |p: [f64; 2]| ParamRange::new(p[0], p[1]);
        SearchBounds {
            x: range(self.x),
            y: range(self.y),
            height: range(self.height),
            emission_rate: range(self.emission_rate),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorEntry {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_sensor_height")]
    pub z: f64,
    pub concentration: Option<f64>,
    pub uncertainty: Option<f64>,
    #[serde(default = "default_true")]
    pub valid: bool,
}

fn default_sensor_height() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyntheticSection {
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    #[serde(default = "default_spacing")]
    pub spacing: f64,
    #[serde(default)]
    pub center: [f64; 2],
    #[serde(default = "default_sensor_height")]
    pub height: f64,
    #[serde(default = "default_noise")]
    pub noise_level: f64,
    pub min_concentration: Option<f64>,
    /// Seed of the measurement noise
    #[serde(default = "default_noise_seed")]
    pub seed: u64,
}

fn default_grid_size() -> usize {
    7
}
fn default_spacing() -> f64 {
    100.0
}
fn default_noise() -> f64 {
    0.1
}
fn default_noise_seed() -> u64 {
    7
}

impl SyntheticSection {
    pub fn to_network(&self) -> SyntheticNetwork {
        SyntheticNetwork {
            grid_size: self.grid_size,
            spacing: self.spacing,
            center: (self.center[0], self.center[1]),
            height: self.height,
            noise_level: self.noise_level,
            min_concentration: self.min_concentration,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceSection {
    pub x: f64,
    pub y: f64,
    pub height: f64,
    pub emission_rate: f64,
}

impl SourceSection {
    pub fn to_source(&self) -> Source {
        Source::new(self.x, self.y, self.height, self.emission_rate)
    }
}

/// Every field overrides the policy preset when present
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunSection {
    pub policy: Option<Policy>,
    pub population_size: Option<usize>,
    pub max_generations: Option<usize>,
    pub stagnation_window: Option<usize>,
    pub epsilon: Option<f64>,
    pub target_fitness: Option<f64>,
    pub seed: Option<u64>,
    pub workers: Option<usize>,
    pub elite_count: Option<usize>,
    pub tournament_size: Option<usize>,
    /// "sbx" or "blend"
    pub crossover: Option<String>,
    pub crossover_probability: Option<f64>,
    pub sbx_eta: Option<f64>,
    pub base_mutation_rate: Option<f64>,
    pub gene_mutation_probability: Option<f64>,
    pub initialization: Option<Initialization>,
    pub error_metric: Option<ErrorMetric>,
    pub fingerprint_decimals: Option<u32>,
    pub time_limit_secs: Option<f64>,
    pub retain_populations: Option<bool>,
    pub adaptive: Option<AdaptiveSection>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdaptiveSection {
    pub diversity_threshold: Option<f64>,
    pub increase_factor: Option<f64>,
    pub decay_factor: Option<f64>,
    pub min_rate: Option<f64>,
    pub max_rate: Option<f64>,
}

impl RunSection {
    /// Preset for `policy` (or the configured policy) with overrides applied
    pub fn to_options(&self, policy: Option<Policy>) -> Result<RunOptions> {
        let policy = policy.or(self.policy).unwrap_or_default();
        let mut o = RunOptions::for_policy(policy);

        macro_rules! take {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { o.$field = v; })*
            };
        }
        take!(
            population_size,
            max_generations,
            stagnation_window,
            epsilon,
            seed,
            workers,
            elite_count,
            tournament_size,
            base_mutation_rate,
            gene_mutation_probability,
            initialization,
            error_metric,
            fingerprint_decimals,
            retain_populations
        );
        o.target_fitness = self.target_fitness.or(o.target_fitness);

        if let Some(secs) = self.time_limit_secs {
            if !(secs.is_finite() && secs > 0.0) {
                bail!("run.time_limit_secs must be positive");
            }
            o.time_limit = Some(Duration::from_secs_f64(secs));
        }

        let probability = self.crossover_probability.unwrap_or(o.crossover.probability());
        o.crossover = match self.crossover.as_deref() {
            None | Some("sbx") | Some("simulated_binary") => Crossover::SimulatedBinary {
                eta: self.sbx_eta.unwrap_or(match o.crossover {
                    Crossover::SimulatedBinary { eta, .. } => eta,
                    Crossover::Blend { .. } => 15.0,
                }),
                probability,
            },
            Some("blend") | Some("arithmetic") => Crossover::Blend { probability },
            Some(other) => bail!("run.crossover must be 'sbx' or 'blend' (got '{}')", other),
        };

        if let Some(a) = &self.adaptive {
            let s = &mut o.adaptive;
            if let Some(v) = a.diversity_threshold {
                s.diversity_threshold = v;
            }
            if let Some(v) = a.increase_factor {
                s.increase_factor = v;
            }
            if let Some(v) = a.decay_factor {
                s.decay_factor = v;
            }
            if let Some(v) = a.min_rate {
                s.min_rate = v;
            }
            if let Some(v) = a.max_rate {
                s.max_rate = v;
            }
        }

        o.validate().context("invalid [run] section")?;
        Ok(o)
    }
}

/// Everything needed to start an inversion, built from a `Root`
#[derive(Debug, Clone)]
pub struct Inversion {
    pub scenario: ScenarioConfig,
    pub observations: SensorObservations,
    pub truth: Option<Source>,
}

impl Root {
    pub fn validate(&self) -> Result<()> {
        let m = &self.meteorology;
        if !(m.wind_speed.is_finite() && m.wind_speed > 0.0) {
            bail!("meteorology.wind_speed must be positive");
        }
        if !m.wind_direction.is_finite() {
            bail!("meteorology.wind_direction must be finite");
        }
        if !(0.0..=1.0).contains(&m.cloud_cover) {
            bail!("meteorology.cloud_cover must be in [0, 1]");
        }
        if m.solar_radiation < 0.0 {
            bail!("meteorology.solar_radiation must be non-negative");
        }

        match (&self.synthetic, self.sensors.is_empty()) {
            (Some(_), false) => bail!("use either [[sensors]] or [synthetic], not both"),
            (None, true) => bail!("no sensors: add [[sensors]] entries or a [synthetic] grid"),
            _ => {}
        }

        if let Some(ref syn) = self.synthetic {
            if self.truth.is_none() {
                bail!("[synthetic] requires a [truth] source");
            }
            if syn.grid_size == 0 {
                bail!("synthetic.grid_size must be >= 1");
            }
            if !(syn.spacing.is_finite() && syn.spacing > 0.0) {
                bail!("synthetic.spacing must be positive");
            }
            if !(syn.noise_level.is_finite() && syn.noise_level >= 0.0) {
                bail!("synthetic.noise_level must be non-negative");
            }
        }

        for s in &self.sensors {
            if s.z < 0.0 {
                bail!("sensor {}: z must be non-negative", s.id);
            }
            if let Some(u) = s.uncertainty {
                if u < 0.0 {
                    bail!("sensor {}: uncertainty must be non-negative", s.id);
                }
            }
        }

        if let Some(ref b) = self.bounds {
            for (name, pair) in [
                ("x", b.x),
                ("y", b.y),
                ("height", b.height),
                ("emission_rate", b.emission_rate),
            ] {
                if pair[0] > pair[1] {
                    bail!("bounds.{}: lower must be <= upper", name);
                }
            }
        }

        Ok(())
    }

    /// Build the scenario and observations; synthetic grids are simulated here
    pub fn build(&self) -> Result<Inversion> {
        let meteorology = self.meteorology.to_meteorology();
        let truth = self.truth.as_ref().map(SourceSection::to_source);

        let (receptors, observations) = match (&self.synthetic, truth) {
            (Some(syn), Some(source)) => {
                let mut rng = InversionRng::seed_from_u64(syn.seed);
                syn.to_network()
                    .observe(&GaussianPlume::default(), &source, &meteorology, &mut rng)
                    .context("simulating synthetic sensor network")?
            }
            (Some(_), None) => bail!("[synthetic] requires a [truth] source"),
            (None, _) => {
                let receptors: Vec<Receptor> = self
                    .sensors
                    .iter()
                    .map(|s| Receptor::new(s.id.clone(), s.x, s.y, s.z))
                    .collect();
                let readings = self
                    .sensors
                    .iter()
                    .enumerate()
                    .map(|(i, s)| SensorReading {
                        sensor: i,
                        concentration: s.concentration,
                        uncertainty: s.uncertainty,
                        valid: s.valid,
                    })
                    .collect();
                (receptors, SensorObservations::new(readings))
            }
        };

        let bounds = match &self.bounds {
            Some(b) => b.to_bounds(),
            None => SearchBounds::around_receptors(&receptors),
        };
        let scenario = ScenarioConfig::new(meteorology, receptors, bounds)?;

        Ok(Inversion {
            scenario,
            observations,
            truth,
        })
    }
}
