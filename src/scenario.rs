//! Scenario inputs: meteorology, sensor layout, search bounds and observations
//!
//! Everything in this module is immutable once built. `ScenarioConfig::new`
//! and `SensorObservations` validation are the only places where malformed
//! input is rejected; the optimizer assumes validated data.

use crate::error::{DomainError, InversionError, Result};
use crate::plume::ForwardModel;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reference height of the wind speed measurement [m]
pub const WIND_REFERENCE_HEIGHT: f64 = 10.0;

/// Minimum horizontal margin added around the sensor layout [m]
const AUTO_BOUNDS_MIN_MARGIN: f64 = 150.0;

/// Margin as a fraction of the larger layout extent
const AUTO_BOUNDS_MARGIN_FRACTION: f64 = 0.25;

// ============================================================================
// Meteorology
// ============================================================================

/// Pasquill-Gifford atmospheric stability class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StabilityClass {
    /// Extremely unstable
    A,
    /// Moderately unstable
    B,
    /// Slightly unstable
    C,
    /// Neutral
    D,
    /// Slightly stable
    E,
    /// Moderately stable
    F,
}

impl StabilityClass {
    /// Pasquill-Turner classification from surface wind, insolation and cloud.
    ///
    /// Daytime (solar radiation above 50 W/m²) uses the insolation columns
    /// strong (> 600), moderate (300-600) and slight (< 300). Night uses the
    /// cloud cover split at 0.5. Mixed classes (A-B, B-C, C-D) resolve to the
    /// more stable member. Overcast skies (cloud cover >= 0.875) are neutral.
    pub fn from_conditions(wind_speed: f64, solar_radiation: f64, cloud_cover: f64) -> Self {
        use StabilityClass::*;

        if cloud_cover >= 0.875 {
            return D;
        }

        if solar_radiation > 50.0 {
            let column = if solar_radiation > 600.0 {
                0
            } else if solar_radiation >= 300.0 {
                1
            } else {
                2
            };
            let row: [StabilityClass; 3] = if wind_speed < 2.0 {
                [A, B, B]
            } else if wind_speed < 3.0 {
                [B, B, C]
            } else if wind_speed < 5.0 {
                [B, C, C]
            } else {
                [C, D, D]
            };
            row[column]
        } else if wind_speed < 3.0 {
            if cloud_cover >= 0.5 {
                E
            } else {
                F
            }
        } else if wind_speed < 5.0 {
            if cloud_cover >= 0.5 {
                D
            } else {
                E
            }
        } else {
            D
        }
    }

    /// Horizontal dispersion coefficient σy [m] at downwind distance `x` [m]
    /// (Briggs, open country)
    pub fn sigma_y(self, x: f64) -> f64 {
        let a = match self {
            Self::A => 0.22,
            Self::B => 0.16,
            Self::C => 0.11,
            Self::D => 0.08,
            Self::E => 0.06,
            Self::F => 0.04,
        };
        a * x / (1.0 + 0.0001 * x).sqrt()
    }

    /// Vertical dispersion coefficient σz [m] at downwind distance `x` [m]
    /// (Briggs, open country)
    pub fn sigma_z(self, x: f64) -> f64 {
        match self {
            Self::A => 0.20 * x,
            Self::B => 0.12 * x,
            Self::C => 0.08 * x / (1.0 + 0.0002 * x).sqrt(),
            Self::D => 0.06 * x / (1.0 + 0.0015 * x).sqrt(),
            Self::E => 0.03 * x / (1.0 + 0.0003 * x),
            Self::F => 0.016 * x / (1.0 + 0.0003 * x),
        }
    }

    /// Exponent of the power-law wind profile (rural)
    pub fn wind_profile_exponent(self) -> f64 {
        match self {
            Self::A | Self::B => 0.07,
            Self::C => 0.10,
            Self::D => 0.15,
            Self::E => 0.35,
            Self::F => 0.55,
        }
    }
}

impl fmt::Display for StabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for StabilityClass {
    type Err = InversionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            "F" => Ok(Self::F),
            other => Err(InversionError::configuration(format!(
                "unknown stability class '{}' (use A-F)",
                other
            ))),
        }
    }
}

/// Meteorological state for one inversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meteorology {
    /// Wind speed at the reference height [m/s]
    pub wind_speed: f64,
    /// Direction the plume travels, degrees counter-clockwise from +x
    pub wind_direction: f64,
    /// Air temperature [°C]
    pub temperature: f64,
    /// Relative humidity [%]
    pub humidity: f64,
    /// Surface pressure [Pa]
    pub pressure: f64,
    /// Incoming solar radiation [W/m²]
    pub solar_radiation: f64,
    /// Cloud cover fraction [0, 1]
    pub cloud_cover: f64,
    /// Explicit stability class; derived from the other fields when absent
    pub stability: Option<StabilityClass>,
}

impl Default for Meteorology {
    fn default() -> Self {
        Self {
            wind_speed: 3.5,
            wind_direction: 225.0,
            temperature: 20.0,
            humidity: 60.0,
            pressure: 101_325.0,
            solar_radiation: 500.0,
            cloud_cover: 0.3,
            stability: None,
        }
    }
}

impl Meteorology {
    /// Stability class in effect
    pub fn stability_class(&self) -> StabilityClass {
        self.stability.unwrap_or_else(|| {
            StabilityClass::from_conditions(self.wind_speed, self.solar_radiation, self.cloud_cover)
        })
    }

    /// Unit vector along which the plume travels
    pub fn downwind_unit(&self) -> (f64, f64) {
        let theta = self.wind_direction.to_radians();
        (theta.cos(), theta.sin())
    }

    fn check_finite(&self) -> Result<()> {
        let fields = [
            ("wind_speed", self.wind_speed),
            ("wind_direction", self.wind_direction),
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("pressure", self.pressure),
            ("solar_radiation", self.solar_radiation),
            ("cloud_cover", self.cloud_cover),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(InversionError::configuration(format!(
                    "meteorology.{} must be finite",
                    name
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// Sensor location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receptor {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Receptor {
    pub fn new(id: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self { id: id.into(), x, y, z }
    }
}

/// Point emission source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Easting [m]
    pub x: f64,
    /// Northing [m]
    pub y: f64,
    /// Release height above ground [m]
    pub height: f64,
    /// Emission rate [g/s]
    pub emission_rate: f64,
}

impl Source {
    pub fn new(x: f64, y: f64, height: f64, emission_rate: f64) -> Self {
        Self { x, y, height, emission_rate }
    }

    /// Parameters in search-space order: [x, y, height, emission_rate]
    pub fn genes(&self) -> [f64; 4] {
        [self.x, self.y, self.height, self.emission_rate]
    }

    pub fn from_genes(genes: [f64; 4]) -> Self {
        Self::new(genes[0], genes[1], genes[2], genes[3])
    }

    /// Horizontal distance to another source [m]
    pub fn horizontal_distance(&self, other: &Source) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Closed parameter interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub lower: f64,
    pub upper: f64,
}

impl ParamRange {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn span(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Clamp into the interval; NaN maps to the lower bound
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.lower
        } else {
            value.max(self.lower).min(self.upper)
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.lower.is_finite() || !self.upper.is_finite() {
            return Err(InversionError::configuration(format!(
                "bounds.{} must be finite",
                name
            )));
        }
        if self.lower > self.upper {
            return Err(InversionError::configuration(format!(
                "bounds.{}: lower {} exceeds upper {}",
                name, self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// Search domain for each source parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub x: ParamRange,
    pub y: ParamRange,
    pub height: ParamRange,
    pub emission_rate: ParamRange,
}

impl SearchBounds {
    pub const PARAMETER_NAMES: [&'static str; 4] = ["x", "y", "height", "emission_rate"];

    /// Ranges in search-space order
    pub fn ranges(&self) -> [ParamRange; 4] {
        [self.x, self.y, self.height, self.emission_rate]
    }

    /// Derive horizontal bounds from the sensor layout.
    ///
    /// The layout extent is padded by `max(150 m, 25 % of the larger extent)`;
    /// height spans [0, 100] m and emission rate [0.001, 50] g/s.
    pub fn around_receptors(receptors: &[Receptor]) -> Self {
        let (min_x, max_x, min_y, max_y) = if receptors.is_empty() {
            (-1000.0, 1000.0, -1000.0, 1000.0)
        } else {
            receptors.iter().fold(
                (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
                |(lx, hx, ly, hy), r| (lx.min(r.x), hx.max(r.x), ly.min(r.y), hy.max(r.y)),
            )
        };
        let extent = (max_x - min_x).max(max_y - min_y).max(1.0);
        let margin = AUTO_BOUNDS_MIN_MARGIN.max(AUTO_BOUNDS_MARGIN_FRACTION * extent);

        Self {
            x: ParamRange::new(min_x - margin, max_x + margin),
            y: ParamRange::new(min_y - margin, max_y + margin),
            height: ParamRange::new(0.0, 100.0),
            emission_rate: ParamRange::new(0.001, 50.0),
        }
    }

    pub fn contains(&self, source: &Source) -> bool {
        self.ranges()
            .iter()
            .zip(source.genes())
            .all(|(range, value)| range.contains(value))
    }

    pub fn validate(&self) -> Result<()> {
        for (range, name) in self.ranges().iter().zip(Self::PARAMETER_NAMES) {
            range.validate(name)?;
        }
        Ok(())
    }
}

// ============================================================================
// Scenario
// ============================================================================

/// Immutable inputs of one inversion: weather, sensor layout, search domain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioConfig {
    meteorology: Meteorology,
    receptors: Vec<Receptor>,
    bounds: SearchBounds,
}

impl ScenarioConfig {
    /// Validate and build a scenario.
    ///
    /// Rejects an empty layout, non-finite receptor coordinates or
    /// meteorology, and malformed bounds. Wind speed and receptor heights are
    /// not range-checked here; the forward model reports them as `DomainError`
    /// per evaluation.
    pub fn new(meteorology: Meteorology, receptors: Vec<Receptor>, bounds: SearchBounds) -> Result<Self> {
        if receptors.is_empty() {
            return Err(InversionError::configuration("sensor layout is empty"));
        }
        for r in &receptors {
            if !(r.x.is_finite() && r.y.is_finite() && r.z.is_finite()) {
                return Err(InversionError::configuration(format!(
                    "receptor {} has non-finite coordinates",
                    r.id
                )));
            }
        }
        meteorology.check_finite()?;
        bounds.validate()?;

        Ok(Self { meteorology, receptors, bounds })
    }

    pub fn meteorology(&self) -> &Meteorology {
        &self.meteorology
    }

    pub fn receptors(&self) -> &[Receptor] {
        &self.receptors
    }

    pub fn bounds(&self) -> &SearchBounds {
        &self.bounds
    }
}

// ============================================================================
// Observations
// ============================================================================

/// One measured value at a layout receptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Index into the scenario's receptor layout
    pub sensor: usize,
    /// Measured concentration [μg/m³]; `None` when missing
    pub concentration: Option<f64>,
    /// Absolute measurement uncertainty [μg/m³]
    pub uncertainty: Option<f64>,
    /// False when the sensor flagged the value as invalid
    pub valid: bool,
}

impl SensorReading {
    pub fn new(sensor: usize, concentration: f64) -> Self {
        Self {
            sensor,
            concentration: Some(concentration),
            uncertainty: None,
            valid: true,
        }
    }

    pub fn with_uncertainty(mut self, uncertainty: f64) -> Self {
        self.uncertainty = Some(uncertainty);
        self
    }

    pub fn missing(sensor: usize) -> Self {
        Self {
            sensor,
            concentration: None,
            uncertainty: None,
            valid: true,
        }
    }

    pub fn flagged(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Concentration if it may enter the objective
    pub fn usable(&self) -> Option<f64> {
        match self.concentration {
            Some(c) if self.valid && c.is_finite() => Some(c),
            _ => None,
        }
    }

    /// Objective weight, `1 / (1 + uncertainty)`
    pub fn weight(&self) -> f64 {
        let u = self.uncertainty.filter(|u| u.is_finite() && *u > 0.0).unwrap_or(0.0);
        1.0 / (1.0 + u)
    }
}

/// Batch of readings for one inversion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorObservations {
    readings: Vec<SensorReading>,
}

impl SensorObservations {
    pub fn new(readings: Vec<SensorReading>) -> Self {
        Self { readings }
    }

    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Number of readings that enter the objective
    pub fn usable_count(&self) -> usize {
        self.readings.iter().filter(|r| r.usable().is_some()).count()
    }
}

// ============================================================================
// Synthetic sensor networks
// ============================================================================

/// Square sensor grid observing a known source, for validation scenarios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticNetwork {
    /// Sensors per side
    pub grid_size: usize,
    /// Distance between neighbouring sensors [m]
    pub spacing: f64,
    /// Grid centre
    pub center: (f64, f64),
    /// Sensor inlet height [m]
    pub height: f64,
    /// Relative noise standard deviation
    pub noise_level: f64,
    /// Readings below this value are dropped from the observation set
    pub min_concentration: Option<f64>,
}

impl Default for SyntheticNetwork {
    fn default() -> Self {
        Self {
            grid_size: 7,
            spacing: 100.0,
            center: (0.0, 0.0),
            height: 2.0,
            noise_level: 0.1,
            min_concentration: Some(0.1),
        }
    }
}

impl SyntheticNetwork {
    /// Sensor layout, ids `Sijj` by grid row and column
    pub fn receptors(&self) -> Vec<Receptor> {
        let half = (self.grid_size / 2) as f64;
        let mut receptors = Vec::with_capacity(self.grid_size * self.grid_size);
        for i in 0..self.grid_size {
            for j in 0..self.grid_size {
                receptors.push(Receptor::new(
                    format!("S{:02}{:02}", i, j),
                    self.center.0 + (i as f64 - half) * self.spacing,
                    self.center.1 + (j as f64 - half) * self.spacing,
                    self.height,
                ));
            }
        }
        receptors
    }

    /// Simulate readings from `source`.
    ///
    /// Noise is `N(0, (c * noise_level)²)` clamped at zero; the reading's
    /// uncertainty is `c * noise_level`.
    pub fn observe<R: Rng>(
        &self,
        model: &dyn ForwardModel,
        source: &Source,
        meteorology: &Meteorology,
        rng: &mut R,
    ) -> std::result::Result<(Vec<Receptor>, SensorObservations), DomainError> {
        let receptors = self.receptors();
        let truth = model.predict(source, &receptors, meteorology)?;

        let mut readings = Vec::with_capacity(receptors.len());
        for (index, &c) in truth.iter().enumerate() {
            let sigma = c * self.noise_level;
            let observed = if sigma > 0.0 {
                match Normal::new(0.0, sigma) {
                    Ok(noise) => (c + noise.sample(rng)).max(0.0),
                    Err(_) => c,
                }
            } else {
                c
            };

            if let Some(min) = self.min_concentration {
                if observed <= min {
                    continue;
                }
            }

            let mut reading = SensorReading::new(index, observed);
            if sigma > 0.0 {
                reading = reading.with_uncertainty(sigma);
            }
            readings.push(reading);
        }

        Ok((receptors, SensorObservations::new(readings)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stability_from_conditions() {
        assert_eq!(StabilityClass::from_conditions(3.5, 500.0, 0.3), StabilityClass::C);
        assert_eq!(StabilityClass::from_conditions(1.0, 800.0, 0.0), StabilityClass::A);
        assert_eq!(StabilityClass::from_conditions(7.0, 700.0, 0.1), StabilityClass::C);
        assert_eq!(StabilityClass::from_conditions(2.0, 0.0, 0.1), StabilityClass::F);
        assert_eq!(StabilityClass::from_conditions(4.0, 0.0, 0.7), StabilityClass::D);
        assert_eq!(StabilityClass::from_conditions(1.0, 900.0, 0.95), StabilityClass::D);
    }

    #[test]
    fn test_sigmas_grow_with_distance() {
        for class in [
            StabilityClass::A,
            StabilityClass::B,
            StabilityClass::C,
            StabilityClass::D,
            StabilityClass::E,
            StabilityClass::F,
        ] {
            assert!(class.sigma_y(500.0) > class.sigma_y(100.0));
            assert!(class.sigma_z(500.0) > class.sigma_z(100.0));
        }
        // More stable air disperses less
        assert!(StabilityClass::A.sigma_z(300.0) > StabilityClass::F.sigma_z(300.0));
    }

    #[test]
    fn test_param_range_clamp() {
        let r = ParamRange::new(0.0, 10.0);
        assert_eq!(r.clamp(-5.0), 0.0);
        assert_eq!(r.clamp(15.0), 10.0);
        assert_eq!(r.clamp(4.0), 4.0);
        assert_eq!(r.clamp(f64::NAN), 0.0);
    }

    #[test]
    fn test_scenario_rejects_malformed_bounds() {
        let receptors = vec![Receptor::new("S0", 0.0, 0.0, 2.0)];
        let mut bounds = SearchBounds::around_receptors(&receptors);
        bounds.height = ParamRange::new(50.0, 10.0);

        let err = ScenarioConfig::new(Meteorology::default(), receptors, bounds).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_scenario_rejects_empty_layout() {
        let bounds = SearchBounds::around_receptors(&[]);
        let err = ScenarioConfig::new(Meteorology::default(), vec![], bounds).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_auto_bounds_margin() {
        let receptors = vec![
            Receptor::new("a", -300.0, -300.0, 2.0),
            Receptor::new("b", 300.0, 300.0, 2.0),
        ];
        let bounds = SearchBounds::around_receptors(&receptors);
        // extent 600 m -> margin max(150, 150)
        assert_eq!(bounds.x, ParamRange::new(-450.0, 450.0));
        assert_eq!(bounds.y, ParamRange::new(-450.0, 450.0));
        assert_eq!(bounds.height, ParamRange::new(0.0, 100.0));
    }

    #[test]
    fn test_reading_usability_and_weight() {
        assert_eq!(SensorReading::new(0, 4.0).usable(), Some(4.0));
        assert_eq!(SensorReading::missing(0).usable(), None);
        assert_eq!(SensorReading::new(0, 4.0).flagged().usable(), None);
        assert_eq!(SensorReading::new(0, f64::NAN).usable(), None);

        let r = SensorReading::new(0, 4.0).with_uncertainty(1.0);
        assert!((r.weight() - 0.5).abs() < 1e-15);
        assert_eq!(SensorReading::new(0, 4.0).weight(), 1.0);
    }

    #[test]
    fn test_synthetic_grid_layout() {
        let net = SyntheticNetwork::default();
        let receptors = net.receptors();
        assert_eq!(receptors.len(), 49);
        assert_eq!(receptors[0].x, -300.0);
        assert_eq!(receptors[48].y, 300.0);
        assert_eq!(receptors[24].x, 0.0);
        assert_eq!(receptors[24].id, "S0303");
    }
}
