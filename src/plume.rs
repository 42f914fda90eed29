//! Gaussian plume forward model
//!
//! Steady-state point-source dispersion with Briggs open-country sigmas,
//! power-law wind profile and total ground reflection.

use crate::error::DomainError;
use crate::scenario::{Meteorology, Receptor, Source, WIND_REFERENCE_HEIGHT};
use std::f64::consts::PI;

/// Concentrations below this value [μg/m³] are reported as exactly zero
pub const CONCENTRATION_FLOOR: f64 = 1e-10;

/// g/m³ to μg/m³
const GRAMS_TO_MICROGRAMS: f64 = 1e6;

/// Predicts receptor concentrations for a hypothesised source.
///
/// Implementations must be pure: identical inputs give bit-identical output.
pub trait ForwardModel: Send + Sync {
    /// Concentration [μg/m³] at each receptor, in layout order
    fn predict(
        &self,
        source: &Source,
        receptors: &[Receptor],
        meteorology: &Meteorology,
    ) -> Result<Vec<f64>, DomainError>;
}

/// Classic Gaussian plume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianPlume {
    /// Add the image source below ground
    pub ground_reflection: bool,
}

impl Default for GaussianPlume {
    fn default() -> Self {
        Self {
            ground_reflection: true,
        }
    }
}

impl GaussianPlume {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_reflection() -> Self {
        Self {
            ground_reflection: false,
        }
    }
}

fn check_inputs(source: &Source, meteorology: &Meteorology) -> Result<(), DomainError> {
    if !meteorology.wind_speed.is_finite() {
        return Err(DomainError::NonFinite("wind_speed"));
    }
    if meteorology.wind_speed <= 0.0 {
        return Err(DomainError::NonPositiveWindSpeed(meteorology.wind_speed));
    }
    if !meteorology.wind_direction.is_finite() {
        return Err(DomainError::NonFinite("wind_direction"));
    }
    if !(source.x.is_finite() && source.y.is_finite()) {
        return Err(DomainError::NonFinite("source position"));
    }
    if !source.height.is_finite() {
        return Err(DomainError::NonFinite("source height"));
    }
    if source.height < 0.0 {
        return Err(DomainError::NegativeSourceHeight(source.height));
    }
    if !source.emission_rate.is_finite() {
        return Err(DomainError::NonFinite("emission rate"));
    }
    if source.emission_rate < 0.0 {
        return Err(DomainError::NegativeEmissionRate(source.emission_rate));
    }
    Ok(())
}

impl ForwardModel for GaussianPlume {
    fn predict(
        &self,
        source: &Source,
        receptors: &[Receptor],
        meteorology: &Meteorology,
    ) -> Result<Vec<f64>, DomainError> {
        check_inputs(source, meteorology)?;

        let stability = meteorology.stability_class();
        let (ux, uy) = meteorology.downwind_unit();
        let h = source.height;
        let u = meteorology.wind_speed
            * (h.max(1.0) / WIND_REFERENCE_HEIGHT).powf(stability.wind_profile_exponent());

        let mut out = Vec::with_capacity(receptors.len());
        for r in receptors {
            if !(r.x.is_finite() && r.y.is_finite() && r.z.is_finite()) {
                return Err(DomainError::NonFinite("receptor coordinates"));
            }
            if r.z < 0.0 {
                return Err(DomainError::NegativeReceptorHeight {
                    id: r.id.clone(),
                    z: r.z,
                });
            }

            let dx = r.x - source.x;
            let dy = r.y - source.y;
            let downwind = dx * ux + dy * uy;
            if downwind <= 0.0 {
                out.push(0.0);
                continue;
            }
            let crosswind = -dx * uy + dy * ux;

            let sy = stability.sigma_y(downwind);
            let sz = stability.sigma_z(downwind);

            let lateral = (-crosswind * crosswind / (2.0 * sy * sy)).exp();
            let mut vertical = (-(r.z - h).powi(2) / (2.0 * sz * sz)).exp();
            if self.ground_reflection {
                vertical += (-(r.z + h).powi(2) / (2.0 * sz * sz)).exp();
            }

            let c = source.emission_rate / (2.0 * PI * u * sy * sz) * lateral * vertical
                * GRAMS_TO_MICROGRAMS;
            out.push(if c.is_finite() && c >= CONCENTRATION_FLOOR { c } else { 0.0 });
        }

        Ok(out)
    }
}
