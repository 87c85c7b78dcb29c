// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The potential-energy seam and the metric derived from it.
//!
//! The physical potential is an external concern; the evaluator only needs
//! energy and forces at a configuration, which is what [`Potential`]
//! exposes. The analytic built-ins below back the CLI and the test
//! scenarios; a real calculator plugs in behind the same trait.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metric::MetricSample;

/// Floor for E − U(p), preventing a zero metric coefficient and the
/// division by zero in its gradient.
pub const METRIC_FLOOR: f64 = 1e-12;

/// Energy and forces of one configuration.
#[derive(Debug, Clone)]
pub struct PotentialSample {
    /// Potential energy U(p).
    pub energy: f64,
    /// Forces −∇U(p).
    pub forces: Vec<f64>,
}

/// A potential-energy surface.
pub trait Potential: Send + Sync {
    /// Evaluate energy and forces at a configuration.
    fn evaluate(&self, point: &[f64]) -> PotentialSample;
}

/// Convert a potential evaluation into the Maupertuis metric sample at
/// energy level `energy`:
///
/// ```text
/// a(p)  = √max(E − U(p), ε)
/// ∇a(p) = −∇U(p) / (2·a(p)) = forces / (2·a(p))
/// ```
///
/// E − U(p) ≤ 0 is floored at ε, never an error.
pub fn metric_sample(
    potential: &dyn Potential,
    point: &[f64],
    energy: f64,
    floor: f64,
) -> MetricSample {
    let sample = potential.evaluate(point);
    let value = (energy - sample.energy).max(floor).sqrt();
    let gradient = sample.forces.iter().map(|f| f / (2.0 * value)).collect();
    MetricSample { value, gradient }
}

/// Flat potential: constant energy, zero forces. Yields a constant metric,
/// under which every geodesic is the straight chord.
#[derive(Debug, Clone)]
pub struct ConstantPotential {
    /// The constant energy value.
    pub energy: f64,
}

impl Potential for ConstantPotential {
    fn evaluate(&self, point: &[f64]) -> PotentialSample {
        PotentialSample {
            energy: self.energy,
            forces: vec![0.0; point.len()],
        }
    }
}

/// Isotropic Gaussian well or bump centred at the origin:
/// U(p) = height · exp(−width · ‖p‖²).
///
/// A negative height digs a well, which raises the metric coefficient near
/// the origin and makes geodesics bend away from it.
#[derive(Debug, Clone)]
pub struct GaussianPotential {
    /// Amplitude of the feature; sign selects bump or well.
    pub height: f64,
    /// Inverse-width of the feature.
    pub width: f64,
}

impl Potential for GaussianPotential {
    fn evaluate(&self, point: &[f64]) -> PotentialSample {
        let square_norm: f64 = point.iter().map(|x| x * x).sum();
        let energy = self.height * (-self.width * square_norm).exp();
        // force_i = −∂U/∂p_i = 2·width·p_i·U
        let forces = point.iter().map(|x| 2.0 * self.width * x * energy).collect();
        PotentialSample { energy, forces }
    }
}

/// Declarative choice of potential, for settings files and CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PotentialSpec {
    /// [`ConstantPotential`].
    Constant {
        /// The constant energy value.
        energy: f64,
    },
    /// [`GaussianPotential`].
    Gaussian {
        /// Amplitude of the feature.
        height: f64,
        /// Inverse-width of the feature.
        width: f64,
    },
}

impl Default for PotentialSpec {
    fn default() -> Self {
        PotentialSpec::Constant { energy: 0.0 }
    }
}

impl PotentialSpec {
    /// Instantiate the described potential.
    pub fn build(&self) -> Arc<dyn Potential> {
        match *self {
            PotentialSpec::Constant { energy } => Arc::new(ConstantPotential { energy }),
            PotentialSpec::Gaussian { height, width } => {
                Arc::new(GaussianPotential { height, width })
            }
        }
    }
}
