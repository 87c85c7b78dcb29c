// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! BFGS minimization of the local length functional.
//!
//! Plain dense-Hessian BFGS (the parameter count of a local problem is
//! L·(D−1), small enough that limited-memory buys nothing) with a
//! strong-Wolfe line search. Each objective evaluation materializes the
//! trial curve and fetches one metric batch, so the loop is written to
//! evaluate the metric exactly once per trial point.

use ndarray::{Array1, Array2, Axis};
use thiserror::Error;
use tracing::debug;

use crate::curve::LocalCurve;
use crate::geometry::{curve_length, length_gradient, GeometryError, MassMatrix, Point, ReducedBasis};
use crate::metric::{MetricError, MetricSource};
use crate::solver::linesearch::{LineSearch, SearchStatus, SearchStep, WolfeParams};

/// Cap applied to ρ = 1/(yᵀs) when the denominator underflows to zero and
/// the quotient is no longer finite.
const RHO_CAP: f64 = 1000.0;

/// Errors from the local solver.
#[derive(Debug, Error)]
pub enum SolverError {
    /// The evaluator pool failed; the worker cannot continue.
    #[error(transparent)]
    Metric(#[from] MetricError),

    /// The task geometry is unusable (coincident neighbours, dimension
    /// mismatch).
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// A metric source answered with the wrong number of samples.
    #[error("metric source returned {got} samples for {expected} points")]
    SampleCount {
        /// Points requested.
        expected: usize,
        /// Samples received.
        got: usize,
    },
}

/// Tunables of the local solver.
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    /// Gradient tolerance in the L∞ norm.
    pub gtol: f64,
    /// Hard cap on BFGS iterations.
    pub max_iterations: usize,
    /// Line-search parameters.
    pub wolfe: WolfeParams,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            gtol: 1e-5,
            max_iterations: 500,
            wolfe: WolfeParams::default(),
        }
    }
}

struct Evaluation {
    phi: f64,
    gradient: Array1<f64>,
    curve: Vec<Point>,
}

async fn evaluate<S>(
    basis: &ReducedBasis,
    left: &[f64],
    right: &[f64],
    mass: &MassMatrix,
    metric: &S,
    shifts: &Array1<f64>,
) -> Result<Evaluation, SolverError>
where
    S: MetricSource + ?Sized,
{
    let curve = basis.materialize(left, right, shifts.as_slice().unwrap_or(&[]));
    let samples = metric.evaluate(&curve).await?;
    if samples.len() != curve.len() {
        return Err(SolverError::SampleCount {
            expected: curve.len(),
            got: samples.len(),
        });
    }
    let phi = curve_length(&curve, &samples, mass);
    let gradient = Array1::from_vec(length_gradient(&curve, &samples, mass, basis));
    Ok(Evaluation {
        phi,
        gradient,
        curve,
    })
}

fn inf_norm(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let a = a.view().insert_axis(Axis(1));
    let b = b.view().insert_axis(Axis(0));
    a.dot(&b)
}

/// Solve one local geodesic problem and return the repositioned midpoint
/// q_{⌈(L+1)/2⌉}.
///
/// Starts from the straight chord (s = 0) and iterates until
/// ‖∇Φ‖∞ ≤ `gtol` or the line search can make no further progress, in
/// which case the best iterate found so far is the answer. Metric failures
/// abort the solve and surface to the worker loop.
pub async fn find_geodesic_midpoint<S>(
    left: &[f64],
    right: &[f64],
    inner: usize,
    mass: &MassMatrix,
    metric: &S,
    options: &SolverOptions,
) -> Result<Point, SolverError>
where
    S: MetricSource + ?Sized,
{
    let basis = ReducedBasis::new(left, right, inner)?;
    let variables = basis.parameter_count();

    // With no free parameters (D = 1) the chord is the only curve.
    if variables == 0 {
        let curve = LocalCurve::from_shifts(&basis, left, right, &[]);
        return Ok(curve.into_midpoint());
    }

    let mut shifts = Array1::zeros(variables);
    let mut current = evaluate(&basis, left, right, mass, metric, &shifts).await?;
    let mut hessian_inv = Array2::<f64>::eye(variables);
    let identity = Array2::<f64>::eye(variables);

    let mut iteration = 0;
    while inf_norm(&current.gradient) > options.gtol && iteration < options.max_iterations {
        iteration += 1;

        let direction = -hessian_inv.dot(&current.gradient);
        let slope = current.gradient.dot(&direction);

        let (mut search, mut step) = LineSearch::new(current.phi, slope, options.wolfe);
        let mut last_trial: Option<(f64, Evaluation)> = None;
        let accepted = loop {
            match step {
                SearchStep::Evaluate(alpha) => {
                    let trial_shifts = &shifts + &(&direction * alpha);
                    let trial =
                        evaluate(&basis, left, right, mass, metric, &trial_shifts).await?;
                    let trial_slope = trial.gradient.dot(&direction);
                    step = search.advance(trial.phi, trial_slope);
                    last_trial = Some((alpha, trial));
                }
                SearchStep::Finished { status, .. } => {
                    break match status {
                        SearchStatus::Converged => last_trial,
                        // ERROR/WARN analogue: stop and keep the best
                        // iterate found so far.
                        SearchStatus::Exhausted | SearchStatus::Failed => None,
                    };
                }
            }
        };

        let Some((alpha, accepted)) = accepted else {
            debug!(iteration, "line search made no progress; returning best iterate");
            break;
        };

        let step_vec = &direction * alpha;
        let gradient_delta = &accepted.gradient - &current.gradient;
        let mut rho = 1.0 / gradient_delta.dot(&step_vec);
        if !rho.is_finite() {
            rho = RHO_CAP;
        }

        let correction = &identity - &(outer(&step_vec, &gradient_delta) * rho);
        hessian_inv = correction.dot(&hessian_inv).dot(&correction.t())
            + outer(&step_vec, &step_vec) * rho;

        shifts = &shifts + &step_vec;
        current = accepted;
    }

    debug!(
        iteration,
        length = current.phi,
        gnorm = inf_norm(&current.gradient),
        "local solve finished"
    );

    let midpoint_index = inner / 2 + 1;
    Ok(current.curve[midpoint_index].clone())
}
