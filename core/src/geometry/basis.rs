// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reduced coordinate system for a local geodesic problem.
//!
//! Given the two fixed neighbours `left` and `right` of a task, the local
//! curve is described as a graph over the chord: each interior point is
//!
//! ```text
//! q_k = left + k·(right − left)/(L+1) + B·(0, s_k)
//! ```
//!
//! where `B` is an orthonormal D×D frame whose first column is parallel to
//! the chord and `s_k ∈ ℝ^{D−1}` are the free parameters. Pinning the
//! first (tangential) component to zero removes the reparameterization
//! degeneracy of the length functional along the chord direction.

use ndarray::{s, Array1, Array2};

use crate::geometry::{GeometryError, Point};

/// Orthonormal frame aligned with the chord of a local problem, plus the
/// bookkeeping needed to move between shift parameters and curve points.
///
/// Built once per task and dropped with the local curve.
#[derive(Debug, Clone)]
pub struct ReducedBasis {
    /// D×D orthonormal matrix; column 0 is the unit chord direction.
    matrix: Array2<f64>,
    /// Chord divided by the number of segments: the per-node tangent step.
    step: Vec<f64>,
    dimension: usize,
    inner: usize,
}

impl ReducedBasis {
    /// Construct the frame for a local problem with `inner` interior nodes.
    ///
    /// The non-chord columns are obtained by Gram–Schmidt over the
    /// axis-aligned unit vectors, skipping the axis of the chord's first
    /// nonzero component so the starting set is linearly independent.
    pub fn new(left: &[f64], right: &[f64], inner: usize) -> Result<Self, GeometryError> {
        if left.len() != right.len() {
            return Err(GeometryError::DimensionMismatch {
                expected: left.len(),
                got: right.len(),
            });
        }
        let dimension = left.len();
        let chord: Vec<f64> = right.iter().zip(left).map(|(r, l)| r - l).collect();
        let pivot = chord
            .iter()
            .position(|&x| x != 0.0)
            .ok_or(GeometryError::DegenerateChord)?;

        let mut columns: Vec<Array1<f64>> = Vec::with_capacity(dimension);
        columns.push(Array1::from_vec(chord.clone()));
        for axis in 0..dimension {
            if axis != pivot {
                let mut e = Array1::zeros(dimension);
                e[axis] = 1.0;
                columns.push(e);
            }
        }

        // Modified Gram-Schmidt over the columns.
        let mut matrix = Array2::zeros((dimension, dimension));
        for (j, mut v) in columns.into_iter().enumerate() {
            for i in 0..j {
                let q = matrix.column(i);
                let r = q.dot(&v);
                v = &v - &(&q * r);
            }
            let r = v.dot(&v).sqrt();
            if r == 0.0 {
                return Err(GeometryError::DegenerateChord);
            }
            matrix.column_mut(j).assign(&(&v / r));
        }

        let segments = (inner + 1) as f64;
        let step = chord.iter().map(|c| c / segments).collect();

        Ok(Self {
            matrix,
            step,
            dimension,
            inner,
        })
    }

    /// Dimension D of the ambient space.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Dimension of the shift space per node, D − 1.
    pub fn codimension(&self) -> usize {
        self.dimension - 1
    }

    /// Number of interior nodes L of the local problem.
    pub fn inner_count(&self) -> usize {
        self.inner
    }

    /// Length of the full shift vector, L·(D − 1).
    pub fn parameter_count(&self) -> usize {
        self.inner * self.codimension()
    }

    /// The orthonormal frame itself.
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Materialize the full local curve (L + 2 points) from a shift vector.
    ///
    /// `shifts` concatenates s₁…s_L; the zero vector yields the uniform
    /// linear interpolation between `left` and `right`.
    pub fn materialize(&self, left: &[f64], right: &[f64], shifts: &[f64]) -> Vec<Point> {
        let codim = self.codimension();
        let normal = self.matrix.slice(s![.., 1..]);
        let mut curve = Vec::with_capacity(self.inner + 2);
        curve.push(left.to_vec());
        for k in 1..=self.inner {
            let s_k = &shifts[(k - 1) * codim..k * codim];
            let offset = normal.dot(&ndarray::ArrayView1::from(s_k));
            let point = left
                .iter()
                .zip(&self.step)
                .zip(offset.iter())
                .map(|((l, t), o)| l + k as f64 * t + o)
                .collect();
            curve.push(point);
        }
        curve.push(right.to_vec());
        curve
    }

    /// Recover the shift vector of an interior curve: the inverse of
    /// [`ReducedBasis::materialize`] restricted to the interior points.
    pub fn shifts_of(&self, left: &[f64], curve: &[Point]) -> Vec<f64> {
        let mut shifts = Vec::with_capacity(self.parameter_count());
        for k in 1..=self.inner {
            let residual: Vec<f64> = curve[k]
                .iter()
                .zip(left)
                .zip(&self.step)
                .map(|((q, l), t)| q - l - k as f64 * t)
                .collect();
            shifts.extend(self.reduce(&residual));
        }
        shifts
    }

    /// Project an ambient vector onto the normal columns: `B[:,1..]ᵀ v`.
    pub fn reduce(&self, v: &[f64]) -> Vec<f64> {
        self.matrix
            .slice(s![.., 1..])
            .t()
            .dot(&ndarray::ArrayView1::from(v))
            .to_vec()
    }
}
