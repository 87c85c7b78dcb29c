// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Metric evaluation: the pointwise samples, the evaluator service that
//! computes them, and the sharding client that distributes a curve across
//! a worker's private evaluator pool.

pub mod client;
pub mod evaluator;
pub mod potential;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Point;
use crate::protocol::{AuthError, WireError};

pub use client::MetricPool;
pub use evaluator::Evaluator;
pub use potential::{Potential, PotentialSample, PotentialSpec};

/// The metric coefficient and its gradient at one point.
///
/// `value` is a(p) = √max(E − U(p), ε) per the Maupertuis principle;
/// `gradient` is ∇a(p) in the ambient space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// The positive metric coefficient a(p).
    pub value: f64,
    /// The gradient ∇a(p).
    pub gradient: Vec<f64>,
}

/// Errors from metric evaluation.
#[derive(Debug, Error)]
pub enum MetricError {
    /// An evaluator could not be reached.
    #[error("evaluator {endpoint} unreachable: {source}")]
    Unreachable {
        /// Address of the evaluator.
        endpoint: String,
        /// Underlying connection error.
        source: std::io::Error,
    },

    /// The framed transport failed mid-exchange.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The handshake with an evaluator failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// An evaluator answered with something other than VALUES.
    #[error("evaluator {endpoint} sent unexpected message kind {kind}")]
    UnexpectedReply {
        /// Address of the evaluator.
        endpoint: String,
        /// The offending message kind.
        kind: &'static str,
    },

    /// The gathered samples left a curve index unfilled.
    #[error("no sample returned for curve index {index}")]
    MissingSample {
        /// The unfilled curve index.
        index: usize,
    },

    /// Two samples claimed the same curve index.
    #[error("duplicate sample for curve index {index}")]
    DuplicateSample {
        /// The duplicated curve index.
        index: usize,
    },

    /// A sample arrived with an index outside the dispatched curve.
    #[error("sample index {index} out of range for a curve of {len} points")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of points dispatched.
        len: usize,
    },

    /// A pool with no evaluators cannot evaluate anything.
    #[error("evaluator pool is empty")]
    EmptyPool,
}

/// Source of metric samples for a curve.
///
/// The solver only ever talks to this trait; the production implementation
/// is [`MetricPool`], and tests substitute analytic closures.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Evaluate the metric at every point, returning samples in curve
    /// order.
    async fn evaluate(&self, points: &[Point]) -> Result<Vec<MetricSample>, MetricError>;

    /// Tell any backing services to shut down. Best-effort.
    async fn shutdown(&self) {}
}
