// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Message definitions for coordinator-worker and worker-evaluator traffic.

use serde::{Deserialize, Serialize};

use crate::metric::MetricSample;

/// A point scheduled for metric evaluation, tagged with its position in the
/// local curve so shards can be reassembled in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointEntry {
    /// The configuration to evaluate.
    pub point: Vec<f64>,
    /// Index of the point in the originating curve.
    pub index: usize,
}

/// A computed metric sample tagged with its originating curve index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueEntry {
    /// Metric coefficient and gradient at the point.
    pub sample: MetricSample,
    /// Index of the point in the originating curve.
    pub index: usize,
}

/// Every message any role sends or receives. One message per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Worker first contact with the coordinator.
    Hello {
        /// Unique worker identifier.
        worker_id: String,
    },
    /// Worker poll after a WAIT.
    Idle {
        /// Unique worker identifier.
        worker_id: String,
    },
    /// Worker returns a computed midpoint for a node.
    Result {
        /// Unique worker identifier.
        worker_id: String,
        /// Global node index the midpoint belongs to.
        node_index: usize,
        /// The new position for that node.
        new_position: Vec<f64>,
    },
    /// Coordinator hands out a local problem.
    Task {
        /// Global node index to reposition.
        node_index: usize,
        /// Left neighbour p_{i-1}.
        left: Vec<f64>,
        /// Right neighbour p_{i+1}.
        right: Vec<f64>,
    },
    /// Coordinator has nothing dispatchable; poll again later.
    Wait,
    /// Worker ships a batch of points to an evaluator.
    Points {
        /// Points with their originating curve indices.
        entries: Vec<PointEntry>,
    },
    /// Worker collects the values for the last batch.
    Fetch,
    /// Evaluator returns the buffered samples.
    Values {
        /// Samples with their originating curve indices.
        entries: Vec<ValueEntry>,
    },
    /// Shut an evaluator down.
    Kill,
}

impl Message {
    /// Stable name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Idle { .. } => "idle",
            Message::Result { .. } => "result",
            Message::Task { .. } => "task",
            Message::Wait => "wait",
            Message::Points { .. } => "points",
            Message::Fetch => "fetch",
            Message::Values { .. } => "values",
            Message::Kill => "kill",
        }
    }
}
