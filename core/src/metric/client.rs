// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The metric sharding client.
//!
//! A worker's private pool of evaluators. One evaluation is two phases:
//! dispatch a contiguous slice of the curve to each evaluator (POINTS),
//! then collect every slice (FETCH/VALUES) and reassemble a dense buffer
//! in curve order. There are no retries and no rebalancing: the pool is
//! private to its worker, so a failed evaluator means the worker cannot
//! continue and says so.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::ops::Range;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::geometry::Point;
use crate::metric::{MetricError, MetricSample, MetricSource};
use crate::protocol::{
    authenticate_outbound, read_message, write_message, AuthKey, Message, PointEntry,
};

/// Split `total` indices into `shards` contiguous near-equal ranges, the
/// remainder spread one each across the first ranges.
pub fn partition(total: usize, shards: usize) -> Vec<Range<usize>> {
    let base = total / shards;
    let remainder = total % shards;
    let mut ranges = Vec::with_capacity(shards);
    let mut start = 0;
    for shard in 0..shards {
        let len = base + usize::from(shard < remainder);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// A handle on one worker's evaluator pool.
pub struct MetricPool {
    endpoints: Vec<String>,
    key: AuthKey,
}

impl MetricPool {
    /// Build a pool over the given evaluator addresses.
    pub fn new(endpoints: Vec<String>, key: AuthKey) -> Result<Self, MetricError> {
        if endpoints.is_empty() {
            return Err(MetricError::EmptyPool);
        }
        Ok(Self { endpoints, key })
    }

    /// Addresses of the pool members.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn connect(&self, endpoint: &str) -> Result<TcpStream, MetricError> {
        let mut stream =
            TcpStream::connect(endpoint)
                .await
                .map_err(|source| MetricError::Unreachable {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
        authenticate_outbound(&mut stream, &self.key).await?;
        Ok(stream)
    }

    async fn dispatch(&self, endpoint: &str, entries: Vec<PointEntry>) -> Result<(), MetricError> {
        let mut stream = self.connect(endpoint).await?;
        write_message(&mut stream, &Message::Points { entries }).await?;
        Ok(())
    }

    async fn collect(&self, endpoint: &str) -> Result<Vec<crate::protocol::ValueEntry>, MetricError> {
        let mut stream = self.connect(endpoint).await?;
        write_message(&mut stream, &Message::Fetch).await?;
        match read_message(&mut stream).await? {
            Message::Values { entries } => Ok(entries),
            other => Err(MetricError::UnexpectedReply {
                endpoint: endpoint.to_string(),
                kind: other.kind(),
            }),
        }
    }
}

#[async_trait]
impl MetricSource for MetricPool {
    async fn evaluate(&self, points: &[Point]) -> Result<Vec<MetricSample>, MetricError> {
        let ranges = partition(points.len(), self.endpoints.len());
        debug!(
            points = points.len(),
            evaluators = self.endpoints.len(),
            "sharding metric evaluation"
        );

        try_join_all(self.endpoints.iter().zip(&ranges).map(|(endpoint, range)| {
            let entries = range
                .clone()
                .map(|index| PointEntry {
                    point: points[index].clone(),
                    index,
                })
                .collect();
            self.dispatch(endpoint, entries)
        }))
        .await?;

        let batches = try_join_all(
            self.endpoints
                .iter()
                .map(|endpoint| self.collect(endpoint)),
        )
        .await?;

        let mut slots: Vec<Option<MetricSample>> = vec![None; points.len()];
        for entry in batches.into_iter().flatten() {
            let slot = slots
                .get_mut(entry.index)
                .ok_or(MetricError::IndexOutOfRange {
                    index: entry.index,
                    len: points.len(),
                })?;
            if slot.is_some() {
                return Err(MetricError::DuplicateSample { index: entry.index });
            }
            *slot = Some(entry.sample);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or(MetricError::MissingSample { index }))
            .collect()
    }

    async fn shutdown(&self) {
        for endpoint in &self.endpoints {
            match self.connect(endpoint).await {
                Ok(mut stream) => {
                    if let Err(error) = write_message(&mut stream, &Message::Kill).await {
                        warn!(%endpoint, %error, "failed to deliver kill");
                    }
                }
                Err(error) => warn!(%endpoint, %error, "failed to reach evaluator for kill"),
            }
        }
    }
}
