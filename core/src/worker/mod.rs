// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The worker node.
//!
//! Pulls three-point tasks from the coordinator, solves each local
//! geodesic against its private evaluator pool, and reports midpoints
//! back. The worker has exactly two ways to stop, both graceful towards
//! its pool: the coordinator becomes unreachable (normal end of a run) or
//! an evaluator fails (the worker is useless without its full pool). In
//! either case every evaluator is sent KILL before the worker returns.

use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::geometry::MassMatrix;
use crate::metric::MetricSource;
use crate::protocol::{
    authenticate_outbound, read_message, write_message, AuthError, AuthKey, Message, WireError,
};
use crate::solver::{find_geodesic_midpoint, SolverError, SolverOptions};

/// Errors that terminate a worker abnormally.
///
/// An unreachable coordinator is not among them: that is the coordinator's
/// way of ending the run.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The local solve failed, almost always because an evaluator died.
    #[error("local solve failed: {0}")]
    Solve(#[from] SolverError),

    /// The coordinator answered with a message the protocol does not allow
    /// in this direction.
    #[error("coordinator sent unexpected message kind {kind}")]
    UnexpectedReply {
        /// The offending message kind.
        kind: &'static str,
    },
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker identifier.
    pub worker_id: String,
    /// Coordinator address.
    pub coordinator: String,
    /// How long to sleep after a WAIT before polling again.
    pub callback_delay: Duration,
    /// Interior nodes per local problem (L).
    pub local_nodes: usize,
    /// The mass matrix of the system.
    pub mass: MassMatrix,
    /// Local solver tunables.
    pub solver: SolverOptions,
}

impl WorkerConfig {
    /// A fresh unique worker id.
    pub fn random_id() -> String {
        format!("worker-{}", uuid::Uuid::new_v4())
    }
}

/// A worker bound to one coordinator and one evaluator pool.
pub struct Worker<S: MetricSource> {
    config: WorkerConfig,
    key: AuthKey,
    metric: S,
}

impl<S: MetricSource> Worker<S> {
    /// Create a worker over an already-constructed metric source.
    pub fn new(config: WorkerConfig, key: AuthKey, metric: S) -> Self {
        Self {
            config,
            key,
            metric,
        }
    }

    /// Run until the coordinator goes away (Ok) or the pool fails (Err).
    pub async fn run(&self) -> Result<(), WorkerError> {
        info!(worker = %self.config.worker_id, coordinator = %self.config.coordinator, "worker starting");

        let mut outbound = Message::Hello {
            worker_id: self.config.worker_id.clone(),
        };
        loop {
            let reply = match self.call(&outbound).await {
                Ok(reply) => reply,
                Err(error) => {
                    info!(worker = %self.config.worker_id, %error, "coordinator unreachable; shutting down");
                    self.metric.shutdown().await;
                    return Ok(());
                }
            };

            match reply {
                Message::Task {
                    node_index,
                    left,
                    right,
                } => {
                    debug!(worker = %self.config.worker_id, node = node_index, "task received");
                    let midpoint = match find_geodesic_midpoint(
                        &left,
                        &right,
                        self.config.local_nodes,
                        &self.config.mass,
                        &self.metric,
                        &self.config.solver,
                    )
                    .await
                    {
                        Ok(midpoint) => midpoint,
                        Err(error) => {
                            warn!(worker = %self.config.worker_id, %error, "evaluator pool failed; shutting down");
                            self.metric.shutdown().await;
                            return Err(error.into());
                        }
                    };
                    outbound = Message::Result {
                        worker_id: self.config.worker_id.clone(),
                        node_index,
                        new_position: midpoint,
                    };
                }
                Message::Wait => {
                    tokio::time::sleep(self.config.callback_delay).await;
                    outbound = Message::Idle {
                        worker_id: self.config.worker_id.clone(),
                    };
                }
                other => {
                    warn!(worker = %self.config.worker_id, kind = other.kind(), "unexpected reply; shutting down");
                    self.metric.shutdown().await;
                    return Err(WorkerError::UnexpectedReply { kind: other.kind() });
                }
            }
        }
    }

    /// One request/response exchange with the coordinator on a fresh
    /// connection.
    async fn call(&self, message: &Message) -> Result<Message, CallError> {
        let mut stream = TcpStream::connect(&self.config.coordinator).await?;
        authenticate_outbound(&mut stream, &self.key).await?;
        write_message(&mut stream, message).await?;
        Ok(read_message(&mut stream).await?)
    }
}

/// Reasons one exchange with the coordinator can fail. All of them mean
/// the same thing to the main loop: the run is over.
#[derive(Debug, Error)]
enum CallError {
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Wire(#[from] WireError),
}
