// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The coordinator service.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                Coordinator                   │
//! │  ┌──────────────┐      ┌──────────────────┐  │
//! │  │ Accept loop  │ ───▶ │    Dispatcher    │  │
//! │  │ (auth+frame) │ ◀─── │  (GlobalCurve,   │  │
//! │  └──────────────┘      │   worker states) │  │
//! │                        └──────────────────┘  │
//! └──────────────────────────────────────────────┘
//!        ▲ one request/response per connection
//!        │
//!   workers (HELLO / IDLE / RESULT)
//! ```
//!
//! Requests are handled strictly in accept order; the dispatcher and the
//! global curve are never shared with I/O code. When the termination test
//! passes the current caller receives WAIT, the listener is dropped, and
//! the run report is returned. Workers discover the shutdown by failing to
//! connect.

pub mod dispatch;

use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::curve::GlobalCurve;
use crate::protocol::{authenticate_inbound, read_message, write_message, AuthKey, Message};

pub use dispatch::{DispatchRecord, Dispatcher, Reply, Request, WorkerState};

/// Errors that stop the coordinator entirely.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The listening socket failed.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coordinator tunables.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// How long a dispatched task may stay outstanding before its worker
    /// is presumed dead and the node released.
    pub task_timeout: Duration,
    /// Termination tolerance on the per-sweep aggregate movement.
    pub tolerance: f64,
}

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct RunReport {
    /// The converged curve.
    pub curve: GlobalCurve,
    /// Number of completed sweeps.
    pub sweeps: usize,
    /// Aggregate movement at the end of each sweep.
    pub movement_history: Vec<f64>,
    /// Every task dispatched over the run.
    pub dispatch_log: Vec<DispatchRecord>,
}

/// The one-per-run coordinator service.
pub struct Coordinator {
    dispatcher: Dispatcher,
    key: AuthKey,
}

impl Coordinator {
    /// Create a coordinator over an initial curve.
    pub fn new(curve: GlobalCurve, config: CoordinatorConfig, key: AuthKey) -> Self {
        Self {
            dispatcher: Dispatcher::new(curve, config.task_timeout, config.tolerance),
            key,
        }
    }

    /// Serve on `listener` until the curve converges.
    pub async fn run(mut self, listener: TcpListener) -> Result<RunReport, CoordinatorError> {
        let local = listener.local_addr()?;
        info!(%local, "coordinator listening");

        while !self.dispatcher.is_finished() {
            let (mut stream, peer) = listener.accept().await?;
            debug!(%peer, "connection accepted");

            if let Err(error) = authenticate_inbound(&mut stream, &self.key).await {
                warn!(%peer, %error, "rejecting unauthenticated connection");
                continue;
            }
            let message = match read_message(&mut stream).await {
                Ok(message) => message,
                Err(error) => {
                    warn!(%peer, %error, "dropping unreadable request");
                    continue;
                }
            };
            let request = match Request::try_from(message) {
                Ok(request) => request,
                Err(kind) => {
                    warn!(%peer, kind, "unexpected message kind; closing");
                    continue;
                }
            };

            let reply = self.dispatcher.handle(request, std::time::Instant::now());
            if let Err(error) = write_message(&mut stream, &Message::from(reply)).await {
                warn!(%peer, %error, "failed to deliver reply");
            }
        }

        info!(%local, "coordinator shutting down");
        let (curve, sweeps, movement_history, dispatch_log) = self.dispatcher.into_parts();
        Ok(RunReport {
            curve,
            sweeps,
            movement_history,
            dispatch_log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::authenticate_outbound;
    use tokio::net::TcpStream;

    async fn call(addr: std::net::SocketAddr, key: &AuthKey, message: Message) -> Message {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        authenticate_outbound(&mut stream, key).await.unwrap();
        write_message(&mut stream, &message).await.unwrap();
        read_message(&mut stream).await.unwrap()
    }

    #[tokio::test]
    async fn test_single_worker_drives_run_to_completion() {
        let key = AuthKey::new("coord");
        let curve = GlobalCurve::new(vec![0.0, 0.0], vec![3.0, 0.0], 2).unwrap();
        let coordinator = Coordinator::new(
            curve,
            CoordinatorConfig {
                task_timeout: Duration::from_secs(60),
                tolerance: 1e-6,
            },
            key.clone(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let run = tokio::spawn(async move { coordinator.run(listener).await });

        // Echo every task's linear midpoint back: zero movement, one
        // sweep, immediate convergence.
        let mut message = Message::Hello {
            worker_id: "w".to_string(),
        };
        loop {
            match call(addr, &key, message).await {
                Message::Task { node_index, left, right } => {
                    let midpoint = left
                        .iter()
                        .zip(&right)
                        .map(|(l, r)| 0.5 * (l + r))
                        .collect();
                    message = Message::Result {
                        worker_id: "w".to_string(),
                        node_index,
                        new_position: midpoint,
                    };
                }
                Message::Wait => break,
                other => panic!("unexpected reply {}", other.kind()),
            }
        }

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.sweeps, 1);
        assert!(report.movement_history[0] < 1e-6);
        assert_eq!(report.curve.point(0), &vec![0.0, 0.0]);
        assert_eq!(report.curve.point(3), &vec![3.0, 0.0]);
    }
}
