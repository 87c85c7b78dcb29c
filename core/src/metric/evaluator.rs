// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The metric evaluator service.
//!
//! A single-threaded accept loop cycling through
//! `WAITING_FOR_POINTS → COMPUTING → WAITING_FOR_FETCH`. The POINTS
//! connection is closed before computation starts so the listening socket
//! stays free while siblings in the same worker pool receive their
//! batches. The buffer holds exactly the last completed batch and is
//! cleared by the FETCH that collects it.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::metric::potential::{metric_sample, Potential, METRIC_FLOOR};
use crate::protocol::{authenticate_inbound, read_message, write_message, AuthKey, Message, ValueEntry, WireError};

/// A metric evaluation server bound to one worker's pool.
pub struct Evaluator {
    potential: Arc<dyn Potential>,
    key: AuthKey,
    energy: f64,
    floor: f64,
}

impl Evaluator {
    /// Create an evaluator for the given potential and Maupertuis energy
    /// level.
    pub fn new(potential: Arc<dyn Potential>, key: AuthKey, energy: f64) -> Self {
        Self {
            potential,
            key,
            energy,
            floor: METRIC_FLOOR,
        }
    }

    /// Override the metric floor ε.
    pub fn with_floor(mut self, floor: f64) -> Self {
        self.floor = floor;
        self
    }

    /// Serve until a KILL message arrives.
    pub async fn run(&self, listener: TcpListener) -> Result<(), WireError> {
        let local = listener.local_addr()?;
        info!(%local, "evaluator listening");

        let mut pending: Vec<ValueEntry> = Vec::new();
        loop {
            let (mut stream, peer) = listener.accept().await?;
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

            match message {
                Message::Points { entries } => {
                    // Close before computing so sibling evaluators' batches
                    // are not serialized behind this one.
                    drop(stream);
                    debug!(count = entries.len(), "computing metric batch");
                    pending = entries
                        .into_iter()
                        .map(|entry| ValueEntry {
                            sample: metric_sample(
                                self.potential.as_ref(),
                                &entry.point,
                                self.energy,
                                self.floor,
                            ),
                            index: entry.index,
                        })
                        .collect();
                }
                Message::Fetch => {
                    debug!(count = pending.len(), "serving metric batch");
                    let reply = Message::Values {
                        entries: std::mem::take(&mut pending),
                    };
                    if let Err(error) = write_message(&mut stream, &reply).await {
                        warn!(%peer, %error, "failed to deliver values");
                    }
                }
                Message::Kill => {
                    debug!(%peer, "shutdown requested");
                    break;
                }
                other => {
                    warn!(%peer, kind = other.kind(), "unexpected message; closing");
                }
            }
        }

        info!(%local, "evaluator shutting down");
        Ok(())
    }
}
