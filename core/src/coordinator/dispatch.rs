// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The dispatch state machine.
//!
//! One value owns the global curve and every per-worker record; the accept
//! loop feeds it one request at a time and relays its reply. Nothing here
//! touches a socket, which keeps the neighbour-exclusion and liveness rules
//! synchronously testable.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::curve::GlobalCurve;
use crate::geometry::Point;
use crate::protocol::Message;

/// Liveness state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Known, no outstanding task.
    Idle,
    /// Holds the task for `node`, dispatched at `dispatched_at`.
    Busy {
        /// Global node index the worker is repositioning.
        node: usize,
        /// When the task was handed out.
        dispatched_at: Instant,
    },
    /// Timed out on its last task; its next result is discarded.
    Stale,
}

/// One dispatched task, for instrumentation and post-run analysis.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    /// Global node index.
    pub node: usize,
    /// Worker the task went to.
    pub worker: String,
    /// When the task was dispatched.
    pub dispatched_at: Instant,
    /// When the node was released again: result accepted or timeout.
    pub closed_at: Option<Instant>,
}

/// A request the dispatcher understands, already stripped of transport
/// concerns.
#[derive(Debug, Clone)]
pub enum Request {
    /// First contact.
    Hello {
        /// Worker identifier.
        worker_id: String,
    },
    /// Poll after a WAIT.
    Idle {
        /// Worker identifier.
        worker_id: String,
    },
    /// A computed midpoint.
    Result {
        /// Worker identifier.
        worker_id: String,
        /// Node the midpoint belongs to.
        node_index: usize,
        /// The new position.
        new_position: Point,
    },
}

impl TryFrom<Message> for Request {
    type Error = &'static str;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        match message {
            Message::Hello { worker_id } => Ok(Request::Hello { worker_id }),
            Message::Idle { worker_id } => Ok(Request::Idle { worker_id }),
            Message::Result {
                worker_id,
                node_index,
                new_position,
            } => Ok(Request::Result {
                worker_id,
                node_index,
                new_position,
            }),
            other => Err(other.kind()),
        }
    }
}

/// The dispatcher's reply, rendered to a wire message by the accept loop.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A local problem for the caller.
    Task {
        /// Node to reposition.
        node: usize,
        /// Left neighbour.
        left: Point,
        /// Right neighbour.
        right: Point,
    },
    /// Nothing dispatchable; poll again later.
    Wait,
}

impl From<Reply> for Message {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Task { node, left, right } => Message::Task {
                node_index: node,
                left,
                right,
            },
            Reply::Wait => Message::Wait,
        }
    }
}

/// Decide whether an inbound result is written to the curve. Pure function
/// of the sender's current state and the claimed node.
fn accepts_result(state: Option<&WorkerState>, node_index: usize) -> bool {
    matches!(state, Some(WorkerState::Busy { node, .. }) if *node == node_index)
}

/// Owns the global curve and drives the curve-shortening sweeps.
#[derive(Debug)]
pub struct Dispatcher {
    curve: GlobalCurve,
    workers: HashMap<String, WorkerState>,
    timeout: Duration,
    tolerance: f64,
    sweeps: usize,
    movement_history: Vec<f64>,
    log: Vec<DispatchRecord>,
    finished: bool,
}

impl Dispatcher {
    /// Create a dispatcher over an initial curve.
    pub fn new(curve: GlobalCurve, timeout: Duration, tolerance: f64) -> Self {
        Self {
            curve,
            workers: HashMap::new(),
            timeout,
            tolerance,
            sweeps: 0,
            movement_history: Vec::new(),
            log: Vec::new(),
            finished: false,
        }
    }

    /// Whether the termination test has passed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The curve in its current state.
    pub fn curve(&self) -> &GlobalCurve {
        &self.curve
    }

    /// Completed sweeps so far.
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// Movement recorded at the end of each completed sweep.
    pub fn movement_history(&self) -> &[f64] {
        &self.movement_history
    }

    /// Every task dispatched so far.
    pub fn dispatch_log(&self) -> &[DispatchRecord] {
        &self.log
    }

    /// Tear the dispatcher apart into its end-of-run pieces:
    /// (curve, sweeps, movement history, dispatch log).
    pub fn into_parts(self) -> (GlobalCurve, usize, Vec<f64>, Vec<DispatchRecord>) {
        (self.curve, self.sweeps, self.movement_history, self.log)
    }

    /// Process one request and produce the reply for its sender.
    pub fn handle(&mut self, request: Request, now: Instant) -> Reply {
        match request {
            Request::Hello { worker_id } => {
                debug!(worker = %worker_id, "first contact");
                self.release_if_busy(&worker_id, now);
                self.workers.insert(worker_id.clone(), WorkerState::Idle);
                self.post_process(&worker_id, now)
            }
            Request::Idle { worker_id } => {
                self.release_if_busy(&worker_id, now);
                self.workers.insert(worker_id.clone(), WorkerState::Idle);
                self.post_process(&worker_id, now)
            }
            Request::Result {
                worker_id,
                node_index,
                new_position,
            } => {
                if accepts_result(self.workers.get(&worker_id), node_index) {
                    match self.curve.set_node_position(node_index, new_position) {
                        Ok(delta) => {
                            debug!(worker = %worker_id, node = node_index, delta, "result accepted");
                            self.close_record(&worker_id, node_index, now);
                        }
                        Err(error) => {
                            warn!(worker = %worker_id, node = node_index, %error, "result rejected");
                        }
                    }
                } else {
                    // Stale or mismatched result: the node may already be
                    // someone else's task. Drop it without touching the
                    // curve.
                    debug!(worker = %worker_id, node = node_index, "discarding stale result");
                    self.release_if_busy(&worker_id, now);
                }
                self.workers.insert(worker_id.clone(), WorkerState::Idle);
                self.post_process(&worker_id, now)
            }
        }
    }

    /// A worker reappearing with HELLO/IDLE while marked busy has lost its
    /// task state; release the node so it can be re-dispatched.
    fn release_if_busy(&mut self, worker_id: &str, now: Instant) {
        if let Some(WorkerState::Busy { node, .. }) = self.workers.get(worker_id) {
            let node = *node;
            warn!(worker = %worker_id, node, "worker re-registered while busy; releasing node");
            self.close_record(worker_id, node, now);
        }
    }

    /// Timeout scan, sweep accounting, then node selection for the caller.
    fn post_process(&mut self, caller: &str, now: Instant) -> Reply {
        self.scan_timeouts(now);
        self.check_sweep();
        if self.finished {
            return Reply::Wait;
        }
        match self.select_node() {
            Some(node) => {
                self.workers.insert(
                    caller.to_string(),
                    WorkerState::Busy {
                        node,
                        dispatched_at: now,
                    },
                );
                self.log.push(DispatchRecord {
                    node,
                    worker: caller.to_string(),
                    dispatched_at: now,
                    closed_at: None,
                });
                debug!(worker = %caller, node, "dispatching task");
                Reply::Task {
                    node,
                    left: self.curve.point(node - 1).clone(),
                    right: self.curve.point(node + 1).clone(),
                }
            }
            None => Reply::Wait,
        }
    }

    /// Demote every over-deadline busy worker to stale, releasing its node.
    /// Stale ids are collected first; the map is never mutated while it is
    /// being iterated.
    fn scan_timeouts(&mut self, now: Instant) {
        let expired: Vec<(String, usize)> = self
            .workers
            .iter()
            .filter_map(|(id, state)| match state {
                WorkerState::Busy {
                    node,
                    dispatched_at,
                } if now.duration_since(*dispatched_at) > self.timeout => {
                    Some((id.clone(), *node))
                }
                _ => None,
            })
            .collect();
        for (id, node) in expired {
            warn!(worker = %id, node, "task timed out; presuming worker dead");
            self.close_record(&id, node, now);
            self.workers.insert(id, WorkerState::Stale);
        }
    }

    /// Sweep bookkeeping: once every interior node has been repositioned,
    /// test the aggregate movement against the tolerance.
    fn check_sweep(&mut self) {
        if self.finished || !self.curve.all_interior_moved() {
            return;
        }
        let movement = self.curve.movement();
        self.sweeps += 1;
        self.movement_history.push(movement);
        info!(sweep = self.sweeps, movement, "sweep complete");
        if movement < self.tolerance {
            info!(movement, tolerance = self.tolerance, "converged; shutting down");
            self.finished = true;
        } else {
            self.curve.begin_sweep();
        }
    }

    /// The lowest-index interior node that is still movable this sweep and
    /// not within one node of any outstanding task.
    fn select_node(&self) -> Option<usize> {
        (1..=self.curve.interior_count())
            .find(|&i| !self.curve.node_moved(i) && !self.near_outstanding_task(i))
    }

    fn near_outstanding_task(&self, index: usize) -> bool {
        self.workers.values().any(|state| {
            matches!(state, WorkerState::Busy { node, .. } if node.abs_diff(index) <= 1)
        })
    }

    fn close_record(&mut self, worker: &str, node: usize, now: Instant) {
        if let Some(record) = self
            .log
            .iter_mut()
            .rev()
            .find(|r| r.worker == worker && r.node == node && r.closed_at.is_none())
        {
            record.closed_at = Some(now);
        }
    }
}
