// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Strong-Wolfe line search in reverse-communication style.
//!
//! The search never evaluates the objective itself; it proposes step
//! lengths and is fed (φ, φ′) back, so the caller controls where the
//! expensive metric batches happen. Bracketing doubles the step until the
//! minimum is bracketed, then a bisection zoom narrows the bracket until
//! the strong Wolfe conditions
//!
//! ```text
//! φ(α) ≤ φ(0) + c₁·α·φ′(0)      (sufficient decrease)
//! |φ′(α)| ≤ c₂·|φ′(0)|          (curvature)
//! ```
//!
//! hold, or the trial budget runs out.

/// Parameters of the strong-Wolfe search.
#[derive(Debug, Clone, Copy)]
pub struct WolfeParams {
    /// Sufficient-decrease constant c₁.
    pub c1: f64,
    /// Curvature constant c₂.
    pub c2: f64,
    /// Maximum number of objective evaluations per search.
    pub max_trials: usize,
    /// First step length proposed.
    pub initial_step: f64,
    /// Largest step length ever proposed.
    pub max_step: f64,
    /// Bracket width below which the search gives up.
    pub min_width: f64,
}

impl Default for WolfeParams {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            c2: 0.9,
            max_trials: 30,
            initial_step: 1.0,
            max_step: 50.0,
            min_width: 1e-14,
        }
    }
}

/// How a search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// A step satisfying both Wolfe conditions was found.
    Converged,
    /// The trial budget was exhausted first.
    Exhausted,
    /// The search cannot make progress (non-descent direction, collapsed
    /// bracket, or step limit hit while still extending).
    Failed,
}

/// What the caller must do next.
#[derive(Debug, Clone, Copy)]
pub enum SearchStep {
    /// Evaluate φ and φ′ at this step length and feed them to
    /// [`LineSearch::advance`].
    Evaluate(f64),
    /// The search is over. `step` is meaningful only for
    /// [`SearchStatus::Converged`].
    Finished {
        /// The accepted step length.
        step: f64,
        /// Why the search stopped.
        status: SearchStatus,
    },
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    alpha: f64,
    phi: f64,
    derphi: f64,
}

#[derive(Debug)]
enum State {
    Bracketing { prev: Sample, first: bool },
    Zooming { lo: Sample, hi: Sample },
    Done,
}

/// One strong-Wolfe search along a fixed descent direction.
#[derive(Debug)]
pub struct LineSearch {
    params: WolfeParams,
    phi0: f64,
    derphi0: f64,
    trials: usize,
    proposed: f64,
    state: State,
}

impl LineSearch {
    /// Begin a search given φ(0) and φ′(0). Returns the search and the
    /// first action; a non-descent direction fails immediately.
    pub fn new(phi0: f64, derphi0: f64, params: WolfeParams) -> (Self, SearchStep) {
        if derphi0 >= 0.0 || !derphi0.is_finite() {
            let search = Self {
                params,
                phi0,
                derphi0,
                trials: 0,
                proposed: 0.0,
                state: State::Done,
            };
            return (
                search,
                SearchStep::Finished {
                    step: 0.0,
                    status: SearchStatus::Failed,
                },
            );
        }
        let proposed = params.initial_step;
        let search = Self {
            params,
            phi0,
            derphi0,
            trials: 0,
            proposed,
            state: State::Bracketing {
                prev: Sample {
                    alpha: 0.0,
                    phi: phi0,
                    derphi: derphi0,
                },
                first: true,
            },
        };
        (search, SearchStep::Evaluate(proposed))
    }

    fn sufficient_decrease(&self, sample: &Sample) -> bool {
        sample.phi <= self.phi0 + self.params.c1 * sample.alpha * self.derphi0
    }

    fn curvature(&self, sample: &Sample) -> bool {
        sample.derphi.abs() <= -self.params.c2 * self.derphi0
    }

    fn finish(&mut self, step: f64, status: SearchStatus) -> SearchStep {
        self.state = State::Done;
        SearchStep::Finished { step, status }
    }

    fn propose(&mut self, alpha: f64) -> SearchStep {
        if self.trials >= self.params.max_trials {
            return self.finish(0.0, SearchStatus::Exhausted);
        }
        self.proposed = alpha;
        SearchStep::Evaluate(alpha)
    }

    /// Feed back (φ, φ′) at the last proposed step.
    pub fn advance(&mut self, phi: f64, derphi: f64) -> SearchStep {
        self.trials += 1;
        let sample = Sample {
            alpha: self.proposed,
            phi,
            derphi,
        };

        match std::mem::replace(&mut self.state, State::Done) {
            State::Bracketing { prev, first } => {
                if !phi.is_finite() {
                    // Step overshot into a non-finite region; bisect back.
                    self.state = State::Zooming {
                        lo: prev,
                        hi: sample,
                    };
                    return self.propose(0.5 * (prev.alpha + sample.alpha));
                }
                if !self.sufficient_decrease(&sample) || (!first && phi >= prev.phi) {
                    self.state = State::Zooming {
                        lo: prev,
                        hi: sample,
                    };
                    return self.propose(0.5 * (prev.alpha + sample.alpha));
                }
                if self.curvature(&sample) {
                    return self.finish(sample.alpha, SearchStatus::Converged);
                }
                if derphi >= 0.0 {
                    self.state = State::Zooming {
                        lo: sample,
                        hi: prev,
                    };
                    return self.propose(0.5 * (prev.alpha + sample.alpha));
                }
                if sample.alpha >= self.params.max_step {
                    return self.finish(sample.alpha, SearchStatus::Failed);
                }
                self.state = State::Bracketing {
                    prev: sample,
                    first: false,
                };
                let next = (2.0 * sample.alpha).min(self.params.max_step);
                self.propose(next)
            }
            State::Zooming { lo, hi } => {
                let (lo, hi) = if !phi.is_finite()
                    || !self.sufficient_decrease(&sample)
                    || phi >= lo.phi
                {
                    (lo, sample)
                } else {
                    if self.curvature(&sample) {
                        return self.finish(sample.alpha, SearchStatus::Converged);
                    }
                    if derphi * (hi.alpha - lo.alpha) >= 0.0 {
                        (sample, lo)
                    } else {
                        (sample, hi)
                    }
                };
                let width = (hi.alpha - lo.alpha).abs();
                if width < self.params.min_width * lo.alpha.abs().max(1.0) {
                    return self.finish(lo.alpha, SearchStatus::Failed);
                }
                self.state = State::Zooming { lo, hi };
                self.propose(0.5 * (lo.alpha + hi.alpha))
            }
            State::Done => SearchStep::Finished {
                step: 0.0,
                status: SearchStatus::Failed,
            },
        }
    }
}
