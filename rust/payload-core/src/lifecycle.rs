//! Lifecycle state machine.
//!
//! Pure bookkeeping: which directive is acceptable in which state, which
//! iteration the next loop body runs, and what to tell the coordinator when a
//! body completes. Launching and cancelling bodies is the runtime's job.

use std::fmt;

use crate::config::{CapBoundary, LifecycleConfig};
use crate::error::{PayloadError, Result};
use crate::protocol::LoopReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No Start directive received yet.
    Idle,
    /// Start accepted; control being applied.
    Starting,
    /// A loop body is executing.
    Running,
    /// Synchronized body finished and reported; waiting for Iterate.
    AwaitingNextIteration,
    Done,
    Failed,
    /// Absorbing.
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::AwaitingNextIteration => "awaiting next iteration",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What a completed loop body leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Synchronized mode: send this report.
    Report(LoopReport),
    /// Unsynchronized mode: the free-running body returned.
    Finished,
    /// The body was no longer current (terminated meanwhile).
    Stale,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    /// Iteration of the running body, or of the next one to run.
    iteration: u64,
    cap: u64,
    boundary: CapBoundary,
    synchronized: bool,
}

impl Lifecycle {
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            state: LifecycleState::Idle,
            iteration: config.iteration_base,
            cap: config.max_iterations,
            boundary: config.cap_boundary,
            synchronized: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn cap(&self) -> u64 {
        self.cap
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Claim a Start directive and return the state to restore if it is
    /// abandoned.
    ///
    /// Only one Start can be in flight: the state is `Starting` until
    /// [`start`](Self::start) or [`abort_start`](Self::abort_start).
    pub fn begin_start(&mut self) -> Result<LifecycleState> {
        match self.state {
            LifecycleState::Idle | LifecycleState::Done => {
                Ok(std::mem::replace(&mut self.state, LifecycleState::Starting))
            }
            state => Err(PayloadError::protocol_violation(format!(
                "Start received while {}",
                state
            ))),
        }
    }

    /// Give up a claimed Start. No-op if the payload was terminated meanwhile.
    pub fn abort_start(&mut self, previous: LifecycleState) {
        if self.state == LifecycleState::Starting {
            self.state = previous;
        }
    }

    /// Complete a claimed Start and return the iteration the body runs.
    pub fn start(&mut self, synchronized: bool, cap: u64) -> Result<u64> {
        if self.state != LifecycleState::Starting {
            return Err(PayloadError::protocol_violation(format!(
                "Start abandoned: payload is {}",
                self.state
            )));
        }
        self.synchronized = synchronized;
        self.cap = cap;
        self.state = LifecycleState::Running;
        Ok(self.iteration)
    }

    /// Accept an Iterate directive and return the iteration the body runs.
    pub fn iterate(&mut self) -> Result<u64> {
        if self.state != LifecycleState::AwaitingNextIteration {
            return Err(PayloadError::protocol_violation(format!(
                "Iterate received while {}",
                self.state
            )));
        }
        self.state = LifecycleState::Running;
        Ok(self.iteration)
    }

    /// Record that the running body returned normally.
    ///
    /// The state moves before the caller sends any report.
    pub fn finish_body(&mut self) -> Completion {
        if self.state != LifecycleState::Running {
            return Completion::Stale;
        }

        let completed = self.iteration;
        self.iteration += 1;

        if !self.synchronized {
            self.state = LifecycleState::Done;
            return Completion::Finished;
        }

        if self.reached_cap(completed) {
            self.state = LifecycleState::Done;
            Completion::Report(LoopReport::End(completed))
        } else {
            self.state = LifecycleState::AwaitingNextIteration;
            Completion::Report(LoopReport::ReadyForNextIteration(completed))
        }
    }

    /// Record a body failure. Returns false if the payload was already
    /// terminated, in which case nothing changes.
    pub fn fail(&mut self) -> bool {
        if self.state == LifecycleState::Terminated {
            return false;
        }
        self.state = LifecycleState::Failed;
        true
    }

    /// Move to `Terminated` and return the previous state.
    pub fn terminate(&mut self) -> LifecycleState {
        std::mem::replace(&mut self.state, LifecycleState::Terminated)
    }

    fn reached_cap(&self, completed: u64) -> bool {
        match self.boundary {
            CapBoundary::Inclusive => completed >= self.cap,
            CapBoundary::Exclusive => completed.saturating_add(1) >= self.cap,
        }
    }
}
