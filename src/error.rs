//! The kernel's error taxonomy.
//!
//! `EngineError` is the single `Result` error type for every fallible
//! kernel operation. Variants split along the fatal/non-fatal line drawn
//! by the kernel's error handling design: `Modelling`, `Graph` and
//! `SchedulerInvariant` abort the run they occur in, while `Sink` and
//! `ExecutiveDeferred` are collected and reported alongside a run's
//! results instead of unwinding it.

use crate::time::Time;
use std::fmt;

/// The offending simulator, the time at which the fault was raised, and a
/// human-readable message. Shared by every [`EngineError`] variant so the
/// trace line a fault produces always has the same shape.
#[derive(Clone, Debug)]
pub struct Fault {
    pub simulator: String,
    pub time: Time,
    pub message: String,
}

impl Fault {
    pub fn new(simulator: impl Into<String>, time: Time, message: impl Into<String>) -> Self {
        Fault {
            simulator: simulator.into(),
            time,
            message: message.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ t={}: {}", self.simulator, self.time, self.message)
    }
}

/// Errors a running kernel can produce.
///
/// `Modelling`, `Graph` and `SchedulerInvariant` are fatal: they propagate
/// out of [`crate::coordinator::Coordinator::run`] as an `Err` and abort
/// the current run after an attempt to call `finish()` on every dynamic
/// already initialised. `Sink` and `ExecutiveDeferred` are non-fatal: the
/// kernel logs them through `tracing` and accumulates them for the
/// caller instead of returning them as an `Err`.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EngineError {
    /// A user dynamic violated its contract: negative time-advance,
    /// output on an undeclared port, or a declared observation port that
    /// returned nothing.
    #[error("modelling error: {0}")]
    Modelling(Fault),

    /// An executive mutation referenced an unknown model, or would leave
    /// a dangling connection, discovered while the mutation was being
    /// validated (as opposed to applied — see `ExecutiveDeferred`).
    #[error("graph error: {0}")]
    Graph(Fault),

    /// An internal scheduler invariant was violated. Always indicates a
    /// kernel bug; no recovery is attempted.
    #[error("scheduler invariant violated: {0}")]
    SchedulerInvariant(Fault),

    /// An observation sink reported an I/O failure. The offending view is
    /// detached and the simulation continues.
    #[error("sink error: {0}")]
    Sink(Fault),

    /// A queued executive mutation failed when it was applied in the
    /// executive phase (e.g. removing a model that no longer exists).
    /// The mutation is skipped and the simulation continues.
    #[error("executive mutation deferred-apply error: {0}")]
    ExecutiveDeferred(Fault),
}

impl EngineError {
    pub fn fault(&self) -> &Fault {
        match self {
            EngineError::Modelling(f)
            | EngineError::Graph(f)
            | EngineError::SchedulerInvariant(f)
            | EngineError::Sink(f)
            | EngineError::ExecutiveDeferred(f) => f,
        }
    }

    /// Fatal variants abort the run; non-fatal ones are logged and
    /// collected alongside it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Modelling(_) | EngineError::Graph(_) | EngineError::SchedulerInvariant(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
