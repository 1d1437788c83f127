//! The operation set the kernel expects from a user atomic model.
//!
//! This is the fixed contract every atomic dynamic implements: `init`,
//! `time_advance`, `output`, the three transition functions, `observation`
//! and `finish`. The kernel calls these; it never inspects a dynamic's
//! internal state any other way.

use crate::time::Time;
use crate::value::Value;

/// One event produced by a dynamic's output function: the name of the
/// port it was emitted on, and the value carried.
#[derive(Clone, Debug)]
pub struct OutputEvent {
    pub port: String,
    pub value: Value,
}

impl OutputEvent {
    pub fn new(port: impl Into<String>, value: Value) -> Self {
        OutputEvent {
            port: port.into(),
            value,
        }
    }
}

/// One externally-arrived event delivered to a dynamic's external or
/// confluent transition: the input port it arrived on and the value.
#[derive(Clone, Debug)]
pub struct ExternalEvent {
    pub port: String,
    pub value: Value,
}

impl ExternalEvent {
    pub fn new(port: impl Into<String>, value: Value) -> Self {
        ExternalEvent {
            port: port.into(),
            value,
        }
    }
}

/// The capability interface every atomic model implements.
///
/// Default `confluent_transition` applies the default conflict-resolution
/// policy: external transition first, then internal transition, both at
/// the same `t`. A dynamic that needs a different ordering overrides it.
pub trait Dynamics: Send {
    /// Initial setup; returns the duration to the first internal event.
    ///
    /// Returns a raw `f64` rather than [`Duration`] because the kernel
    /// must be able to validate this boundary-crossing value instead of
    /// trusting it: a negative result is a modelling contract violation
    /// the simulator reports as an `EngineError::Modelling` fault, not a
    /// panic. `Duration`'s own constructor enforces non-negativity for
    /// kernel-internal arithmetic, where the invariant always holds.
    fn init(&mut self, t: Time) -> f64;

    /// Current state's time-advance. Called after every transition to
    /// compute the next scheduled time. Same validation note as `init`.
    fn time_advance(&self) -> f64;

    /// Produces this bag's output events. Must not mutate state; called
    /// only when this dynamic has a due internal event.
    fn output(&self, t: Time) -> Vec<OutputEvent>;

    /// State change at a due internal event, no externals pending.
    fn internal_transition(&mut self, t: Time);

    /// State change driven by externally arrived events, no internal
    /// event due.
    fn external_transition(&mut self, t: Time, externals: &[ExternalEvent]);

    /// State change when an internal event and external events coincide
    /// at the same time. Default: external transition, then internal
    /// transition.
    fn confluent_transition(&mut self, t: Time, externals: &[ExternalEvent]) {
        self.external_transition(t, externals);
        self.internal_transition(t);
    }

    /// Side-effect-free state query used by observation views. `None`
    /// signals a contract violation (a declared port with nothing to
    /// report) and is reported as a `ModellingError` by the caller.
    fn observation(&self, t: Time, port: &str) -> Option<Value>;

    /// Called exactly once, at simulation end.
    fn finish(&mut self) {}

    /// Exposes the [`Executive`] capability if this dynamic implements
    /// it. Reframes the source's virtual-inheritance "is this simulator
    /// an executive?" runtime test as an ordinary optional-capability
    /// method: an executive dynamic overrides this to return `Some(self)`,
    /// everything else keeps the default `None`. Checked once at load
    /// time and cached on the [`crate::simulator::Simulator`] rather than
    /// called every bag.
    fn as_executive_mut(&mut self) -> Option<&mut dyn Executive> {
        None
    }
}

/// A request to mutate the model graph, raised by an executive dynamic
/// and applied by the coordinator in the dedicated executive phase of the
/// bag cycle rather than in-line during a transition.
#[derive(Clone, Debug)]
pub enum GraphMutation {
    AddAtomic {
        parent: String,
        spec: crate::model::AtomicSpec,
    },
    RemoveAtomic {
        name: String,
    },
    /// Adds an entire coupled subtree, identified by `spec.name` for a
    /// later `RemoveCoupledChild`. Every atomic leaf under it becomes a
    /// simulator and every internal connection is resolved down to
    /// atomic endpoints exactly as at load time (see
    /// [`crate::model::flatten`]).
    AddCoupledChild {
        parent: String,
        spec: crate::model::CoupledSpec,
    },
    /// Removes every simulator that was added as part of the coupled
    /// child named `name`, plus any connection touching them.
    RemoveCoupledChild {
        name: String,
    },
    AddConnection {
        src: (String, String),
        dst: (String, String),
    },
    RemoveConnection {
        src: (String, String),
        dst: (String, String),
    },
}

/// A dynamic that can additionally request graph mutations. The
/// coordinator queries this after `internal_transition`/
/// `external_transition`/`confluent_transition` returns, and only for
/// simulators it has classified as executives (see
/// [`crate::coordinator::Coordinator`]).
pub trait Executive: Dynamics {
    /// Drains and returns the mutations requested during the transition
    /// that just ran.
    fn executive_actions(&mut self) -> Vec<GraphMutation>;
}
