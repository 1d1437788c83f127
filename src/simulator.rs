//! The simulator: a single atomic model wrapped with the bookkeeping the
//! scheduler and coordinator need to drive it.
//!
//! Grounded on VLE's `devs::Simulator` (`Simulator.hpp`/`.cpp`): a
//! `timeAdvance` that rejects a negative duration, separate internal,
//! external and confluent transition entry points, and a pending external
//! event bag that the coordinator fills during routing and the simulator
//! itself drains and clears on every transition.

use crate::dynamics::{Dynamics, ExternalEvent, OutputEvent};
use crate::error::{EngineError, Fault};
use crate::time::{Duration, Time};

/// Which transition is due for a simulator in the current bag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    Internal,
    External,
    Confluent,
}

/// One atomic model plus its scheduling state.
///
/// Simulators are owned by the [`crate::coordinator::Coordinator`] in a
/// flat `Vec`; a [`crate::scheduler::Scheduler`] entry refers to one by
/// index rather than by pointer, so removing a simulator (an executive
/// mutation) never invalidates another simulator's reference.
pub struct Simulator {
    pub name: String,
    dynamics: Box<dyn Dynamics>,
    last_time: Time,
    next_time: Time,
    pending_externals: Vec<ExternalEvent>,
    has_internal_event: bool,
}

impl Simulator {
    pub fn new(name: impl Into<String>, dynamics: Box<dyn Dynamics>) -> Self {
        Simulator {
            name: name.into(),
            dynamics,
            last_time: Time::NEG_INFINITY,
            next_time: Time::INFINITY,
            pending_externals: Vec::new(),
            has_internal_event: false,
        }
    }

    pub fn next_time(&self) -> Time {
        self.next_time
    }

    pub fn has_pending_externals(&self) -> bool {
        !self.pending_externals.is_empty()
    }

    pub fn has_internal_event(&self) -> bool {
        self.has_internal_event
    }

    pub fn set_has_internal_event(&mut self, v: bool) {
        self.has_internal_event = v;
    }

    /// The transition kind this simulator must run in the current bag,
    /// given that it is a member of it.
    pub fn transition_kind(&self) -> TransitionKind {
        match (self.has_internal_event, self.has_pending_externals()) {
            (true, true) => TransitionKind::Confluent,
            (true, false) => TransitionKind::Internal,
            (false, _) => TransitionKind::External,
        }
    }

    pub fn init(&mut self, t: Time) -> Result<(), EngineError> {
        let raw = self.dynamics.init(t);
        let d = Duration::try_new(raw).ok_or_else(|| {
            EngineError::Modelling(Fault::new(
                self.name.clone(),
                t,
                format!("init returned a negative duration: {raw}"),
            ))
        })?;
        self.last_time = t;
        self.next_time = t.add(d);
        self.pending_externals.clear();
        Ok(())
    }

    pub fn finish(&mut self) {
        self.dynamics.finish();
    }

    /// Appends this simulator's output events, tagged with its own name
    /// as source, into `out`.
    pub fn output(&self, t: Time, out: &mut Vec<(String, OutputEvent)>) {
        for ev in self.dynamics.output(t) {
            out.push((self.name.clone(), ev));
        }
    }

    pub fn add_external_event(&mut self, port: impl Into<String>, value: crate::value::Value) {
        self.pending_externals
            .push(ExternalEvent::new(port, value));
    }

    /// Drives whichever transition `transition_kind` selects, then
    /// recomputes `next_time`. Returns a `ModellingError` fault if the
    /// dynamic reports a negative time-advance.
    pub fn transition(&mut self, t: Time) -> Result<(), EngineError> {
        match self.transition_kind() {
            TransitionKind::Internal => self.dynamics.internal_transition(t),
            TransitionKind::External => {
                self.dynamics.external_transition(t, &self.pending_externals)
            }
            TransitionKind::Confluent => self
                .dynamics
                .confluent_transition(t, &self.pending_externals),
        }
        self.pending_externals.clear();
        self.has_internal_event = false;
        let raw = self.dynamics.time_advance();
        let ta = Duration::try_new(raw).ok_or_else(|| {
            EngineError::Modelling(Fault::new(
                self.name.clone(),
                t,
                format!("time_advance returned a negative duration: {raw}"),
            ))
        })?;
        self.last_time = t;
        self.next_time = t.add(ta);
        Ok(())
    }

    pub fn observation(&self, t: Time, port: &str) -> Result<crate::value::Value, EngineError> {
        self.dynamics.observation(t, port).ok_or_else(|| {
            EngineError::Modelling(Fault::new(
                self.name.clone(),
                t,
                format!("observation on declared port '{port}' returned nothing"),
            ))
        })
    }

    pub fn last_time(&self) -> Time {
        self.last_time
    }

    /// Whether this simulator's dynamic implements the `Executive`
    /// capability. Checked once at load time; see
    /// [`crate::dynamics::Dynamics::as_executive_mut`].
    pub fn is_executive(&mut self) -> bool {
        self.dynamics.as_executive_mut().is_some()
    }

    /// Drains the executive mutations requested during the transition
    /// that just ran, if this simulator is an executive. Returns `None`
    /// for an ordinary dynamic.
    pub fn executive_actions(&mut self) -> Option<Vec<crate::dynamics::GraphMutation>> {
        self.dynamics
            .as_executive_mut()
            .map(|e| e.executive_actions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    struct Counter {
        value: i64,
        ta: f64,
    }

    impl Dynamics for Counter {
        fn init(&mut self, _t: Time) -> f64 {
            self.ta
        }
        fn time_advance(&self) -> f64 {
            self.ta
        }
        fn output(&self, _t: Time) -> Vec<OutputEvent> {
            vec![OutputEvent::new("out", Value::new(self.value))]
        }
        fn internal_transition(&mut self, _t: Time) {
            self.value += 1;
        }
        fn external_transition(&mut self, _t: Time, externals: &[ExternalEvent]) {
            self.value += externals.len() as i64;
        }
        fn observation(&self, _t: Time, _port: &str) -> Option<Value> {
            Some(Value::new(self.value))
        }
    }

    fn counter(ta: f64) -> Simulator {
        let mut sim = Simulator::new("c", Box::new(Counter { value: 0, ta }));
        sim.init(Time::ZERO).unwrap();
        sim
    }

    #[test]
    fn internal_only_when_no_externals_pending() {
        let mut sim = counter(1.0);
        sim.set_has_internal_event(true);
        assert_eq!(sim.transition_kind(), TransitionKind::Internal);
        sim.transition(Time::new(1.0)).unwrap();
        assert_eq!(sim.next_time(), Time::new(2.0));
    }

    #[test]
    fn external_only_when_not_due() {
        let mut sim = counter(100.0);
        sim.add_external_event("in", Value::new(1i64));
        assert_eq!(sim.transition_kind(), TransitionKind::External);
        sim.transition(Time::new(5.0)).unwrap();
        assert!(!sim.has_pending_externals());
        assert_eq!(sim.next_time(), Time::new(105.0));
    }

    #[test]
    fn confluent_when_both_pending() {
        let mut sim = counter(1.0);
        sim.set_has_internal_event(true);
        sim.add_external_event("in", Value::new(1i64));
        assert_eq!(sim.transition_kind(), TransitionKind::Confluent);
        sim.transition(Time::new(1.0)).unwrap();
        assert_eq!(sim.next_time(), Time::new(2.0));
    }

    struct BadDynamics {
        ta_after_init: f64,
    }
    impl Dynamics for BadDynamics {
        fn init(&mut self, _t: Time) -> f64 {
            0.0
        }
        fn time_advance(&self) -> f64 {
            self.ta_after_init
        }
        fn output(&self, _t: Time) -> Vec<OutputEvent> {
            vec![]
        }
        fn internal_transition(&mut self, _t: Time) {}
        fn external_transition(&mut self, _t: Time, _e: &[ExternalEvent]) {}
        fn observation(&self, _t: Time, _port: &str) -> Option<Value> {
            None
        }
    }

    #[test]
    fn negative_time_advance_after_transition_is_a_modelling_error() {
        let mut sim = Simulator::new(
            "bad",
            Box::new(BadDynamics {
                ta_after_init: -1.0,
            }),
        );
        sim.init(Time::ZERO).unwrap();
        sim.set_has_internal_event(true);
        let err = sim.transition(Time::ZERO).unwrap_err();
        assert!(matches!(err, EngineError::Modelling(_)));
    }

    #[test]
    fn negative_time_advance_from_init_is_a_modelling_error() {
        let mut sim = Simulator::new("bad", Box::new(NegativeInit));
        let err = sim.init(Time::ZERO).unwrap_err();
        assert!(matches!(err, EngineError::Modelling(_)));
    }

    struct NegativeInit;
    impl Dynamics for NegativeInit {
        fn init(&mut self, _t: Time) -> f64 {
            -5.0
        }
        fn time_advance(&self) -> f64 {
            0.0
        }
        fn output(&self, _t: Time) -> Vec<OutputEvent> {
            vec![]
        }
        fn internal_transition(&mut self, _t: Time) {}
        fn external_transition(&mut self, _t: Time, _e: &[ExternalEvent]) {}
        fn observation(&self, _t: Time, _port: &str) -> Option<Value> {
            None
        }
    }

    #[test]
    fn declared_observation_returning_none_is_a_modelling_error() {
        let mut sim = Simulator::new("silent", Box::new(BadDynamics { ta_after_init: 0.0 }));
        sim.init(Time::ZERO).unwrap();
        let err = sim.observation(Time::ZERO, "out").unwrap_err();
        assert!(matches!(err, EngineError::Modelling(_)));
    }
}
