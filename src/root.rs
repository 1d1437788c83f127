//! The root driver: `load -> init -> loop(run) -> finish`, the crate's
//! single entry point for running a model to completion.
//!
//! Carries the terminal-time bound and the external stop flag the
//! coordinator itself has no notion of, matching VLE's split between a
//! `RootCoordinator` and its inner coordinator (no `RootCoordinator`
//! header was retrieved into this pack, so the split's shape here is
//! this crate's own design against SPEC_FULL, not a translation). This
//! is the only thing an embedding application needs to construct to
//! drive a simulation.

use crate::config::EngineConfig;
use crate::coordinator::{Artifacts, Coordinator};
use crate::error::EngineError;
use crate::model::ModelNode;
use crate::time::Time;
use crate::views::View;

/// Drives one simulation run to completion. Not reusable across models:
/// construct a fresh `Root` per run.
pub struct Root {
    coordinator: Coordinator,
    t0: Time,
    terminal_time: Option<Time>,
    stop: bool,
}

impl Root {
    pub fn new(config: EngineConfig) -> Self {
        let terminal_time = config.terminal_time;
        Root {
            coordinator: Coordinator::new(&config),
            t0: Time::ZERO,
            terminal_time,
            stop: false,
        }
    }

    /// Flattens `model` into the coordinator's simulator set and routing
    /// table. Must be called before [`Root::init`].
    pub fn load(&mut self, model: &ModelNode) -> &mut Self {
        self.coordinator.load(model);
        self
    }

    /// Registers a view and returns its index for later [`Root::attach`]
    /// calls. Must be called before [`Root::init`] so the view's sink is
    /// opened alongside everyone else's.
    pub fn add_view(&mut self, view: View) -> usize {
        self.coordinator.add_view(view)
    }

    pub fn attach(&mut self, view_idx: usize, simulator_name: &str, port: impl Into<String>) -> &mut Self {
        self.coordinator.attach(view_idx, simulator_name, port);
        self
    }

    /// Requests the run loop stop at the top of its next iteration. The
    /// scheduler is left consistent and a subsequent `finish()` still
    /// produces valid artifacts, matching §5's cancellation contract.
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    /// `t0` defaults to `Time::ZERO`; call before [`Root::init`] to start
    /// the simulation at a different initial time.
    pub fn with_start_time(mut self, t0: Time) -> Self {
        self.t0 = t0;
        self
    }

    /// True if calling `coordinator.run()` right now would have to
    /// process a bag beyond `bound`. Checked *before* each `run()` call
    /// rather than relying on `current_time()` afterwards, because a
    /// single `run()` call on an empty bag can jump `current_time`
    /// straight to the next scheduled event — which, absent this guard,
    /// could land arbitrarily far past `bound` and run a full bag cycle
    /// (including view samples) outside the terminal window the caller
    /// asked for.
    fn would_exceed_terminal(&mut self, bound: Time) -> bool {
        let pending = if self.coordinator.bag_is_empty() {
            self.coordinator.next_event_time()
        } else {
            self.coordinator.current_time()
        };
        pending > bound
    }

    /// Runs the model to completion: `init`, then `run()` until the
    /// schedule is exhausted, the terminal time bound is reached, or
    /// [`Root::request_stop`] was called, then `finish()`. On a fatal
    /// `EngineError` the loop stops immediately but `finish()` still
    /// runs, so already-initialised dynamics get their `finish()` call
    /// and open sinks are closed, per §7's abort contract; the error is
    /// then returned alongside whatever partial artifacts resulted.
    pub fn drive(&mut self) -> (Result<(), EngineError>, Artifacts, Vec<EngineError>) {
        let init_result = self.coordinator.init(self.t0);
        let run_result = match init_result {
            Err(e) => Err(e),
            Ok(()) => {
                let mut result = Ok(());
                loop {
                    if self.stop {
                        break;
                    }
                    if let Some(bound) = self.terminal_time {
                        if self.would_exceed_terminal(bound) {
                            break;
                        }
                    }
                    match self.coordinator.run() {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                result
            }
        };
        let t_end = self
            .terminal_time
            .unwrap_or_else(|| self.coordinator.current_time());
        let (artifacts, deferred) = self.coordinator.finish(t_end);
        (run_result, artifacts, deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::{Dynamics, ExternalEvent, OutputEvent};
    use crate::model::{AtomicSpec, CoupledSpec, DynamicsFactory};
    use crate::time::Duration;
    use crate::value::Value;
    use crate::views::{Record, VecSink};
    use std::sync::Arc;

    struct OneShot;
    impl Dynamics for OneShot {
        fn init(&mut self, _t: Time) -> f64 {
            10.0
        }
        fn time_advance(&self) -> f64 {
            f64::INFINITY
        }
        fn output(&self, _t: Time) -> Vec<OutputEvent> {
            vec![]
        }
        fn internal_transition(&mut self, _t: Time) {}
        fn external_transition(&mut self, _t: Time, _e: &[ExternalEvent]) {}
        fn observation(&self, _t: Time, _port: &str) -> Option<Value> {
            Some(Value::new(0i64))
        }
    }

    fn one_shot_factory() -> DynamicsFactory {
        Arc::new(|| Box::new(OneShot))
    }

    #[test]
    fn single_empty_dynamic_produces_eleven_timed_samples() {
        let mut top = CoupledSpec::new("top");
        top.add_component(AtomicSpec::new("s", one_shot_factory()).with_out_port("out"));
        let mut root = Root::new(EngineConfig::default().with_terminal_time(Time::new(10.0)));
        root.load(&top.into());
        let view_idx = root.add_view(View::timed(
            "v",
            Time::ZERO,
            Duration::new(1.0),
            Box::new(VecSink::default()),
        ));
        root.attach(view_idx, "s", "out");

        let (result, mut artifacts, deferred) = root.drive();
        assert!(result.is_ok());
        assert!(deferred.is_empty());
        let records = *artifacts.remove("v").unwrap().downcast::<Vec<Record>>().unwrap();
        assert_eq!(records.len(), 11);
        assert!(records.iter().all(|r| r.value.downcast_ref::<i64>() == Some(&0)));
    }
}
