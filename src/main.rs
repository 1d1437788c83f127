//! A small demonstration binary: a generator feeding a counter, run for
//! a configurable number of time units, with the counter's samples
//! printed to stdout. Exercises the same `Root` surface an embedding
//! application would use; it is not the project's command-line
//! front-end (out of scope, per the crate's own non-goals).

use std::env;
use std::sync::Arc;

use devs_kernel::{
    AtomicSpec, CoupledSpec, Dynamics, Duration, DynamicsFactory, EngineConfig, ExternalEvent,
    OutputEvent, Root, Time, Value, View,
};

struct Generator {
    period: f64,
}

impl Dynamics for Generator {
    fn init(&mut self, _t: Time) -> f64 {
        self.period
    }
    fn time_advance(&self) -> f64 {
        self.period
    }
    fn output(&self, _t: Time) -> Vec<OutputEvent> {
        vec![OutputEvent::new("out", Value::new(1i64))]
    }
    fn internal_transition(&mut self, _t: Time) {}
    fn external_transition(&mut self, _t: Time, _externals: &[ExternalEvent]) {}
    fn observation(&self, _t: Time, _port: &str) -> Option<Value> {
        Some(Value::new(1i64))
    }
}

struct Counter {
    value: i64,
}

impl Dynamics for Counter {
    fn init(&mut self, _t: Time) -> f64 {
        f64::INFINITY
    }
    fn time_advance(&self) -> f64 {
        f64::INFINITY
    }
    fn output(&self, _t: Time) -> Vec<OutputEvent> {
        vec![]
    }
    fn internal_transition(&mut self, _t: Time) {}
    fn external_transition(&mut self, _t: Time, externals: &[ExternalEvent]) {
        self.value += externals.len() as i64;
    }
    fn observation(&self, _t: Time, _port: &str) -> Option<Value> {
        Some(Value::new(self.value))
    }
}

fn generator_factory(period: f64) -> DynamicsFactory {
    Arc::new(move || Box::new(Generator { period }) as Box<dyn Dynamics>)
}

fn counter_factory() -> DynamicsFactory {
    Arc::new(|| Box::new(Counter { value: 0 }) as Box<dyn Dynamics>)
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let terminal_time: f64 = args
        .get(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100.0);

    let mut top = CoupledSpec::new("top");
    top.add_component(AtomicSpec::new("g", generator_factory(1.0)).with_out_port("out"));
    top.add_component(AtomicSpec::new("c", counter_factory()).with_in_port("count"));
    top.add_ic("g", "out", "c", "count");

    let config = EngineConfig::default().with_terminal_time(Time::new(terminal_time));
    let mut root = Root::new(config);
    root.load(&top.into());
    let view_idx = root.add_view(View::timed(
        "count",
        Time::ZERO,
        Duration::new(10.0),
        Box::new(devs_kernel::views::VecSink::default()),
    ));
    root.attach(view_idx, "c", "count");

    let (result, mut artifacts, deferred) = root.drive();
    if let Err(e) = result {
        eprintln!("simulation aborted: {e}");
        std::process::exit(1);
    }
    for e in deferred {
        eprintln!("deferred: {e}");
    }
    if let Some(records) = artifacts.remove("count") {
        if let Ok(records) = records.downcast::<Vec<devs_kernel::views::Record>>() {
            for r in records.iter() {
                println!("t={} {}:{} = {:?}", r.time, r.source, r.port, r.value);
            }
        }
    }
}
