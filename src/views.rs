//! Observation views: timed, event and finish sampling over simulator
//! output ports, each writing typed records to an output sink.
//!
//! Three observation kinds, matching VLE's timed/event/finish
//! distinction though no `devs::View` header made it into this pack: a
//! view never calls a transition, only `observation(t, port)`; a
//! `Timed` view's next-sample time advances by
//! a fixed period and may need several steps to catch up with a bag that
//! jumped past more than one sample; an `Event` view fires once per
//! matching external-event arrival; a `Finish` view fires exactly once,
//! from `coordinator.finish()`.

use crate::error::EngineError;
use crate::time::{Duration, Time};
use crate::value::Value;

/// One sampled record: the time, the simulator it came from, the port,
/// and the observed value.
#[derive(Clone, Debug)]
pub struct Record {
    pub time: Time,
    pub source: String,
    pub port: String,
    pub value: Value,
}

/// The sink a view writes its records to. An opaque interface from the
/// core's perspective — in-memory buffers, CSV writers, whatever an
/// embedding application needs — matching the project's own pluggable
/// output-sink design.
pub trait Sink: Send {
    fn open(&mut self) {}

    fn write_row(&mut self, record: Record) -> Result<(), String>;

    fn flush(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Closes the sink and returns its accumulated artifact: an
    /// in-memory matrix, a file path, whatever the concrete sink
    /// produces. The default returns nothing, for sinks whose side
    /// effect (e.g. writing to a file already on disk) is the artifact.
    fn close(&mut self) -> Option<Box<dyn std::any::Any + Send>> {
        None
    }
}

/// An in-memory sink that simply accumulates every record; the obvious
/// default for tests and for callers that just want the samples back.
#[derive(Default)]
pub struct VecSink {
    pub records: Vec<Record>,
}

impl Sink for VecSink {
    fn write_row(&mut self, record: Record) -> Result<(), String> {
        self.records.push(record);
        Ok(())
    }

    fn close(&mut self) -> Option<Box<dyn std::any::Any + Send>> {
        Some(Box::new(std::mem::take(&mut self.records)))
    }
}

/// What triggers a view's samples.
pub enum ViewKind {
    /// Fires at `t_start, t_start + period, t_start + 2*period, ...`
    /// within `[t_start, t_end]`.
    Timed { period: Duration, next: Time },
    /// Fires once per external-event arrival on an attached port.
    Event,
    /// Fires exactly once, at `t_end`, from `coordinator.finish()`.
    Finish,
}

/// A named observation stream: a kind, a sink, and the simulator/port
/// pairs it samples. Owned by the coordinator, never by a simulator.
pub struct View {
    pub name: String,
    pub kind: ViewKind,
    pub sink: Box<dyn Sink>,
    pub attachments: Vec<(usize, String)>,
    detached: bool,
}

impl View {
    pub fn timed(
        name: impl Into<String>,
        t_start: Time,
        period: Duration,
        sink: Box<dyn Sink>,
    ) -> Self {
        assert!(period.as_f64() > 0.0, "a Timed view needs period > 0");
        View {
            name: name.into(),
            kind: ViewKind::Timed {
                period,
                next: t_start,
            },
            sink,
            attachments: Vec::new(),
            detached: false,
        }
    }

    pub fn event(name: impl Into<String>, sink: Box<dyn Sink>) -> Self {
        View {
            name: name.into(),
            kind: ViewKind::Event,
            sink,
            attachments: Vec::new(),
            detached: false,
        }
    }

    pub fn finish(name: impl Into<String>, sink: Box<dyn Sink>) -> Self {
        View {
            name: name.into(),
            kind: ViewKind::Finish,
            sink,
            attachments: Vec::new(),
            detached: false,
        }
    }

    pub fn attach(&mut self, simulator: usize, port: impl Into<String>) -> &mut Self {
        self.attachments.push((simulator, port.into()));
        self
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// A `Sink::write_row` failure detaches the view (logged, not
    /// fatal) rather than aborting the run, per the error taxonomy's
    /// `SinkError`.
    fn detach(&mut self, time: Time, reason: &str) {
        if !self.detached {
            tracing::warn!(view = %self.name, %time, reason, "view sink failed, detaching");
            self.detached = true;
        }
    }

    /// Removes any attachment referring to `simulator`, e.g. because an
    /// executive mutation removed it. Per §4.8 this is a warning, not a
    /// `GraphError`.
    pub fn detach_simulator(&mut self, simulator: usize) {
        let before = self.attachments.len();
        self.attachments.retain(|(s, _)| *s != simulator);
        if self.attachments.len() != before {
            tracing::warn!(view = %self.name, simulator, "detached removed simulator from view");
        }
    }

    fn write(&mut self, record: Record) {
        if self.detached {
            return;
        }
        if let Err(e) = self.sink.write_row(record.clone()) {
            self.detach(record.time, &e);
        }
    }
}

/// Samples every attachment of a `Timed` view whose `next <= t`,
/// advancing `next` by `period` until it exceeds `t`. `observe` is the
/// coordinator's per-(simulator, port) observation callback, returning
/// the owning simulator's name (the record's `source`) alongside the
/// observed value, so this module never reaches into simulator
/// internals directly.
pub fn dispatch_timed<F>(view: &mut View, t: Time, mut observe: F) -> Result<(), EngineError>
where
    F: FnMut(usize, &str, Time) -> Result<(String, Value), EngineError>,
{
    let (period, mut next) = match view.kind {
        ViewKind::Timed { period, next } => (period, next),
        _ => return Ok(()),
    };
    while next <= t {
        let sample_t = next;
        let attachments = view.attachments.clone();
        for (sim, port) in &attachments {
            let (source, value) = observe(*sim, port, sample_t)?;
            view.write(Record {
                time: sample_t,
                source,
                port: port.clone(),
                value,
            });
        }
        next = next.add(period);
    }
    if let ViewKind::Timed { next: n, .. } = &mut view.kind {
        *n = next;
    }
    Ok(())
}

/// Samples an `Event` view's attachments that match a routed external
/// event's `(simulator, port)`. `source` is the destination simulator's
/// name, recorded alongside the port it arrived on.
pub fn dispatch_event(view: &mut View, t: Time, sim: usize, port: &str, source: &str, value: Value) {
    if !matches!(view.kind, ViewKind::Event) {
        return;
    }
    if view.attachments.iter().any(|(s, p)| *s == sim && p == port) {
        view.write(Record {
            time: t,
            source: source.to_string(),
            port: port.to_string(),
            value,
        });
    }
}

/// Samples every attachment of a `Finish` view once, at `t_end`. Called
/// only from `coordinator.finish()`.
pub fn dispatch_finish<F>(view: &mut View, t_end: Time, mut observe: F) -> Result<(), EngineError>
where
    F: FnMut(usize, &str, Time) -> Result<(String, Value), EngineError>,
{
    if !matches!(view.kind, ViewKind::Finish) {
        return Ok(());
    }
    let attachments = view.attachments.clone();
    for (sim, port) in &attachments {
        let (source, value) = observe(*sim, port, t_end)?;
        view.write(Record {
            time: t_end,
            source,
            port: port.clone(),
            value,
        });
    }
    Ok(())
}

/// Closes every view's sink and collects the resulting artifacts, keyed
/// by view name. A view with no artifact (sink never opened, or every
/// write failed and it detached before producing one) is simply absent
/// from the map, per §7's `SinkError` handling.
pub fn close_all(views: &mut [View]) -> std::collections::HashMap<String, Box<dyn std::any::Any + Send>> {
    let mut out = std::collections::HashMap::new();
    for view in views.iter_mut() {
        if let Some(artifact) = view.sink.close() {
            out.insert(view.name.clone(), artifact);
        }
    }
    out
}
