//! The coordinator: flattens a model hierarchy into simulators, routes
//! output events to inputs, drives the bag cycle, hosts the executive
//! bridge and dispatches observation views.
//!
//! Grounded on VLE's `devs::Coordinator` (`Coordinator.hpp`/`.cpp`), with
//! the ownership reframed per §9: simulators live in one contiguous
//! `Vec<Option<Simulator>>` rather than behind raw cross-pointers, indexed
//! by a stable `usize` a removal merely tombstones (sets to `None`)
//! instead of swap-removing, so neither the scheduler, the routing table
//! nor a view attachment is ever invalidated by someone else's removal.
//! The routing table and the `coupled_members` ownership map are likewise
//! keyed by that same stable index.

use std::any::Any;
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::dynamics::GraphMutation;
use crate::error::{EngineError, Fault};
use crate::executive::ExecutiveBridge;
use crate::model::{AtomicSpec, ModelNode};
use crate::scheduler::Scheduler;
use crate::simulator::Simulator;
use crate::time::Time;
use crate::value::Value;
use crate::views::View;
use crate::worker_pool::WorkerPool;

/// Every artifact a run produced, keyed by view name (see
/// [`crate::views::close_all`]).
pub type Artifacts = HashMap<String, Box<dyn Any + Send>>;

fn to_executive_deferred(e: EngineError) -> EngineError {
    EngineError::ExecutiveDeferred(e.fault().clone())
}

/// Owns the flattened simulator vector, the routing table, the scheduler,
/// the view set, the worker pool and the executive bridge.
pub struct Coordinator {
    sims: Vec<Option<Simulator>>,
    names: HashMap<String, usize>,
    is_executive: Vec<bool>,
    /// `(srcSim, srcPort) -> [(dstSim, dstPort)]`, resolved to atomic
    /// endpoints at load/mutation time; read during routing, written only
    /// by the driver thread (load or the executive phase).
    routing: HashMap<(usize, String), Vec<(usize, String)>>,
    /// Which simulator indices were added as part of a given coupled
    /// child, keyed by that child's own name, so `RemoveCoupledChild` can
    /// remove every one of them in one step.
    coupled_members: HashMap<String, Vec<usize>>,
    scheduler: Scheduler,
    views: Vec<View>,
    pool: WorkerPool,
    bridge: ExecutiveBridge,
    deferred: Vec<EngineError>,
}

impl Coordinator {
    pub fn new(config: &EngineConfig) -> Self {
        Coordinator {
            sims: Vec::new(),
            names: HashMap::new(),
            is_executive: Vec::new(),
            routing: HashMap::new(),
            coupled_members: HashMap::new(),
            scheduler: Scheduler::new(),
            views: Vec::new(),
            pool: WorkerPool::new(config.workers, config.block_size),
            bridge: ExecutiveBridge::default(),
            deferred: Vec::new(),
        }
    }

    pub fn current_time(&self) -> Time {
        self.scheduler.current_time()
    }

    /// True if no bag is currently assembled, i.e. the next `run()` call
    /// will have to call `makeNextBag` before doing anything else.
    pub fn bag_is_empty(&self) -> bool {
        self.scheduler.bag().is_empty()
    }

    /// Peeks the earliest still-pending scheduler time without draining
    /// it into a bag. Meaningful only while [`Coordinator::bag_is_empty`]
    /// holds: it previews the time `run()` would jump `current_time()` to
    /// were it called right now, letting [`crate::root::Root`] stop before
    /// a terminal-time bound is crossed rather than after.
    pub fn next_event_time(&mut self) -> Time {
        self.scheduler.get_next_time()
    }

    pub fn add_view(&mut self, view: View) -> usize {
        self.views.push(view);
        self.views.len() - 1
    }

    /// Attaches a view to a simulator by name. A name that does not
    /// (yet) resolve is logged and ignored rather than panicking, since a
    /// caller may register views before `load()` wires up the model a
    /// later executive mutation will extend.
    pub fn attach(&mut self, view_idx: usize, simulator_name: &str, port: impl Into<String>) {
        match self.names.get(simulator_name) {
            Some(&sim) => {
                self.views[view_idx].attach(sim, port);
            }
            None => tracing::warn!(simulator_name, "attach: no such simulator, ignoring"),
        }
    }

    /// Walks `root`, constructing one simulator per atomic leaf and
    /// resolving every coupling down to an atomic-to-atomic routing
    /// entry. A duplicate atomic name anywhere in the tree is a
    /// model-build error and panics, mirroring the teacher's own
    /// `panic!`-on-duplicate-registration style in `CoupledSpec`.
    pub fn load(&mut self, root: &ModelNode) {
        let flattened = crate::model::flatten(root);
        for atomic in &flattened.atomics {
            self.register_atomic(atomic)
                .unwrap_or_else(|e| panic!("{e}"));
        }
        for (sn, sp, dn, dp) in &flattened.connections {
            self.add_connection(sn, sp, dn, dp)
                .unwrap_or_else(|e| panic!("{e}"));
        }
    }

    fn register_atomic(&mut self, spec: &AtomicSpec) -> Result<usize, EngineError> {
        if self.names.contains_key(&spec.name) {
            return Err(EngineError::ExecutiveDeferred(Fault::new(
                spec.name.clone(),
                self.scheduler.current_time(),
                "an atomic model with this name already exists",
            )));
        }
        let idx = self.sims.len();
        let mut sim = Simulator::new(spec.name.clone(), (spec.factory)());
        let is_exec = sim.is_executive();
        self.sims.push(Some(sim));
        let sched_idx = self.scheduler.register();
        debug_assert_eq!(
            sched_idx, idx,
            "scheduler and simulator slots must stay in lockstep"
        );
        self.names.insert(spec.name.clone(), idx);
        self.is_executive.push(is_exec);
        Ok(idx)
    }

    fn unknown_model_fault(&self, name: &str) -> EngineError {
        EngineError::ExecutiveDeferred(Fault::new(
            name.to_string(),
            self.scheduler.current_time(),
            "unknown model referenced by a graph mutation",
        ))
    }

    fn add_connection(
        &mut self,
        src_name: &str,
        src_port: &str,
        dst_name: &str,
        dst_port: &str,
    ) -> Result<(), EngineError> {
        let src = *self
            .names
            .get(src_name)
            .ok_or_else(|| self.unknown_model_fault(src_name))?;
        let dst = *self
            .names
            .get(dst_name)
            .ok_or_else(|| self.unknown_model_fault(dst_name))?;
        self.routing
            .entry((src, src_port.to_string()))
            .or_default()
            .push((dst, dst_port.to_string()));
        Ok(())
    }

    fn remove_connection(
        &mut self,
        src_name: &str,
        src_port: &str,
        dst_name: &str,
        dst_port: &str,
    ) -> Result<(), EngineError> {
        let src = *self
            .names
            .get(src_name)
            .ok_or_else(|| self.unknown_model_fault(src_name))?;
        let dst = *self
            .names
            .get(dst_name)
            .ok_or_else(|| self.unknown_model_fault(dst_name))?;
        if let Some(dsts) = self.routing.get_mut(&(src, src_port.to_string())) {
            dsts.retain(|(d, dp)| !(*d == dst && dp == dst_port));
        }
        Ok(())
    }

    /// Tombstones `idx`'s slot: drops its simulator, forgets it in the
    /// scheduler, erases its name and routing entries, and detaches any
    /// view attachment referencing it. The slot index itself is never
    /// reused.
    fn remove_simulator(&mut self, idx: usize) {
        self.sims[idx] = None;
        self.scheduler.forget(idx);
        self.names.retain(|_, &mut v| v != idx);
        self.routing.retain(|(s, _), _| *s != idx);
        for dsts in self.routing.values_mut() {
            dsts.retain(|(d, _)| *d != idx);
        }
        for view in &mut self.views {
            view.detach_simulator(idx);
        }
    }

    /// Initialises every simulator at `t0`, seeds the scheduler and opens
    /// every view's sink. `scheduler.init` forms the first bag in case
    /// any simulator reports a zero-duration `init`.
    ///
    /// Also takes each Timed view's first sample here, against the
    /// freshly-initialised, pre-transition state. A bag cycle only ever
    /// samples a Timed view as of its own `t`, and the first bag can
    /// legitimately run at a time later than `t0` (nothing scheduled
    /// exactly at `t0`); without this, a view's nominal `t0` reading
    /// would instead be taken during that later bag, after its
    /// transition has already mutated the state the view is meant to
    /// observe at `t0`.
    pub fn init(&mut self, t0: Time) -> Result<(), EngineError> {
        for sim in self.sims.iter_mut().flatten() {
            sim.init(t0)?;
        }
        let pending: Vec<(usize, Time)> = self
            .sims
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s.next_time())))
            .filter(|&(_, nt)| nt.is_finite())
            .collect();
        for (idx, nt) in pending {
            self.scheduler.add_internal(idx, nt);
        }
        self.scheduler.init(t0);
        self.promote_executives_in_bag();
        for view in &mut self.views {
            view.sink.open();
        }
        for view in self.views.iter_mut() {
            let res = crate::views::dispatch_timed(view, t0, |sim_idx, port, ts| {
                let sim = self.sims[sim_idx].as_ref().ok_or_else(|| {
                    EngineError::SchedulerInvariant(Fault::new(
                        "coordinator",
                        ts,
                        format!("view attachment references removed simulator {sim_idx}"),
                    ))
                })?;
                let value = sim.observation(ts, port)?;
                Ok((sim.name.clone(), value))
            });
            if let Err(e) = res {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "view dispatch error during init");
                self.deferred.push(e);
            }
        }
        Ok(())
    }

    /// Any bag member the scheduler filed as an ordinary dynamic that is
    /// actually backed by an [`crate::dynamics::Executive`] dynamic is
    /// reclassified. Called whenever the bag may have picked up new
    /// members the scheduler itself has no notion of "executive" for:
    /// after `init`'s first drain and after this bag's route phase.
    fn promote_executives_in_bag(&mut self) {
        let to_promote: Vec<usize> = self
            .scheduler
            .bag()
            .dynamics()
            .iter()
            .copied()
            .filter(|&idx| self.is_executive[idx])
            .collect();
        for idx in to_promote {
            self.scheduler.bag_mut().mark_executive(idx);
        }
    }

    fn restore_taken(&mut self, taken: &mut HashMap<usize, Simulator>) {
        for (idx, sim) in taken.drain() {
            self.sims[idx] = Some(sim);
        }
    }

    /// Runs exactly one bag-cycle (§4.7): output, route, transition,
    /// executive application, view dispatch, advance. Returns `true` if
    /// there is still work pending (a non-empty bag, or a finite next
    /// scheduled time).
    pub fn run(&mut self) -> Result<bool, EngineError> {
        if self.scheduler.bag().is_empty() {
            self.scheduler.make_next_bag();
            if self.scheduler.bag().is_empty() {
                return Ok(self.has_pending_work());
            }
        }
        let t = self.scheduler.current_time();
        let _span = tracing::debug_span!(
            "bag_cycle",
            time = %t,
            bag_size = self.scheduler.bag().len()
        )
        .entered();

        // Step 1: output phase, over the whole bag union.
        let union_ids: Vec<usize> = self.scheduler.bag().iter().collect();
        let mut taken: HashMap<usize, Simulator> = HashMap::new();
        let mut union_sims: Vec<Simulator> = Vec::with_capacity(union_ids.len());
        for &idx in &union_ids {
            union_sims.push(
                self.sims[idx]
                    .take()
                    .expect("bag member must have a live simulator"),
            );
        }
        let outputs = self.pool.run_output(&mut union_sims, t);
        for (&idx, sim) in union_ids.iter().zip(union_sims.into_iter()) {
            taken.insert(idx, sim);
        }
        let mut produced: Vec<(usize, String, Value)> = Vec::new();
        for (pos, events) in outputs.into_iter().enumerate() {
            let src_idx = union_ids[pos];
            for (_source_name, ev) in events {
                produced.push((src_idx, ev.port, ev.value));
            }
        }

        // Step 2: route phase.
        let mut deliveries: Vec<(usize, String, Value)> = Vec::new();
        for (src_idx, port, value) in produced {
            let dsts: Vec<(usize, String)> = self
                .routing
                .get(&(src_idx, port))
                .cloned()
                .unwrap_or_default();
            for (dst_idx, dst_port) in dsts {
                self.scheduler.add_external(dst_idx);
                if !taken.contains_key(&dst_idx) {
                    if let Some(sim) = self.sims[dst_idx].take() {
                        taken.insert(dst_idx, sim);
                    }
                }
                if let Some(sim) = taken.get_mut(&dst_idx) {
                    sim.add_external_event(dst_port.clone(), value.clone());
                }
                deliveries.push((dst_idx, dst_port, value.clone()));
            }
        }
        self.promote_executives_in_bag();
        // Defensive: pick up any bag member the loops above did not
        // already take (should never happen, since every member reached
        // the bag via the output union or via route-phase addExternal).
        let still_untaken: Vec<usize> = self
            .scheduler
            .bag()
            .iter()
            .filter(|idx| !taken.contains_key(idx))
            .collect();
        for idx in still_untaken {
            if let Some(sim) = self.sims[idx].take() {
                taken.insert(idx, sim);
            }
        }

        // Step 3: transition phase. Ordinary dynamics run through the
        // worker pool; executives run strictly sequentially afterwards.
        let ord_ids: Vec<usize> = self.scheduler.bag().dynamics().to_vec();
        let exec_ids: Vec<usize> = self.scheduler.bag().executives().to_vec();

        let mut ord_sims: Vec<Simulator> = Vec::with_capacity(ord_ids.len());
        for &idx in &ord_ids {
            ord_sims.push(
                taken
                    .remove(&idx)
                    .expect("ordinary bag member must be taken"),
            );
        }
        let errors = self.pool.run_transitions(&mut ord_sims, t);
        let mut fatal: Option<EngineError> = None;
        for (pos, err) in errors.into_iter().enumerate() {
            match err {
                None => {
                    let nt = ord_sims[pos].next_time();
                    if nt.is_finite() {
                        self.scheduler.add_internal(ord_ids[pos], nt);
                    }
                }
                Some(e) => {
                    if e.is_fatal() {
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                    } else {
                        self.deferred.push(e);
                    }
                }
            }
        }
        for (idx, sim) in ord_ids.iter().zip(ord_sims.into_iter()) {
            self.sims[*idx] = Some(sim);
        }
        if let Some(e) = fatal {
            self.restore_taken(&mut taken);
            return Err(e);
        }

        for &idx in &exec_ids {
            let mut sim = taken
                .remove(&idx)
                .expect("executive bag member must be taken");
            match sim.transition(t) {
                Ok(()) => {
                    let nt = sim.next_time();
                    self.sims[idx] = Some(sim);
                    if nt.is_finite() {
                        self.scheduler.add_internal(idx, nt);
                    }
                }
                Err(e) => {
                    self.sims[idx] = Some(sim);
                    self.restore_taken(&mut taken);
                    return Err(e);
                }
            }
        }

        // Step 4: executive phase, applied strictly after every
        // transition in this bag has run.
        for &idx in &exec_ids {
            if let Some(actions) = self.sims[idx].as_mut().unwrap().executive_actions() {
                self.bridge.queue(actions);
            }
        }
        for mutation in self.bridge.drain() {
            if let Err(e) = self.apply_mutation(mutation) {
                tracing::warn!(error = %e, "executive mutation failed, skipping");
                self.deferred.push(e);
            }
        }

        // Step 5: view dispatch. Every dispatch helper no-ops for a view
        // kind it does not apply to, so every view is simply offered
        // both the timed catch-up and the routed deliveries.
        for view in self.views.iter_mut() {
            let res = crate::views::dispatch_timed(view, t, |sim_idx, port, ts| {
                let sim = self.sims[sim_idx].as_ref().ok_or_else(|| {
                    EngineError::SchedulerInvariant(Fault::new(
                        "coordinator",
                        ts,
                        format!("view attachment references removed simulator {sim_idx}"),
                    ))
                })?;
                let value = sim.observation(ts, port)?;
                Ok((sim.name.clone(), value))
            });
            if let Err(e) = res {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "view dispatch error");
                self.deferred.push(e);
            }
            for (dst_idx, dst_port, value) in &deliveries {
                if let Some(sim) = self.sims[*dst_idx].as_ref() {
                    crate::views::dispatch_event(
                        view,
                        t,
                        *dst_idx,
                        dst_port,
                        &sim.name,
                        value.clone(),
                    );
                }
            }
        }

        // Step 6: advance.
        self.scheduler.make_next_bag();
        Ok(self.has_pending_work())
    }

    fn has_pending_work(&mut self) -> bool {
        !self.scheduler.bag().is_empty() || self.scheduler.get_next_time().is_finite()
    }

    fn apply_mutation(&mut self, mutation: GraphMutation) -> Result<(), EngineError> {
        match mutation {
            GraphMutation::AddAtomic { parent, spec } => {
                if !self.names.contains_key(&parent) {
                    return Err(self.unknown_model_fault(&parent));
                }
                let idx = self.register_atomic(&spec)?;
                self.coupled_members.entry(parent).or_default().push(idx);
                self.init_and_schedule(idx)
            }
            GraphMutation::RemoveAtomic { name } => {
                let idx = *self
                    .names
                    .get(&name)
                    .ok_or_else(|| self.unknown_model_fault(&name))?;
                self.remove_simulator(idx);
                Ok(())
            }
            GraphMutation::AddCoupledChild { parent, spec } => {
                if !self.names.contains_key(&parent) {
                    return Err(self.unknown_model_fault(&parent));
                }
                let child_name = spec.name.clone();
                let flattened = crate::model::flatten(&ModelNode::Coupled(spec));
                let mut added = Vec::with_capacity(flattened.atomics.len());
                for atomic in &flattened.atomics {
                    added.push(self.register_atomic(atomic)?);
                }
                for (sn, sp, dn, dp) in &flattened.connections {
                    self.add_connection(sn, sp, dn, dp)?;
                }
                for &idx in &added {
                    self.init_and_schedule(idx)?;
                }
                self.coupled_members.insert(child_name, added);
                Ok(())
            }
            GraphMutation::RemoveCoupledChild { name } => {
                let members = self.coupled_members.remove(&name).ok_or_else(|| {
                    EngineError::ExecutiveDeferred(Fault::new(
                        name.clone(),
                        self.scheduler.current_time(),
                        "unknown coupled child",
                    ))
                })?;
                for idx in members {
                    self.remove_simulator(idx);
                }
                Ok(())
            }
            GraphMutation::AddConnection { src, dst } => {
                self.add_connection(&src.0, &src.1, &dst.0, &dst.1)
            }
            GraphMutation::RemoveConnection { src, dst } => {
                self.remove_connection(&src.0, &src.1, &dst.0, &dst.1)
            }
        }
    }

    /// Runs `init` on a simulator added by a graph mutation at the
    /// bag's current time and, if its first next-event time is finite,
    /// schedules it. A negative duration from the new dynamic's `init`
    /// is reframed as `ExecutiveDeferred` rather than the fatal
    /// `Modelling` error an ordinary `init` would raise, since the
    /// failure belongs to the mutation, not to an already-running model.
    fn init_and_schedule(&mut self, idx: usize) -> Result<(), EngineError> {
        let t = self.scheduler.current_time();
        self.sims[idx]
            .as_mut()
            .unwrap()
            .init(t)
            .map_err(to_executive_deferred)?;
        let nt = self.sims[idx].as_ref().unwrap().next_time();
        if nt.is_finite() {
            self.scheduler.add_internal(idx, nt);
        }
        Ok(())
    }

    /// Samples every Finish view once, calls `finish()` on every live
    /// dynamic, and closes every sink. Errors raised while sampling a
    /// Finish view (a sink failure or a declared-but-null observation)
    /// are collected rather than propagated: by the time `finish` runs,
    /// the simulation has already completed its scheduled work and there
    /// is no further run to abort.
    pub fn finish(&mut self, t_end: Time) -> (Artifacts, Vec<EngineError>) {
        for view in self.views.iter_mut() {
            let res = crate::views::dispatch_finish(view, t_end, |sim_idx, port, ts| {
                let sim = self.sims[sim_idx]
                    .as_ref()
                    .expect("finish view attached to a live simulator");
                let value = sim.observation(ts, port)?;
                Ok((sim.name.clone(), value))
            });
            if let Err(e) = res {
                tracing::warn!(error = %e, "finish view dispatch failed");
                self.deferred.push(e);
            }
        }
        for sim in self.sims.iter_mut().flatten() {
            sim.finish();
        }
        let artifacts = crate::views::close_all(&mut self.views);
        (artifacts, std::mem::take(&mut self.deferred))
    }
}
