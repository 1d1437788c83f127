//! The time-ordered event scheduler: a min-heap of `(time, simulator)`
//! plus the current bag it assembles.
//!
//! Grounded on VLE's `devs::Scheduler` (`Scheduler.hpp`/`.cpp`): a heap
//! ordered by ascending time, a `Bag` holding `dynamics`/`executives`
//! vectors plus a uniqueness set, and an `addExternal` that erases a
//! simulator's scheduled-but-not-yet-due internal entry when an external
//! event arrives for it first. `decreaseKey`/`erase` are not a distinct
//! heap primitive here: this scheduler uses lazy deletion instead of a
//! handle-bearing heap (a Fibonacci heap, as the source uses, has no
//! equivalent in `std`) — a simulator's authoritative next-event time
//! lives in `scheduled`, indexed by simulator slot, and a heap entry is
//! only acted on if it still matches that authoritative time; stale
//! entries left behind by a decrease-key or erase are silently discarded
//! when popped. This meets the same amortised-`O(log n)` contract the
//! specification allows for either primitive.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use crate::time::Time;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry {
    time: Time,
    sim: usize,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time.cmp(&other.time).then(self.sim.cmp(&other.sim))
    }
}

/// The set of simulators to process for the current bag-time, split into
/// ordinary dynamics and executives plus a uniqueness set — mirrors the
/// source's `Bag` struct (`dynamics`, `executives`, `unique_simulators`)
/// rather than a single merged collection, so iteration order within a
/// bag is insertion order, not hash order.
#[derive(Default)]
pub struct Bag {
    dynamics: Vec<usize>,
    executives: Vec<usize>,
    members: HashSet<usize>,
}

impl Bag {
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, sim: usize) -> bool {
        self.members.contains(&sim)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Inserts `sim` into the ordinary-dynamics sequence if it is not
    /// already a member of this bag. Callers that know a simulator is an
    /// executive insert it via [`Bag::insert_executive`] instead; a
    /// simulator already present keeps whichever sequence it first
    /// landed in.
    fn insert_dynamic(&mut self, sim: usize) -> bool {
        if self.members.insert(sim) {
            self.dynamics.push(sim);
            true
        } else {
            false
        }
    }

    fn remove(&mut self, sim: usize) {
        if self.members.remove(&sim) {
            self.dynamics.retain(|&s| s != sim);
            self.executives.retain(|&s| s != sim);
        }
    }

    pub fn clear(&mut self) {
        self.dynamics.clear();
        self.executives.clear();
        self.members.clear();
    }

    /// All members in insertion order, regardless of dynamic/executive
    /// split. Used by the output phase, which treats the bag union
    /// uniformly.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.dynamics.iter().chain(self.executives.iter()).copied()
    }

    pub fn dynamics(&self) -> &[usize] {
        &self.dynamics
    }

    pub fn executives(&self) -> &[usize] {
        &self.executives
    }

    /// Moves `sim` from the ordinary sequence into the executive
    /// sequence; a no-op if it is not a (still-ordinary) member. Called
    /// by the coordinator once it knows which simulators wrap an
    /// [`crate::dynamics::Executive`] dynamic — the scheduler itself has
    /// no notion of "executive", only of bag membership.
    pub fn mark_executive(&mut self, sim: usize) {
        if let Some(pos) = self.dynamics.iter().position(|&s| s == sim) {
            self.dynamics.remove(pos);
            self.executives.push(sim);
        }
    }
}

/// The mutable min-priority queue over `(time, simulator)` plus the bag
/// it assembles on `init`/`makeNextBag`.
pub struct Scheduler {
    heap: BinaryHeap<Reverse<Entry>>,
    /// `scheduled[sim] == Some(t)` iff `sim` currently holds a live
    /// scheduler handle for time `t`; `None` means it has no pending
    /// internal event (its `ta` was `+inf`, or it was erased/drained).
    scheduled: Vec<Option<Time>>,
    current_time: Time,
    bag: Bag,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            heap: BinaryHeap::new(),
            scheduled: Vec::new(),
            current_time: Time::NEG_INFINITY,
            bag: Bag::default(),
        }
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    pub fn bag(&self) -> &Bag {
        &self.bag
    }

    pub fn bag_mut(&mut self) -> &mut Bag {
        &mut self.bag
    }

    /// Registers a new simulator slot, growing the `scheduled` index.
    /// Must be called (in index order) before any operation below
    /// references that index.
    pub fn register(&mut self) -> usize {
        self.scheduled.push(None);
        self.scheduled.len() - 1
    }

    /// Drops bookkeeping for `sim` entirely; used when an executive
    /// mutation removes a simulator's slot permanently rather than just
    /// erasing its pending event (see [`Scheduler::del_simulator`]).
    pub fn forget(&mut self, sim: usize) {
        self.bag.remove(sim);
        if sim < self.scheduled.len() {
            self.scheduled[sim] = None;
        }
    }

    fn is_live(&self, entry: Entry) -> bool {
        entry.sim < self.scheduled.len() && self.scheduled[entry.sim] == Some(entry.time)
    }

    /// Drains every heap entry whose time is `<= bound`, inserting each
    /// into the bag as an ordinary dynamic with a due internal event.
    /// Shared by `init` and `makeNextBag`, which differ only in how
    /// `bound` (and thus `current_time`) is chosen.
    fn drain_due(&mut self, bound: Time) {
        self.bag.clear();
        while let Some(&Reverse(top)) = self.heap.peek() {
            if top.time > bound {
                break;
            }
            self.heap.pop();
            if !self.is_live(top) {
                continue; // stale entry superseded by a later addInternal/erase
            }
            self.scheduled[top.sim] = None;
            self.bag.insert_dynamic(top.sim);
        }
    }

    /// Sets `currentTime = t` and drains every entry with `time <= t`
    /// into a fresh bag, marking each as having a due internal event.
    pub fn init(&mut self, t: Time) {
        self.current_time = t;
        self.drain_due(t);
    }

    /// `t >= currentTime` and `t` finite are preconditions; violating
    /// either is a programming error and panics rather than returning a
    /// recoverable `EngineError`, since it can only be caused by a
    /// coordinator bug, never by user-dynamic data.
    pub fn add_internal(&mut self, sim: usize, t: Time) {
        assert!(t.is_finite(), "addInternal requires a finite time");
        assert!(
            t >= self.current_time,
            "addInternal requires t >= currentTime"
        );
        self.scheduled[sim] = Some(t);
        self.heap.push(Reverse(Entry { time: t, sim }));
    }

    /// Records that `sim` has received an external event this bag. If it
    /// was scheduled for a strictly later internal event, that entry is
    /// erased (the external will drive its next transition instead); if
    /// it was scheduled for exactly `currentTime`, it stays due and the
    /// simulator becomes confluent once in the bag. Either way `sim`
    /// joins the bag if it was not already a member. Storing the event
    /// payload on the simulator itself is the caller's job (see
    /// [`crate::simulator::Simulator::add_external_event`]); this method
    /// only maintains scheduling membership.
    pub fn add_external(&mut self, sim: usize) {
        if let Some(t) = self.scheduled[sim] {
            if t > self.current_time {
                self.scheduled[sim] = None;
            }
        }
        self.bag.insert_dynamic(sim);
    }

    /// Removes `sim` from the bag and erases any scheduler entry it
    /// holds. Called by the executive bridge when a mutation deletes a
    /// simulator.
    pub fn del_simulator(&mut self, sim: usize) {
        self.bag.remove(sim);
        self.scheduled[sim] = None;
    }

    /// Sets `currentTime` to the earliest pending time and drains every
    /// entry at that time into a fresh bag. A no-op if the heap (modulo
    /// stale entries) is empty.
    pub fn make_next_bag(&mut self) {
        self.drop_stale_top();
        let Some(&Reverse(top)) = self.heap.peek() else {
            self.bag.clear();
            return;
        };
        self.current_time = top.time;
        self.drain_due(top.time);
    }

    fn drop_stale_top(&mut self) {
        while let Some(&Reverse(top)) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    /// The earliest pending time, or `+inf` if nothing is scheduled.
    pub fn get_next_time(&mut self) -> Time {
        self.drop_stale_top();
        self.heap
            .peek()
            .map(|&Reverse(e)| e.time)
            .unwrap_or(Time::INFINITY)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_all_due_entries_on_init() {
        let mut s = Scheduler::new();
        for _ in 0..3 {
            s.register();
        }
        s.add_internal(0, Time::new(1.0));
        s.add_internal(1, Time::new(1.0));
        s.add_internal(2, Time::new(5.0));
        s.init(Time::new(1.0));
        assert_eq!(s.bag().len(), 2);
        assert!(s.bag().contains(0));
        assert!(s.bag().contains(1));
        assert!(!s.bag().contains(2));
    }

    #[test]
    fn decrease_key_via_lazy_deletion() {
        let mut s = Scheduler::new();
        s.register();
        s.add_internal(0, Time::new(10.0));
        s.add_internal(0, Time::new(2.0)); // supersedes the 10.0 entry
        s.init(Time::new(2.0));
        assert!(s.bag().contains(0));
        // the stale 10.0 entry must not resurrect later
        s.make_next_bag();
        assert_eq!(s.get_next_time(), Time::INFINITY);
    }

    #[test]
    fn external_arrival_erases_later_scheduled_internal() {
        let mut s = Scheduler::new();
        s.register();
        s.add_internal(0, Time::new(10.0));
        s.init(Time::new(0.0));
        s.add_external(0);
        assert!(s.bag().contains(0));
        s.make_next_bag();
        // the sim had no other internal event scheduled, so nothing left
        assert_eq!(s.get_next_time(), Time::INFINITY);
    }

    #[test]
    fn external_arrival_at_due_time_keeps_confluent_member() {
        let mut s = Scheduler::new();
        s.register();
        s.add_internal(0, Time::new(1.0));
        s.init(Time::new(1.0));
        assert!(s.bag().contains(0));
        s.add_external(0);
        assert!(s.bag().contains(0));
    }

    #[test]
    fn make_next_bag_uniqueness_and_next_time() {
        let mut s = Scheduler::new();
        for _ in 0..3 {
            s.register();
        }
        s.add_internal(0, Time::new(2.0));
        s.add_internal(1, Time::new(2.0));
        s.init(Time::NEG_INFINITY);
        s.add_external(2);
        assert_eq!(s.bag().len(), 3);
        assert!(s.bag().contains(0) && s.bag().contains(1) && s.bag().contains(2));
    }

    #[test]
    fn del_simulator_clears_bag_and_schedule() {
        let mut s = Scheduler::new();
        for _ in 0..2 {
            s.register();
        }
        s.add_internal(0, Time::new(1.0));
        s.add_internal(1, Time::new(1.0));
        s.init(Time::new(1.0));
        s.del_simulator(0);
        assert!(!s.bag().contains(0));
        assert!(s.bag().contains(1));
    }

    #[test]
    #[should_panic(expected = "t >= currentTime")]
    fn add_internal_rejects_time_travel() {
        let mut s = Scheduler::new();
        s.register();
        s.init(Time::new(5.0));
        s.add_internal(0, Time::new(1.0));
    }

    #[test]
    #[should_panic(expected = "finite")]
    fn add_internal_rejects_infinite_time() {
        let mut s = Scheduler::new();
        s.register();
        s.add_internal(0, Time::INFINITY);
    }
}

/// Property tests exercising §8's scheduler invariants ("every simulator
/// with a non-`+inf` tN has exactly one scheduler handle; no simulator
/// appears in the bag more than once; after `makeNextBag`, `currentTime`
/// equals the minimum tN over all simulators in the bag, and no simulator
/// outside the bag has tN < currentTime") over arbitrary interleavings of
/// `addInternal`/`addExternal`/`delSimulator`/`makeNextBag`.
///
/// `Scheduler` exposes no accessor for a single simulator's scheduled
/// time, so these tests drive a plain reference model alongside the real
/// scheduler, applying the same rules documented on each method, and
/// check the two stay in agreement after every step.
#[cfg(test)]
mod scheduler_properties {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    const NUM_SIMS: usize = 4;

    #[derive(Clone, Debug)]
    enum Op {
        AddInternal { sim: usize, dt: f64 },
        AddExternal { sim: usize },
        DelSimulator { sim: usize },
        MakeNextBag,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..NUM_SIMS, 0.0f64..5.0).prop_map(|(sim, dt)| Op::AddInternal { sim, dt }),
            (0..NUM_SIMS).prop_map(|sim| Op::AddExternal { sim }),
            (0..NUM_SIMS).prop_map(|sim| Op::DelSimulator { sim }),
            Just(Op::MakeNextBag),
        ]
    }

    /// A deliberately naive mirror of the rules documented on
    /// `add_internal`/`add_external`/`del_simulator`/`make_next_bag`,
    /// built from a `HashMap` rather than a heap, so it exercises the
    /// same semantics through an entirely different representation.
    struct ReferenceModel {
        scheduled: HashMap<usize, Time>,
        current_time: Time,
        bag: HashSet<usize>,
    }

    impl ReferenceModel {
        fn new() -> Self {
            ReferenceModel {
                scheduled: HashMap::new(),
                current_time: Time::NEG_INFINITY,
                bag: HashSet::new(),
            }
        }

        fn next_time(&self) -> Time {
            self.scheduled
                .values()
                .copied()
                .min()
                .unwrap_or(Time::INFINITY)
        }

        fn add_internal(&mut self, sim: usize, t: Time) {
            self.scheduled.insert(sim, t);
        }

        fn add_external(&mut self, sim: usize) {
            if let Some(&t) = self.scheduled.get(&sim) {
                if t > self.current_time {
                    self.scheduled.remove(&sim);
                }
            }
            self.bag.insert(sim);
        }

        fn del_simulator(&mut self, sim: usize) {
            self.bag.remove(&sim);
            self.scheduled.remove(&sim);
        }

        fn make_next_bag(&mut self) {
            let next = self.next_time();
            if next.is_positive_infinity() {
                self.bag.clear();
                return;
            }
            self.current_time = next;
            self.bag.clear();
            let due: Vec<usize> = self
                .scheduled
                .iter()
                .filter(|&(_, &t)| t == next)
                .map(|(&sim, _)| sim)
                .collect();
            for sim in due {
                self.scheduled.remove(&sim);
                self.bag.insert(sim);
            }
        }
    }

    fn assert_membership(real: &Scheduler, reference: &ReferenceModel) {
        for sim in 0..NUM_SIMS {
            assert_eq!(
                real.bag().contains(sim),
                reference.bag.contains(&sim),
                "bag membership diverged for sim {sim}"
            );
        }
        assert_eq!(real.bag().len(), reference.bag.len());
    }

    fn check_agreement(real: &mut Scheduler, reference: &ReferenceModel) {
        assert_membership(real, reference);
        assert_eq!(real.current_time(), reference.current_time);
        assert_eq!(real.get_next_time(), reference.next_time());
    }

    proptest! {
        #[test]
        fn scheduler_matches_reference_model(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut real = Scheduler::new();
            for _ in 0..NUM_SIMS {
                real.register();
            }
            let mut reference = ReferenceModel::new();

            for op in ops {
                match op {
                    Op::AddInternal { sim, dt } => {
                        let base = if reference.current_time.is_finite() {
                            reference.current_time.as_f64()
                        } else {
                            0.0
                        };
                        let t = Time::new(base + dt);
                        // addInternal requires a finite t >= currentTime; skip
                        // draws that would violate that precondition rather
                        // than assert on them, since the precondition is the
                        // coordinator's job to uphold, not the scheduler's.
                        if t >= reference.current_time {
                            real.add_internal(sim, t);
                            reference.add_internal(sim, t);
                        }
                    }
                    Op::AddExternal { sim } => {
                        real.add_external(sim);
                        reference.add_external(sim);
                    }
                    Op::DelSimulator { sim } => {
                        real.del_simulator(sim);
                        reference.del_simulator(sim);
                    }
                    Op::MakeNextBag => {
                        real.make_next_bag();
                        reference.make_next_bag();
                    }
                }
                check_agreement(&mut real, &reference);
            }
        }
    }
}
