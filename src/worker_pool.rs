//! Block-partitioned parallel evaluation of one simulator vector.
//!
//! Grounded on VLE's `devs::SimulatorProcessParallel` (`Thread.hpp`): a
//! fixed pool of long-lived worker threads, plus the calling thread
//! itself, cooperatively claim fixed-size blocks of a simulator slice
//! via an atomic decrement-and-claim on a block counter; each claimed
//! block is processed to completion independently of every other block.
//! The calling thread busy-waits (a short sleep, not a condvar) until a
//! second counter confirms every claimed block — including ones workers
//! are still mid-processing — has completed. Translated directly rather
//! than reimplemented with a work-stealing executor or `rayon`, per the
//! engine's own design notes: the point is to match DEVS's single
//! fork-join-per-phase shape with the fewest possible synchronisation
//! points, not to build a general task scheduler.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;

use crate::error::EngineError;
use crate::simulator::Simulator;
use crate::time::Time;

/// Which per-simulator operation a dispatch round performs. The pool is
/// deliberately not generic over an arbitrary closure: the only two
/// operations the independence contract (§5) permits running off the
/// driver thread are the bag's output phase and its ordinary transition
/// phase, so those are the only two jobs the pool knows how to run.
#[derive(Clone, Copy)]
enum Op {
    Output,
    Transition,
}

/// A `*mut T` plus length, sendable across the worker threads because
/// the caller (`WorkerPool::dispatch`) guarantees the blocks those
/// threads claim never overlap in the indices they touch.
struct RawSlice<T>(NonNull<T>, usize);

impl<T> Clone for RawSlice<T> {
    fn clone(&self) -> Self {
        RawSlice(self.0, self.1)
    }
}
impl<T> Copy for RawSlice<T> {}

// Safety: see the module doc and `Job::run_one` — every access is
// confined to a block of indices no other thread is concurrently
// claiming this round.
unsafe impl<T> Send for RawSlice<T> {}
unsafe impl<T> Sync for RawSlice<T> {}

#[derive(Clone, Copy)]
struct Job {
    sims: RawSlice<Simulator>,
    outputs: Option<RawSlice<Vec<(String, crate::dynamics::OutputEvent)>>>,
    errors: Option<RawSlice<Option<EngineError>>>,
    t: Time,
    op: Op,
}

impl Job {
    /// Safety: `i < self.sims.1`, and no other thread touches index `i`
    /// for the duration of this call this round.
    unsafe fn run_one(&self, i: usize) {
        let sim = unsafe { &mut *self.sims.0.as_ptr().add(i) };
        match self.op {
            Op::Output => {
                let mut buf = Vec::new();
                sim.output(self.t, &mut buf);
                if let Some(out) = &self.outputs {
                    unsafe { *out.0.as_ptr().add(i) = buf };
                }
            }
            Op::Transition => {
                if let Err(e) = sim.transition(self.t) {
                    if let Some(errs) = &self.errors {
                        unsafe { *errs.0.as_ptr().add(i) = Some(e) };
                    }
                }
            }
        }
    }
}

/// Long-lived worker threads plus the block-claim protocol that
/// dispatches one round of an `Op` over a simulator slice.
pub struct WorkerPool {
    block_size: usize,
    running: Arc<AtomicBool>,
    block_id: Arc<AtomicIsize>,
    block_count: Arc<AtomicIsize>,
    job: Arc<Mutex<Option<Job>>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// `workers = 0` is the serial fallback: no thread objects are ever
    /// created and every `run_*` call executes on the calling thread.
    pub fn new(workers: usize, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let running = Arc::new(AtomicBool::new(true));
        let block_id = Arc::new(AtomicIsize::new(-1));
        let block_count = Arc::new(AtomicIsize::new(-1));
        let job: Arc<Mutex<Option<Job>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let running = running.clone();
            let block_id = block_id.clone();
            let block_count = block_count.clone();
            let job = job.clone();
            handles.push(thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let block = block_id.fetch_sub(1, Ordering::SeqCst);
                    if block >= 0 {
                        if let Some(j) = *job.lock() {
                            let begin = block as usize * block_size;
                            let end = (begin + block_size).min(j.sims.1);
                            for i in begin..end {
                                // Safety: blocks are disjoint ranges of the
                                // slice `dispatch` installed this round.
                                unsafe { j.run_one(i) };
                            }
                        }
                        block_count.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        thread::sleep(StdDuration::from_nanos(1));
                    }
                }
            }));
        }

        WorkerPool {
            block_size,
            running,
            block_id,
            block_count,
            job,
            handles,
        }
    }

    pub fn is_parallel(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Runs one dispatch round: sets up the job, races the calling
    /// thread against the worker threads to claim blocks, then
    /// busy-waits until every claimed block (including ones a worker is
    /// still mid-processing) has completed.
    fn dispatch(&self, job: Job, len: usize) {
        if self.handles.is_empty() || len <= 1 {
            for i in 0..len {
                // Safety: single-threaded serial fallback, no concurrent
                // claims to race against.
                unsafe { job.run_one(i) };
            }
            return;
        }

        let n_blocks = len.div_ceil(self.block_size) as isize;
        *self.job.lock() = Some(job);
        self.block_count.store(n_blocks, Ordering::SeqCst);
        self.block_id.store(n_blocks, Ordering::SeqCst);

        loop {
            let block = self.block_id.fetch_sub(1, Ordering::SeqCst);
            if block < 0 {
                break;
            }
            let begin = block as usize * self.block_size;
            let end = (begin + self.block_size).min(len);
            for i in begin..end {
                // Safety: see `dispatch`'s module-level contract.
                unsafe { job.run_one(i) };
            }
            self.block_count.fetch_sub(1, Ordering::SeqCst);
        }

        while self.block_count.load(Ordering::SeqCst) >= 0 {
            thread::sleep(StdDuration::from_nanos(1));
        }
    }

    /// Runs the output phase over `sims`, returning each simulator's
    /// produced `(sourceName, event)` pairs indexed the same way as
    /// `sims`.
    pub fn run_output(
        &self,
        sims: &mut [Simulator],
        t: Time,
    ) -> Vec<Vec<(String, crate::dynamics::OutputEvent)>> {
        let len = sims.len();
        let mut outputs: Vec<Vec<(String, crate::dynamics::OutputEvent)>> =
            (0..len).map(|_| Vec::new()).collect();
        let sims_ptr = NonNull::new(sims.as_mut_ptr()).unwrap_or(NonNull::dangling());
        let out_ptr = NonNull::new(outputs.as_mut_ptr()).unwrap_or(NonNull::dangling());
        let job = Job {
            sims: RawSlice(sims_ptr, len),
            outputs: Some(RawSlice(out_ptr, len)),
            errors: None,
            t,
            op: Op::Output,
        };
        self.dispatch(job, len);
        outputs
    }

    /// Runs the ordinary transition phase over `sims`, returning any
    /// `EngineError` each simulator's transition raised, indexed the
    /// same way as `sims`.
    pub fn run_transitions(&self, sims: &mut [Simulator], t: Time) -> Vec<Option<EngineError>> {
        let len = sims.len();
        let mut errors: Vec<Option<EngineError>> = (0..len).map(|_| None).collect();
        let sims_ptr = NonNull::new(sims.as_mut_ptr()).unwrap_or(NonNull::dangling());
        let err_ptr = NonNull::new(errors.as_mut_ptr()).unwrap_or(NonNull::dangling());
        let job = Job {
            sims: RawSlice(sims_ptr, len),
            outputs: None,
            errors: Some(RawSlice(err_ptr, len)),
            t,
            op: Op::Transition,
        };
        self.dispatch(job, len);
        errors
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
