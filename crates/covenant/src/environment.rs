//! Host environment contract and the deterministic reference scheduler.
//!
//! The promise core consumes exactly three host operations — `enqueue`,
//! `set_timer`, `cancel_timer` — plus the fatal-commit channel used by
//! `done`. All asynchrony flows through these; the core itself never
//! touches wall-clock time or threads.
//!
//! [`DeterministicScheduler`] is the reference host:
//! - **Microtask queue**: strict FIFO, drains completely before any timer.
//! - **Timer queue**: ordered by `(fire_at_ms, registration_seq)`.
//! - **Virtual clock**: advances only to the next due timer, never backward.
//! - **Witness emission**: every enqueue/execute/timer/clock event is
//!   recorded, so identical runs produce identical logs.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A host task: runs exactly once, after the current stack unwinds.
pub type Task = Box<dyn FnOnce()>;

// ---------------------------------------------------------------------------
// Host contract
// ---------------------------------------------------------------------------

/// Opaque handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerHandle(pub u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer({})", self.0)
    }
}

/// The host scheduling contract consumed by the promise core.
///
/// Single-threaded cooperative model: the host runs tasks one at a time
/// on one thread, and `enqueue` preserves FIFO order for tasks enqueued
/// within the same turn.
pub trait Environment {
    /// Schedule `task` to run after the current stack unwinds. Exactly once.
    fn enqueue(&self, task: Task);

    /// Run `task` once, after at least `delay_ms` milliseconds.
    fn set_timer(&self, task: Task, delay_ms: u64) -> TimerHandle;

    /// Best-effort cancellation of a scheduled timer.
    fn cancel_timer(&self, handle: TimerHandle);

    /// The fatal-commit channel: `done` routes terminal rejections here.
    /// Embedders should treat this as a host-level crash.
    fn raise_fatal(&self, reason: Value);
}

// ---------------------------------------------------------------------------
// Witness events (for replay comparison)
// ---------------------------------------------------------------------------

/// Events recorded by the deterministic scheduler. Two runs of the same
/// program must produce identical witness logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WitnessEvent {
    /// A microtask was enqueued.
    TaskEnqueued { index: u64 },
    /// A microtask was dequeued and executed.
    TaskExecuted { index: u64 },
    /// A timer was scheduled.
    TimerScheduled { handle: TimerHandle, fire_at_ms: u64 },
    /// A timer fired.
    TimerFired { handle: TimerHandle },
    /// A timer was cancelled before firing.
    TimerCancelled { handle: TimerHandle },
    /// The virtual clock advanced.
    ClockAdvanced { from_ms: u64, to_ms: u64 },
    /// A fatal rejection was raised through the environment.
    FatalRaised { reason: String },
}

// ---------------------------------------------------------------------------
// Virtual clock
// ---------------------------------------------------------------------------

/// A fully deterministic virtual clock — no system time dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VirtualClock {
    current_ms: u64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self { current_ms: 0 }
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.current_ms
    }

    /// Advance the clock to the given time. Never moves backward.
    pub fn advance_to(&mut self, target_ms: u64) {
        if target_ms > self.current_ms {
            self.current_ms = target_ms;
        }
    }
}

// ---------------------------------------------------------------------------
// Deterministic scheduler
// ---------------------------------------------------------------------------

struct TimerEntry {
    handle: TimerHandle,
    fire_at_ms: u64,
    seq: u64,
    task: Task,
}

/// The reference host: FIFO microtasks, virtual-clock timers, witness log.
///
/// Fatal reasons raised through [`Environment::raise_fatal`] are recorded
/// and observable via [`DeterministicScheduler::fatal_reasons`]; a real
/// embedding would abort instead.
#[derive(Default)]
pub struct DeterministicScheduler {
    microtasks: RefCell<VecDeque<(u64, Task)>>,
    enqueue_count: Cell<u64>,
    timers: RefCell<Vec<TimerEntry>>,
    timer_seq: Cell<u64>,
    clock: RefCell<VirtualClock>,
    witness: RefCell<Vec<WitnessEvent>>,
    fatals: RefCell<Vec<Value>>,
}

impl DeterministicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.borrow().now_ms()
    }

    /// Number of microtasks waiting to run.
    pub fn pending_task_count(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Number of timers that have been scheduled but not fired or cancelled.
    pub fn pending_timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Snapshot of the witness log.
    pub fn witness_log(&self) -> Vec<WitnessEvent> {
        self.witness.borrow().clone()
    }

    /// Reasons raised through the fatal channel, in raise order.
    pub fn fatal_reasons(&self) -> Vec<Value> {
        self.fatals.borrow().clone()
    }

    /// Drain all pending microtasks in FIFO order. Tasks enqueued while
    /// draining are drained too. Returns the count executed.
    pub fn drain_microtasks(&self) -> u64 {
        let mut count = 0u64;
        loop {
            let next = self.microtasks.borrow_mut().pop_front();
            match next {
                Some((index, task)) => {
                    self.witness
                        .borrow_mut()
                        .push(WitnessEvent::TaskExecuted { index });
                    task();
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Fire the earliest due timer, advancing the clock to its deadline.
    /// Returns false when no timers remain.
    fn fire_next_timer(&self) -> bool {
        let entry = {
            let mut timers = self.timers.borrow_mut();
            let best = timers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.fire_at_ms
                        .cmp(&b.fire_at_ms)
                        .then(a.seq.cmp(&b.seq))
                })
                .map(|(i, _)| i);
            match best {
                Some(i) => timers.remove(i),
                None => return false,
            }
        };
        let from_ms = self.now_ms();
        if entry.fire_at_ms > from_ms {
            self.clock.borrow_mut().advance_to(entry.fire_at_ms);
            self.witness.borrow_mut().push(WitnessEvent::ClockAdvanced {
                from_ms,
                to_ms: entry.fire_at_ms,
            });
        }
        self.witness.borrow_mut().push(WitnessEvent::TimerFired {
            handle: entry.handle,
        });
        (entry.task)();
        true
    }

    /// Run to quiescence: drain microtasks, fire the next timer, repeat
    /// until both queues are empty.
    pub fn run(&self) {
        loop {
            self.drain_microtasks();
            if !self.fire_next_timer() {
                break;
            }
        }
    }
}

impl Environment for DeterministicScheduler {
    fn enqueue(&self, task: Task) {
        let index = self.enqueue_count.get();
        self.enqueue_count.set(index + 1);
        self.witness
            .borrow_mut()
            .push(WitnessEvent::TaskEnqueued { index });
        self.microtasks.borrow_mut().push_back((index, task));
    }

    fn set_timer(&self, task: Task, delay_ms: u64) -> TimerHandle {
        let seq = self.timer_seq.get();
        self.timer_seq.set(seq + 1);
        let handle = TimerHandle(seq);
        let fire_at_ms = self.now_ms() + delay_ms;
        self.witness
            .borrow_mut()
            .push(WitnessEvent::TimerScheduled { handle, fire_at_ms });
        self.timers.borrow_mut().push(TimerEntry {
            handle,
            fire_at_ms,
            seq,
            task,
        });
        handle
    }

    fn cancel_timer(&self, handle: TimerHandle) {
        let mut timers = self.timers.borrow_mut();
        let before = timers.len();
        timers.retain(|t| t.handle != handle);
        if timers.len() != before {
            self.witness
                .borrow_mut()
                .push(WitnessEvent::TimerCancelled { handle });
        }
    }

    fn raise_fatal(&self, reason: Value) {
        self.witness.borrow_mut().push(WitnessEvent::FatalRaised {
            reason: reason.to_string(),
        });
        self.fatals.borrow_mut().push(reason);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
