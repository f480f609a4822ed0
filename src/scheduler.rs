//! # Scheduler
//!
//! The single deferred-execution facility for the whole server: an ordered,
//! cancelable collection of callbacks keyed by fire time, driven by one
//! logical run loop.
//!
//! ## Contract
//! - Tasks are ordered by fire time; simultaneous deadlines fire FIFO in
//!   insertion order.
//! - Callback bodies execute one at a time, never concurrently with each
//!   other, regardless of which thread called [`Scheduler::schedule`]. This
//!   is what lets callbacks mutate shared game state without locking of
//!   their own.
//! - A task is `Pending` until it either fires or is canceled; both
//!   transitions are final. Canceling a task whose callback has already
//!   started has no effect.
//! - A panic inside a callback is caught at the loop boundary and logged;
//!   later tasks still run.
//!
//! Delayed work pays a configured minimum tick so near-zero delays cannot
//! busy-loop the queue; [`Scheduler::post`] is the un-floored path I/O
//! handlers use to funnel work onto the serial context.

use std::collections::{BinaryHeap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

/// Default floor on scheduled delays.
pub const SCHEDULER_MINTICKS: Duration = Duration::from_millis(50);

/// Opaque handle to a scheduled task, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

type TaskFn = Box<dyn FnOnce() + Send + 'static>;

struct ScheduledTask {
    id: u64,
    fire_at: Instant,
    sequence: u64,
    callback: TaskFn,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.sequence == other.sequence
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // BinaryHeap is a max-heap: invert so the earliest deadline pops first,
    // lowest sequence winning ties
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct Queue {
    heap: BinaryHeap<ScheduledTask>,
    pending: HashSet<u64>,
    canceled: HashSet<u64>,
}

struct Inner {
    queue: Mutex<Queue>,
    notify: Notify,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
    min_tick: Duration,
    stopped: AtomicBool,
}

/// Handle to the shared scheduler; cheap to clone and safe to call from any
/// thread. Enqueueing is concurrent, execution is serialized.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Spawn the run loop on the current runtime and return the handle.
    pub fn start(min_tick: Duration) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(Queue {
                heap: BinaryHeap::new(),
                pending: HashSet::new(),
                canceled: HashSet::new(),
            }),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            next_sequence: AtomicU64::new(0),
            min_tick,
            stopped: AtomicBool::new(false),
        });

        tokio::spawn(Self::run(Arc::clone(&inner)));
        Self { inner }
    }

    /// Enqueue `callback` to fire after `delay`, floored at the minimum
    /// tick. Returns the handle to cancel it before it fires.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = delay.max(self.inner.min_tick);
        self.enqueue(Instant::now() + delay, Box::new(callback))
    }

    /// Enqueue `callback` to run on the next loop pass, ahead of any
    /// delayed work. No minimum-tick floor.
    pub fn post<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Instant::now(), Box::new(callback));
    }

    fn enqueue(&self, fire_at: Instant, callback: TaskFn) -> TaskId {
        if self.inner.stopped.load(Ordering::Acquire) {
            warn!("task enqueued after scheduler shutdown; dropped");
            return TaskId(0);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.inner.queue.lock().expect("scheduler queue poisoned");
            queue.pending.insert(id);
            queue.heap.push(ScheduledTask {
                id,
                fire_at,
                sequence,
                callback,
            });
        }
        self.inner.notify.notify_one();
        TaskId(id)
    }

    /// Cancel a pending task. Returns false when the task already fired,
    /// was already canceled, or has begun executing.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut queue = self.inner.queue.lock().expect("scheduler queue poisoned");
        if queue.pending.remove(&id.0) {
            queue.canceled.insert(id.0);
            true
        } else {
            false
        }
    }

    /// Stop the loop after the currently executing callback, if any.
    /// Idempotent; tasks still queued are dropped.
    pub fn shutdown(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            debug!("scheduler shutting down");
        }
        self.inner.notify.notify_one();
    }

    /// Number of tasks still waiting to fire.
    pub fn pending_count(&self) -> usize {
        self.inner
            .queue
            .lock()
            .expect("scheduler queue poisoned")
            .pending
            .len()
    }

    async fn run(inner: Arc<Inner>) {
        enum Step {
            Run(TaskFn),
            Skip,
            Sleep(Instant),
            Idle,
        }

        loop {
            if inner.stopped.load(Ordering::Acquire) {
                break;
            }

            let step = {
                let mut queue = inner.queue.lock().expect("scheduler queue poisoned");
                let next_fire = queue.heap.peek().map(|task| task.fire_at);
                match next_fire {
                    None => Step::Idle,
                    Some(fire_at) if fire_at > Instant::now() => Step::Sleep(fire_at),
                    Some(_) => {
                        let task = queue.heap.pop().expect("peeked task vanished");
                        if queue.canceled.remove(&task.id) {
                            Step::Skip
                        } else {
                            queue.pending.remove(&task.id);
                            Step::Run(task.callback)
                        }
                    }
                }
            };

            match step {
                Step::Run(callback) => {
                    // the loop boundary: a panicking task must not take the
                    // scheduler down with it
                    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                        error!("scheduled task panicked; continuing with next task");
                    }
                }
                Step::Skip => {}
                Step::Sleep(fire_at) => {
                    tokio::select! {
                        () = sleep_until(fire_at) => {}
                        () = inner.notify.notified() => {}
                    }
                }
                Step::Idle => inner.notify.notified().await,
            }
        }
        debug!("scheduler loop stopped");
    }
}
