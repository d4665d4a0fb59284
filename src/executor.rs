//! Task execution.
//!
//! The session hands every stream task to an [`Executor`] and never cares how
//! it runs. [`InlineExecutor`] runs tasks on the calling thread, which makes
//! tests deterministic; [`ThreadPool`](crate::thread_pool::ThreadPool) hands
//! out executors backed by worker threads.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use parking_lot::Mutex;

/// A unit of work. Exactly one of `run` or `cancel` is called.
pub trait Task: Send {
    fn run(self: Box<Self>);

    /// Called instead of `run` when the executor stops first.
    fn cancel(self: Box<Self>) {}
}

struct FnTask<F>(F);

impl<F: FnOnce() + Send> Task for FnTask<F> {
    fn run(self: Box<Self>) {
        (self.0)()
    }
}

/// Wrap a closure as a task with no cancellation behaviour.
pub fn task_fn<F>(f: F) -> Box<dyn Task>
where
    F: FnOnce() + Send + 'static,
{
    Box::new(FnTask(f))
}

/// Runs tasks by priority, 0 most urgent.
pub trait Executor: Send + Sync {
    /// Schedule `task`. After [`Executor::stop`] the task is cancelled
    /// immediately instead.
    fn add_task(&self, task: Box<dyn Task>, priority: u8);

    /// Cancel every task not yet started and refuse new ones. Idempotent.
    fn stop(&self);
}

pub(crate) struct QueuedTask {
    priority: u8,
    seq: u64,
    pub(crate) task: Box<dyn Task>,
}

impl QueuedTask {
    fn key(&self) -> Reverse<(u8, u64)> {
        Reverse((self.priority, self.seq))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// Priority queue of tasks, FIFO among equal priorities.
#[derive(Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

impl TaskQueue {
    pub(crate) fn push(&mut self, task: Box<dyn Task>, priority: u8) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedTask { priority, seq, task });
    }

    pub(crate) fn pop(&mut self) -> Option<Box<dyn Task>> {
        self.heap.pop().map(|q| q.task)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Remove everything, most urgent first.
    pub(crate) fn drain(&mut self) -> Vec<Box<dyn Task>> {
        std::iter::from_fn(|| self.pop()).collect()
    }
}

#[derive(Default)]
struct InlineState {
    queue: TaskQueue,
    run_on_add: bool,
    stopped: bool,
}

/// Runs tasks on whichever thread asks it to.
///
/// By default tasks only queue up until [`InlineExecutor::run_one`] or
/// [`InlineExecutor::run_all`] is called; with
/// [`InlineExecutor::set_run_on_add`] they run inside `add_task`.
#[derive(Default)]
pub struct InlineExecutor {
    state: Mutex<InlineState>,
}

impl std::fmt::Debug for InlineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InlineExecutor")
            .field("queued", &state.queue.len())
            .field("run_on_add", &state.run_on_add)
            .field("stopped", &state.stopped)
            .finish()
    }
}

impl InlineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_run_on_add(&self, run_on_add: bool) {
        self.state.lock().run_on_add = run_on_add;
    }

    /// Run the most urgent queued task. Returns false if nothing was queued.
    pub fn run_one(&self) -> bool {
        let task = {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.queue.pop()
        };
        match task {
            Some(task) => {
                task.run();
                true
            }
            None => false,
        }
    }

    /// Run queued tasks, including ones they add, until none are left.
    pub fn run_all(&self) {
        while self.run_one() {}
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Executor for InlineExecutor {
    fn add_task(&self, task: Box<dyn Task>, priority: u8) {
        let run_now = {
            let mut state = self.state.lock();
            if state.stopped {
                drop(state);
                task.cancel();
                return;
            }
            state.queue.push(task, priority);
            state.run_on_add
        };
        if run_now {
            self.run_all();
        }
    }

    fn stop(&self) {
        let cancelled = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.queue.drain()
        };
        for task in cancelled {
            task.cancel();
        }
    }
}
