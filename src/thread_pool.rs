//! Fixed-size worker pool.
//!
//! One [`ThreadPool`] serves many sessions. Each session gets its own
//! [`ThreadPoolExecutor`] so stopping one session cancels only that
//! session's queued tasks. All executors share the pool's priority queue.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::executor::{Executor, Task};

struct Job {
    priority: u8,
    seq: u64,
    owner: Arc<ExecutorState>,
    task: Box<dyn Task>,
}

impl Job {
    fn key(&self) -> Reverse<(u8, u64)> {
        Reverse((self.priority, self.seq))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// Per-executor bookkeeping. Locked after the pool lock, never before.
#[derive(Default)]
struct ExecutorCounters {
    stopped: bool,
    running: usize,
}

#[derive(Default)]
struct ExecutorState {
    counters: Mutex<ExecutorCounters>,
}

struct PoolState {
    queue: BinaryHeap<Job>,
    next_seq: u64,
    shutting_down: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Signalled when a job is queued or the pool shuts down.
    job_ready: Condvar,
    /// Signalled when a job finishes.
    job_done: Condvar,
}

/// A fixed set of worker threads draining one priority queue.
///
/// Dropping the pool lets workers finish the queued jobs, then joins them.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl ThreadPool {
    /// Spawn `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> io::Result<Self> {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                shutting_down: false,
            }),
            job_ready: Condvar::new(),
            job_done: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            workers: Vec::new(),
        };
        for i in 0..num_threads.max(1) {
            let shared = pool.shared.clone();
            // On error, dropping `pool` joins the workers spawned so far.
            let handle = thread::Builder::new()
                .name(format!("h2-worker-{}", i))
                .spawn(move || worker_loop(&shared))?;
            pool.workers.push(handle);
        }
        debug!(threads = pool.workers.len(), "thread pool started");
        Ok(pool)
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// A new executor submitting into this pool.
    pub fn new_executor(&self) -> Arc<ThreadPoolExecutor> {
        Arc::new(ThreadPoolExecutor {
            pool: self.shared.clone(),
            state: Arc::new(ExecutorState::default()),
        })
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.state.lock().shutting_down = true;
        self.shared.job_ready.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked outside a task");
            }
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    let mut state = shared.state.lock();
    loop {
        if let Some(job) = state.queue.pop() {
            job.owner.counters.lock().running += 1;
            drop(state);

            if catch_unwind(AssertUnwindSafe(|| job.task.run())).is_err() {
                error!("task panicked");
            }

            state = shared.state.lock();
            job.owner.counters.lock().running -= 1;
            shared.job_done.notify_all();
            continue;
        }
        if state.shutting_down {
            return;
        }
        shared.job_ready.wait(&mut state);
    }
}

/// An [`Executor`] feeding a [`ThreadPool`].
///
/// Stopping it cancels its queued tasks and waits for its running tasks to
/// return. Stop must not be called from one of its own tasks.
pub struct ThreadPoolExecutor {
    pool: Arc<PoolShared>,
    state: Arc<ExecutorState>,
}

impl std::fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counters = self.state.counters.lock();
        f.debug_struct("ThreadPoolExecutor")
            .field("stopped", &counters.stopped)
            .field("running", &counters.running)
            .finish()
    }
}

impl Executor for ThreadPoolExecutor {
    fn add_task(&self, task: Box<dyn Task>, priority: u8) {
        let mut pool = self.pool.state.lock();
        if pool.shutting_down || self.state.counters.lock().stopped {
            drop(pool);
            task.cancel();
            return;
        }
        let seq = pool.next_seq;
        pool.next_seq += 1;
        pool.queue.push(Job {
            priority,
            seq,
            owner: self.state.clone(),
            task,
        });
        drop(pool);
        self.pool.job_ready.notify_one();
    }

    fn stop(&self) {
        let mut pool = self.pool.state.lock();
        self.state.counters.lock().stopped = true;

        let (mine, others): (Vec<Job>, Vec<Job>) = std::mem::take(&mut pool.queue)
            .into_vec()
            .into_iter()
            .partition(|job| Arc::ptr_eq(&job.owner, &self.state));
        pool.queue = others.into();

        while self.state.counters.lock().running > 0 {
            self.pool.job_done.wait(&mut pool);
        }
        drop(pool);

        if !mine.is_empty() {
            debug!(cancelled = mine.len(), "executor stopped");
        }
        let mut mine: BinaryHeap<Job> = mine.into();
        while let Some(job) = mine.pop() {
            job.task.cancel();
        }
    }
}
