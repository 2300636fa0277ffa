//! Lazy Thread Pool
//!
//! A bounded set of OS worker threads draining one shared FIFO of tasks.
//!
//! ```text
//!                  ┌─────────────────────────────┐
//!  push(task) ───► │ queue: [ t3 │ t2 │ t1 ] ──► │ worker 0 ── run ──┐
//!                  │                         ──► │ worker 1 ── run ──┤
//!                  └─────────────────────────────┘                   │
//!                        result published, joiners woken ◄───────────┘
//! ```
//!
//! - Workers are spawned lazily: a push spawns one only when every existing
//!   worker is busy and the cap is not reached yet. The pool never shrinks.
//! - Tasks dequeue in push order. Each task carries its own lock and condvar;
//!   the result is published under the task lock before `Finished` becomes
//!   observable, which is the happens-before edge a join relies on.
//! - Lock order is pool → task: a worker publishes a result with no pool
//!   lock held, and no path waits on the pool condvar holding a task lock.
//! - [`Task::detach`] hands the rest of the task's lifetime to the pool;
//!   [`Task::join`]/[`Task::timed_join`] block the submitter until the
//!   result is out. A timeout never cancels the job.
//!
//! ## Example
//!
//! ```
//! use corobus::pool::{Pool, Task};
//!
//! let pool = Pool::new(2).unwrap();
//! let task = Task::new(|| 6 * 7);
//!
//! pool.push(&task).unwrap();
//! assert_eq!(task.join().unwrap(), 42);
//!
//! task.delete().unwrap();
//! pool.delete().unwrap();
//! ```

mod error;
mod task;

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_utils::CachePadded;

pub use error::{HasTasks, PoolError, TaskRejected};
pub use task::{Task, TaskState};

use task::Runnable;

/// Hard cap on the worker threads of one pool.
pub const MAX_THREADS: usize = 20;
/// Hard cap on the tasks one pool holds at a time, pending plus running.
pub const MAX_TASKS: usize = 100_000;

struct PoolState {
    queue: VecDeque<Arc<dyn Runnable>>,
    workers: Vec<JoinHandle<()>>,
    /// Tasks currently executing on a worker.
    running: usize,
    /// Workers parked on the condvar (or about to pop).
    idle: usize,
    /// Monotonic; workers exit once set and the queue is drained.
    shutdown: bool,
}

struct PoolInner {
    /// Hot lock: every push, pop and completion goes through it. Padded so
    /// the condvar next to it does not share its cache line.
    state: CachePadded<Mutex<PoolState>>,
    cond: Condvar,
    max_threads: usize,
}

/// A bounded, lazily growing set of worker threads. See the
/// [module docs](self) for the full protocol.
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates an empty pool allowed to grow up to `max_threads` workers.
    /// No thread is spawned until work arrives.
    pub fn new(max_threads: usize) -> Result<Pool, PoolError> {
        if max_threads == 0 || max_threads > MAX_THREADS {
            return Err(PoolError::InvalidThreadCount);
        }
        Ok(Pool {
            inner: Arc::new(PoolInner {
                state: CachePadded::new(Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    workers: Vec::new(),
                    running: 0,
                    idle: 0,
                    shutdown: false,
                })),
                cond: Condvar::new(),
                max_threads,
            }),
        })
    }

    /// Number of worker threads spawned so far (the pool never shrinks).
    pub fn thread_count(&self) -> usize {
        self.inner.state.lock().unwrap().workers.len()
    }

    /// Enqueues a task, lazily spawning a worker when all existing ones are
    /// busy and the cap allows it.
    ///
    /// Fails with [`PoolError::TooManyTasks`] at [`MAX_TASKS`] in-flight
    /// tasks and with [`PoolError::InPool`] if the task is already queued or
    /// running. A finished task may be pushed again; that reruns its closure.
    pub fn push<T>(&self, task: &Task<T>) -> Result<(), PoolError>
    where
        T: Send + 'static,
    {
        let mut state = self.inner.state.lock().unwrap();
        if state.queue.len() + state.running >= MAX_TASKS {
            return Err(PoolError::TooManyTasks);
        }
        {
            // pool → task lock order
            let mut core = task.inner.core.lock().unwrap();
            if matches!(core.state, TaskState::Queued | TaskState::Running) {
                return Err(PoolError::InPool);
            }
            core.rearm();
        }
        if state.workers.len() < self.inner.max_threads && state.idle == 0 {
            self.spawn_worker(&mut state);
        }
        let runnable: Arc<dyn Runnable> = task.inner.clone();
        state.queue.push_back(runnable);
        self.inner.cond.notify_one();
        Ok(())
    }

    fn spawn_worker(&self, state: &mut PoolState) {
        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("corobus-worker-{}", state.workers.len()))
            .spawn(move || worker(inner));
        // a failed spawn does not fail the push: existing workers, or the
        // one spawned by a later push, will pick the task up
        if let Ok(handle) = spawned {
            state.workers.push(handle);
            // counts as idle until it pops its first task
            state.idle += 1;
        }
    }

    /// Shuts the pool down and joins every worker.
    ///
    /// While any task is still queued or running the call is rejected with
    /// [`HasTasks`], which hands the pool back so the caller can drain and
    /// retry. On success it returns only after every worker thread exited.
    pub fn delete(self) -> Result<(), HasTasks> {
        let mut state = self.inner.state.lock().unwrap();
        if !state.queue.is_empty() || state.running > 0 {
            drop(state);
            return Err(HasTasks(self));
        }
        state.shutdown = true;
        let workers = mem::take(&mut state.workers);
        drop(state);
        self.inner.cond.notify_all();
        for handle in workers {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for Pool {
    /// Graceful teardown: queued tasks still run, then the workers exit and
    /// are joined.
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap();
        state.shutdown = true;
        let workers = mem::take(&mut state.workers);
        drop(state);
        self.inner.cond.notify_all();
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("Pool")
            .field("max_threads", &self.inner.max_threads)
            .field("workers", &state.workers.len())
            .field("pending", &state.queue.len())
            .field("running", &state.running)
            .finish()
    }
}

fn worker(inner: Arc<PoolInner>) {
    let mut state = inner.state.lock().unwrap();
    loop {
        while state.queue.is_empty() && !state.shutdown {
            state = inner.cond.wait(state).unwrap();
        }
        if state.queue.is_empty() {
            // shutdown with a drained queue
            state.idle -= 1;
            return;
        }
        let task = state.queue.pop_front().expect("woken with an empty queue");
        state.idle -= 1;
        state.running += 1;
        drop(state);

        task.run();
        // a detached task is freed right here, by its last handle
        drop(task);

        state = inner.state.lock().unwrap();
        state.running -= 1;
        state.idle += 1;
        // a peer may be waiting to observe the pool drain
        inner.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Deletes the pool, retrying while a worker is still between publishing
    /// a result and leaving the running state.
    fn delete_drained(mut pool: Pool) {
        loop {
            match pool.delete() {
                Ok(()) => return,
                Err(HasTasks(p)) => {
                    pool = p;
                    thread::yield_now();
                }
            }
        }
    }

    /// Worker count bounds are enforced at construction
    #[test]
    fn test_new_rejects_bad_thread_count() {
        assert_eq!(Pool::new(0).unwrap_err(), PoolError::InvalidThreadCount);
        assert_eq!(
            Pool::new(MAX_THREADS + 1).unwrap_err(),
            PoolError::InvalidThreadCount
        );
        assert!(Pool::new(MAX_THREADS).is_ok());
    }

    /// Ten tasks on two workers: every join returns its own value and every
    /// closure ran exactly once
    #[test]
    fn test_push_and_join_all() {
        let pool = Pool::new(2).unwrap();
        let counter = Arc::new(Mutex::new(0usize));

        let tasks: Vec<Task<usize>> = (0..10)
            .map(|i| {
                let counter = counter.clone();
                Task::new(move || {
                    *counter.lock().unwrap() += 1;
                    i
                })
            })
            .collect();

        for task in &tasks {
            pool.push(task).unwrap();
        }
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.join().unwrap(), i);
        }

        assert_eq!(*counter.lock().unwrap(), 10);
        for task in tasks {
            task.delete().unwrap();
        }
        delete_drained(pool);
    }

    /// Workers appear one by one, only when all existing ones are busy, and
    /// never beyond the cap
    #[test]
    fn test_lazy_worker_scaling() {
        let pool = Pool::new(2).unwrap();
        assert_eq!(pool.thread_count(), 0);

        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let make_gated = || {
            let gate = gate_rx.clone();
            Task::new(move || gate.recv().unwrap())
        };

        let first = make_gated();
        pool.push(&first).unwrap();
        assert_eq!(pool.thread_count(), 1);
        while !first.is_running() {
            thread::yield_now();
        }

        let second = make_gated();
        pool.push(&second).unwrap();
        assert_eq!(pool.thread_count(), 2);
        while !second.is_running() {
            thread::yield_now();
        }

        // cap reached: a third task queues instead of spawning
        let third = make_gated();
        pool.push(&third).unwrap();
        assert_eq!(pool.thread_count(), 2);

        for _ in 0..3 {
            gate_tx.send(()).unwrap();
        }
        for task in [first, second, third] {
            task.join().unwrap();
            task.delete().unwrap();
        }
        delete_drained(pool);
    }

    /// A task can be pushed again after finishing; the closure reruns
    #[test]
    fn test_finished_task_is_reusable() {
        let pool = Pool::new(1).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = {
            let runs = runs.clone();
            Task::new(move || runs.fetch_add(1, Ordering::SeqCst) + 1)
        };

        pool.push(&task).unwrap();
        assert_eq!(task.join().unwrap(), 1);
        pool.push(&task).unwrap();
        assert_eq!(task.join().unwrap(), 2);

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        task.delete().unwrap();
        delete_drained(pool);
    }

    /// An in-flight task can be neither pushed again nor deleted
    #[test]
    fn test_in_flight_task_is_locked_in() {
        let pool = Pool::new(1).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let task = Task::new(move || gate_rx.recv().unwrap());

        pool.push(&task).unwrap();
        assert_eq!(pool.push(&task).unwrap_err(), PoolError::InPool);

        while !task.is_running() {
            thread::yield_now();
        }
        let rejected = task.delete().unwrap_err();
        assert_eq!(rejected.reason, PoolError::InPool);

        gate_tx.send(()).unwrap();
        let task = rejected.task;
        task.join().unwrap();
        task.delete().unwrap();
        delete_drained(pool);
    }

    /// Deleting a pool with a detached task in flight keeps failing with
    /// HasTasks until the task completes, then succeeds; the storage is
    /// released exactly once (by the worker)
    #[test]
    fn test_detach_then_delete_pool() {
        let pool = Pool::new(1).unwrap();
        let task = Task::new(|| thread::sleep(Duration::from_millis(50)));
        pool.push(&task).unwrap();
        task.detach().unwrap();

        let mut pool = pool;
        let mut rejections = 0;
        loop {
            match pool.delete() {
                Ok(()) => break,
                Err(HasTasks(p)) => {
                    rejections += 1;
                    pool = p;
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
        assert!(rejections > 0, "delete should fail while the task runs");
    }

    /// Detaching an already finished task releases it immediately
    #[test]
    fn test_detach_after_finish() {
        let pool = Pool::new(1).unwrap();
        let task = Task::new(|| 9);
        pool.push(&task).unwrap();
        task.join().unwrap();

        task.detach().unwrap();
        delete_drained(pool);
    }

    /// timed_join gives up without cancelling; a later join still gets the
    /// result
    #[test]
    fn test_timed_join() {
        let pool = Pool::new(1).unwrap();
        let task = Task::new(|| {
            thread::sleep(Duration::from_millis(200));
            31u32
        });
        pool.push(&task).unwrap();

        let started = Instant::now();
        assert_eq!(
            task.timed_join(Duration::from_millis(50)),
            Err(PoolError::Timeout)
        );
        assert!(started.elapsed() < Duration::from_millis(200));

        assert_eq!(task.timed_join(Duration::from_secs(1)), Ok(31));
        task.delete().unwrap();
        delete_drained(pool);
    }

    /// A zero timeout reports Timeout immediately on an unfinished task and
    /// still succeeds on a finished one
    #[test]
    fn test_timed_join_zero_timeout() {
        let pool = Pool::new(1).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let task = Task::new(move || {
            gate_rx.recv().unwrap();
            5
        });
        pool.push(&task).unwrap();

        assert_eq!(task.timed_join(Duration::ZERO), Err(PoolError::Timeout));

        gate_tx.send(()).unwrap();
        task.join().unwrap();
        assert_eq!(task.timed_join(Duration::ZERO), Ok(5));
        task.delete().unwrap();
        delete_drained(pool);
    }

    /// The in-flight cap counts queued plus running tasks
    #[test]
    fn test_too_many_tasks() {
        let pool = Pool::new(1).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let blocker = Task::new(move || gate_rx.recv().unwrap());
        pool.push(&blocker).unwrap();
        while !blocker.is_running() {
            thread::yield_now();
        }

        let fillers: Vec<Task<()>> = (1..MAX_TASKS).map(|_| Task::new(|| ())).collect();
        for filler in &fillers {
            pool.push(filler).unwrap();
        }

        let overflow = Task::new(|| ());
        assert_eq!(pool.push(&overflow).unwrap_err(), PoolError::TooManyTasks);

        gate_tx.send(()).unwrap();
        // dropping the pool drains the queue and joins the workers
    }

    /// Dropping a pool lets queued work finish first
    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = Pool::new(2).unwrap();
            for _ in 0..32 {
                let counter = counter.clone();
                let task = Task::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                pool.push(&task).unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    /// A panicking job is rethrown by the join
    #[test]
    #[should_panic(expected = "boom")]
    fn test_join_rethrows_task_panic() {
        let pool = Pool::new(1).unwrap();
        let task: Task<()> = Task::new(|| panic!("boom"));
        pool.push(&task).unwrap();
        let _ = task.join();
    }

    /// A panicking job does not kill its worker
    #[test]
    fn test_worker_survives_task_panic() {
        let pool = Pool::new(1).unwrap();
        let bad: Task<()> = Task::new(|| panic!("boom"));
        pool.push(&bad).unwrap();
        bad.detach().unwrap();

        let good = Task::new(|| 3);
        pool.push(&good).unwrap();
        assert_eq!(good.join().unwrap(), 3);
        assert_eq!(pool.thread_count(), 1);

        good.delete().unwrap();
        let mut pool = pool;
        loop {
            match pool.delete() {
                Ok(()) => break,
                Err(HasTasks(p)) => {
                    pool = p;
                    thread::yield_now();
                }
            }
        }
    }
}
