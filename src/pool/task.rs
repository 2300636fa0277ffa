use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::error::{PoolError, TaskRejected};

/// Lifecycle of a task. Transitions only move forward; pushing a finished
/// task again restarts the cycle at `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Allocated, never enqueued.
    Created,
    /// Sitting in a pool's FIFO queue.
    Queued,
    /// A worker is executing the job right now.
    Running,
    /// The job returned; the result is published.
    Finished,
}

type Job<T> = Box<dyn FnMut() -> T + Send>;

pub(super) struct TaskCore<T> {
    /// Taken out only for the duration of a run, then put back so the task
    /// can be pushed again.
    job: Option<Job<T>>,
    pub(super) state: TaskState,
    result: Option<T>,
    /// Payload of a job that panicked; rethrown by the first join.
    panic: Option<Box<dyn Any + Send>>,
    panicked: bool,
    /// Sticky: set by the first successful push.
    pub(super) pushed: bool,
    /// Sticky: set once a join has observed `Finished`.
    joined: bool,
    /// The submitter renounced the result; the queue handle is the last one.
    detached: bool,
}

impl<T> TaskCore<T> {
    /// Re-enters the queue: called under the task lock right before the pool
    /// enqueues a (fresh or finished) task.
    pub(super) fn rearm(&mut self) {
        self.state = TaskState::Queued;
        self.pushed = true;
        self.joined = false;
        self.result = None;
        self.panic = None;
        self.panicked = false;
    }
}

pub(super) struct TaskInner<T> {
    pub(super) core: Mutex<TaskCore<T>>,
    pub(super) cond: Condvar,
}

/// Type-erased view of a queued task, what the pool's FIFO actually holds.
pub(super) trait Runnable: Send + Sync {
    /// Executes the job and publishes the result. Called by a worker with no
    /// pool lock held.
    fn run(&self);
}

impl<T: Send> Runnable for TaskInner<T> {
    fn run(&self) {
        let mut job = {
            let mut core = self.core.lock().unwrap();
            core.state = TaskState::Running;
            core.job.take().expect("queued task without a job")
        };

        // the job runs outside every lock; a panic is caught so the worker
        // survives and joiners still observe completion
        let outcome = panic::catch_unwind(AssertUnwindSafe(&mut job));

        let mut core = self.core.lock().unwrap();
        core.job = Some(job);
        match outcome {
            Ok(value) => core.result = Some(value),
            Err(payload) => {
                core.panic = Some(payload);
                core.panicked = true;
            }
        }
        // the result is in place before Finished becomes observable
        core.state = TaskState::Finished;
        self.cond.notify_all();
    }
}

/// A unit of work submitted to a [`Pool`](super::Pool).
///
/// The handle is shared with the pool while the task is in flight; dropping
/// it does not stop the job. A finished task can be pushed again, rerunning
/// the same closure.
pub struct Task<T> {
    pub(super) inner: Arc<TaskInner<T>>,
}

impl<T: Send + 'static> Task<T> {
    /// Creates a task in the `Created` state. Nothing runs until the task is
    /// pushed to a pool.
    pub fn new<F>(job: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        Task {
            inner: Arc::new(TaskInner {
                core: Mutex::new(TaskCore {
                    job: Some(Box::new(job)),
                    state: TaskState::Created,
                    result: None,
                    panic: None,
                    panicked: false,
                    pushed: false,
                    joined: false,
                    detached: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Snapshot of the lifecycle state.
    pub fn state(&self) -> TaskState {
        self.inner.core.lock().unwrap().state
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Blocks until the task finishes and returns its result.
    ///
    /// Fails with [`PoolError::NotPushed`] if the task was never pushed.
    /// Joining again is fine and returns the same result.
    ///
    /// # Panics
    ///
    /// Rethrows the job's panic if the job panicked.
    pub fn join(&self) -> Result<T, PoolError>
    where
        T: Clone,
    {
        let mut core = self.inner.core.lock().unwrap();
        if !core.pushed {
            return Err(PoolError::NotPushed);
        }
        while core.state != TaskState::Finished {
            core = self.inner.cond.wait(core).unwrap();
        }
        Self::claim_result(core)
    }

    /// As [`join`](Self::join), but gives up with [`PoolError::Timeout`] once
    /// `timeout` has elapsed. A timeout does not cancel the task; it keeps
    /// running and can be joined again later.
    ///
    /// A zero timeout reports `Timeout` immediately unless the task already
    /// finished.
    pub fn timed_join(&self, timeout: Duration) -> Result<T, PoolError>
    where
        T: Clone,
    {
        let deadline = Instant::now() + timeout;
        let mut core = self.inner.core.lock().unwrap();
        if !core.pushed {
            return Err(PoolError::NotPushed);
        }
        while core.state != TaskState::Finished {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(PoolError::Timeout);
            };
            let (guard, wait) = self.inner.cond.wait_timeout(core, remaining).unwrap();
            core = guard;
            if wait.timed_out() && core.state != TaskState::Finished {
                return Err(PoolError::Timeout);
            }
        }
        Self::claim_result(core)
    }

    fn claim_result(mut core: MutexGuard<'_, TaskCore<T>>) -> Result<T, PoolError>
    where
        T: Clone,
    {
        core.joined = true;
        if let Some(payload) = core.panic.take() {
            drop(core);
            panic::resume_unwind(payload);
        }
        if core.panicked {
            drop(core);
            panic!("pool task panicked");
        }
        Ok(core
            .result
            .clone()
            .expect("finished task without a result"))
    }

    /// Renounces the result: after a detach the pool owns the task's
    /// remaining lifetime and its storage is released as soon as the job
    /// finishes (immediately, if it already has).
    ///
    /// Rejected with [`PoolError::NotPushed`] if the task was never pushed;
    /// the task is handed back inside the error.
    pub fn detach(self) -> Result<(), TaskRejected<T>> {
        let mut core = self.inner.core.lock().unwrap();
        if !core.pushed {
            drop(core);
            return Err(TaskRejected {
                task: self,
                reason: PoolError::NotPushed,
            });
        }
        core.detached = true;
        drop(core);
        // our handle drops here; for a finished task it is the last one,
        // otherwise the queue's handle keeps the task alive until the worker
        // publishes the result and drops it
        Ok(())
    }

    /// Releases the task. Rejected with [`PoolError::InPool`] while the task
    /// is queued or running; the task is handed back inside the error.
    pub fn delete(self) -> Result<(), TaskRejected<T>> {
        let in_flight = matches!(
            self.inner.core.lock().unwrap().state,
            TaskState::Queued | TaskState::Running
        );
        if in_flight {
            return Err(TaskRejected {
                task: self,
                reason: PoolError::InPool,
            });
        }
        Ok(())
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock().unwrap();
        f.debug_struct("Task")
            .field("state", &core.state)
            .field("pushed", &core.pushed)
            .field("joined", &core.joined)
            .field("detached", &core.detached)
            .finish()
    }
}
