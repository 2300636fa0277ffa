use std::{error, fmt};

use super::{Pool, Task};

/// Error codes returned by pool and task operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Requested worker count is outside `1..=MAX_THREADS`.
    InvalidThreadCount,
    /// The pool already holds `MAX_TASKS` pending or running tasks.
    TooManyTasks,
    /// The task was never pushed to a pool.
    NotPushed,
    /// The task is currently queued or running.
    InPool,
    /// The deadline elapsed before the task finished.
    Timeout,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PoolError::InvalidThreadCount => "invalid worker thread count",
            PoolError::TooManyTasks => "pool task capacity exhausted",
            PoolError::NotPushed => "task was never pushed",
            PoolError::InPool => "task is queued or running",
            PoolError::Timeout => "timed out waiting for the task",
        };
        f.write_str(msg)
    }
}

impl error::Error for PoolError {}

/// Returned by [`Pool::delete`] while tasks are still queued or running.
/// Carries the pool back so the caller can drain and retry.
#[derive(Debug)]
pub struct HasTasks(pub Pool);

impl fmt::Display for HasTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("pool still has queued or running tasks")
    }
}

impl error::Error for HasTasks {}

/// Returned by [`Task::delete`] and [`Task::detach`]: hands the task back to
/// the caller together with the reason it was rejected.
pub struct TaskRejected<T> {
    pub task: Task<T>,
    pub reason: PoolError,
}

impl<T> fmt::Debug for TaskRejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRejected")
            .field("task", &self.task)
            .field("reason", &self.reason)
            .finish()
    }
}

impl<T> fmt::Display for TaskRejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task rejected: {}", self.reason)
    }
}

impl<T> error::Error for TaskRejected<T> {}
