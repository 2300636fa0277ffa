//! Coordination primitives for two scheduling worlds:
//!
//! - [`bus`] — a **cooperative channel bus**: many bounded FIFO channels
//!   multiplexed under integer handles, shared by coroutines on one
//!   single-threaded cooperative scheduler. Blocking operations are futures;
//!   any single-threaded executor can drive them.
//! - [`pool`] — a **lazy thread pool**: a bounded set of OS worker threads,
//!   grown on demand, draining a shared FIFO of joinable, detachable tasks.
//!
//! The two sides share one idea: a parked producer or consumer sits in a
//! FIFO wait queue and is woken exactly when it can make progress — through
//! a [`Waker`](std::task::Waker) on the bus side, through a condvar on the
//! pool side.
//!
//! ## Quick look
//!
//! ```
//! use corobus::bus::Bus;
//! use corobus::pool::{Pool, Task};
//!
//! // channels between coroutines
//! let bus = Bus::new();
//! let h = bus.open(8);
//! bus.try_send(h, 7).unwrap();
//! assert_eq!(bus.try_recv(h), Ok(7));
//!
//! // tasks between threads
//! let pool = Pool::new(4).unwrap();
//! let task = Task::new(|| 6 * 7);
//! pool.push(&task).unwrap();
//! assert_eq!(task.join().unwrap(), 42);
//! ```

pub mod bus;
pub mod pool;

pub(crate) mod waitq;
