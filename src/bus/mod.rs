//! Cooperative Channel Bus
//!
//! Many bounded FIFO channels multiplexed under integer handles, shared by
//! coroutines running on one single-threaded cooperative scheduler.
//!
//! ```text
//!                 ┌──────────────────────────────────┐
//!                 │ Bus                              │
//!  send(0, x) ──► │  slot 0: [ 3 │ 1 │ 4 ]  cap 4    │ ──► recv(0)
//!  send(1, y) ──► │  slot 1: [ 9 ]          cap 1    │ ──► recv(1)
//!                 │  slot 2: (free)                  │
//!                 └──────────────────────────────────┘
//! ```
//!
//! - **open** claims the lowest free slot and returns its index as the
//!   channel handle; **close** retires the slot so it can be reused.
//! - Each channel is a bounded FIFO of `u32` values with two wait queues:
//!   producers park while the buffer is full, consumers while it is empty.
//! - **broadcast** appends one value to *every* open channel, all or nothing.
//! - The `_slice` operations move the longest possible run in one step and
//!   never split a request across suspensions.
//!
//! ## Blocking model
//!
//! The bus itself owns no scheduler. Blocking operations return futures and
//! park themselves on the channel's wait queue via the [`Waker`] of whatever
//! single-threaded executor drives them; `try_` variants are plain calls that
//! fail with [`BusError::WouldBlock`] instead of waiting. The bus is not
//! `Send`: every coroutine sharing it must run on the same thread, and a
//! running coroutine has exclusive access between suspension points, so no
//! locks are involved.
//!
//! [`Waker`]: std::task::Waker
//!
//! ## Close protocol
//!
//! Closing a channel wakes every parked coroutine on it; they observe
//! [`BusError::NoChannel`] when they resume. Values buffered at close time
//! stay readable: receivers drain them first and get `NoChannel` only once
//! the channel is both closed and empty. The slot becomes reusable as soon
//! as the closed channel is drained.
//!
//! ## Example
//!
//! ```
//! use corobus::bus::{Bus, BusError};
//!
//! let bus = Bus::new();
//! let h = bus.open(2);
//!
//! bus.try_send(h, 1).unwrap();
//! bus.try_send(h, 2).unwrap();
//! assert_eq!(bus.try_send(h, 3), Err(BusError::WouldBlock)); // full
//!
//! assert_eq!(bus.try_recv(h), Ok(1));
//! assert_eq!(bus.try_recv(h), Ok(2));
//!
//! bus.close(h).unwrap();
//! assert_eq!(bus.try_recv(h), Err(BusError::NoChannel));
//! ```

mod channel;
mod error;
mod ops;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use channel::Channel;
pub use error::BusError;
pub use ops::{BroadcastFuture, RecvFuture, RecvSliceFuture, SendFuture, SendSliceFuture};

/// Index of a channel slot inside a [`Bus`].
///
/// Handles are dense small integers: `open` always returns the lowest free
/// slot, and a retired slot is reused by the next `open`.
pub type Handle = usize;

/// A collection of bounded channels shared by cooperating coroutines.
pub struct Bus {
    slots: RefCell<Vec<Option<Rc<Channel>>>>,
    /// Outcome of the most recent public operation, `None` after a success.
    last_error: Cell<Option<BusError>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            last_error: Cell::new(None),
        }
    }

    /// Outcome of the most recent public operation: `None` after a success,
    /// the error kind after a failure. Operations that are parked leave
    /// [`BusError::WouldBlock`] observable until they complete.
    pub fn last_error(&self) -> Option<BusError> {
        self.last_error.get()
    }

    fn ok(&self) {
        self.last_error.set(None);
    }

    fn fail(&self, err: BusError) -> BusError {
        self.last_error.set(Some(err));
        err
    }

    fn channel(&self, handle: Handle) -> Option<Rc<Channel>> {
        self.slots.borrow().get(handle).cloned().flatten()
    }

    /// Resolves a handle to its open-or-draining channel, recording
    /// [`BusError::NoChannel`] for a free slot.
    fn lookup(&self, handle: Handle) -> Result<Rc<Channel>, BusError> {
        self.channel(handle).ok_or_else(|| self.fail(BusError::NoChannel))
    }

    /// Frees a slot for reuse. The channel object itself stays alive while
    /// any coroutine still holds an `Rc` to it.
    fn retire(&self, handle: Handle) {
        self.slots.borrow_mut()[handle] = None;
    }

    /// First open channel whose buffer is full, if any. This is the channel
    /// a blocked broadcast parks on.
    fn first_full_open(&self) -> Option<Handle> {
        self.slots.borrow().iter().enumerate().find_map(|(i, slot)| {
            let ch = slot.as_ref()?;
            (!ch.is_closed() && ch.is_full()).then_some(i)
        })
    }

    /// Opens a channel with the given capacity and returns its handle — the
    /// lowest free slot index.
    ///
    /// `capacity` must be positive.
    pub fn open(&self, capacity: usize) -> Handle {
        let ch = Rc::new(Channel::new(capacity));
        let mut slots = self.slots.borrow_mut();
        let handle = match slots.iter().position(|slot| slot.is_none()) {
            Some(free) => {
                slots[free] = Some(ch);
                free
            }
            None => {
                slots.push(Some(ch));
                slots.len() - 1
            }
        };
        drop(slots);
        self.ok();
        handle
    }

    /// Closes a channel: every coroutine parked on it is woken and observes
    /// [`BusError::NoChannel`]. Buffered values stay readable through
    /// [`recv`](Self::recv)/[`try_recv`](Self::try_recv); the slot is freed
    /// once the buffer is drained (immediately, if it already is).
    pub fn close(&self, handle: Handle) -> Result<(), BusError> {
        let ch = self.lookup(handle)?;
        if ch.is_closed() {
            return Err(self.fail(BusError::NoChannel));
        }
        ch.close();
        if ch.is_empty() {
            self.retire(handle);
        }
        ch.send_waiters.wake_all();
        ch.recv_waiters.wake_all();
        self.ok();
        Ok(())
    }

    /// Appends `value` if the channel has room, without blocking.
    pub fn try_send(&self, handle: Handle, value: u32) -> Result<(), BusError> {
        let ch = self.lookup(handle)?;
        if ch.is_closed() {
            return Err(self.fail(BusError::NoChannel));
        }
        if ch.is_full() {
            return Err(self.fail(BusError::WouldBlock));
        }
        ch.push(value);
        self.ok();
        // one slot filled: exactly one parked consumer can proceed
        ch.recv_waiters.wake_one();
        Ok(())
    }

    /// Sends `value`, waiting for buffer space if the channel is full.
    pub fn send(&self, handle: Handle, value: u32) -> SendFuture<'_> {
        SendFuture::new(self, handle, value)
    }

    /// Pops the next value if one is buffered, without blocking.
    ///
    /// A closed channel keeps returning its buffered values until they are
    /// drained; only then does it fail with [`BusError::NoChannel`].
    pub fn try_recv(&self, handle: Handle) -> Result<u32, BusError> {
        let ch = self.lookup(handle)?;
        let Some(value) = ch.pop() else {
            let err = if ch.is_closed() {
                BusError::NoChannel
            } else {
                BusError::WouldBlock
            };
            return Err(self.fail(err));
        };
        if ch.is_closed() && ch.is_empty() {
            // last buffered value of a closed channel: the slot is free now
            self.retire(handle);
        }
        self.ok();
        // one slot freed: exactly one parked producer can proceed
        ch.send_waiters.wake_one();
        Ok(value)
    }

    /// Receives the next value, waiting for one if the channel is empty.
    pub fn recv(&self, handle: Handle) -> RecvFuture<'_> {
        RecvFuture::new(self, handle)
    }

    /// Appends `value` to every open channel, or fails without touching any.
    ///
    /// Fails with [`BusError::NoChannel`] if the bus has no open channel and
    /// with [`BusError::WouldBlock`] if any open channel is full. Closed
    /// channels that are still draining are skipped.
    pub fn try_broadcast(&self, value: u32) -> Result<(), BusError> {
        let open: Vec<Rc<Channel>> = self
            .slots
            .borrow()
            .iter()
            .flatten()
            .filter(|ch| !ch.is_closed())
            .cloned()
            .collect();
        if open.is_empty() {
            return Err(self.fail(BusError::NoChannel));
        }
        if open.iter().any(|ch| ch.is_full()) {
            return Err(self.fail(BusError::WouldBlock));
        }
        for ch in &open {
            ch.push(value);
        }
        self.ok();
        for ch in &open {
            ch.recv_waiters.wake_one();
        }
        Ok(())
    }

    /// Broadcasts `value` to every open channel, waiting until all of them
    /// have room. The append itself is all-or-nothing.
    pub fn broadcast(&self, value: u32) -> BroadcastFuture<'_> {
        BroadcastFuture::new(self, value)
    }

    /// Appends the longest prefix of `values` that fits right now and returns
    /// how many items were taken. Fails with [`BusError::WouldBlock`] when
    /// not even one fits (an empty `values` can never make progress).
    pub fn try_send_slice(&self, handle: Handle, values: &[u32]) -> Result<usize, BusError> {
        let ch = self.lookup(handle)?;
        if ch.is_closed() {
            return Err(self.fail(BusError::NoChannel));
        }
        let sent = ch.push_slice(values);
        if sent == 0 {
            return Err(self.fail(BusError::WouldBlock));
        }
        self.ok();
        for _ in 0..sent {
            ch.recv_waiters.wake_one();
        }
        Ok(sent)
    }

    /// Sends as much of `values` as fits in one step, waiting until at least
    /// one item does. The transfer is never split across suspensions.
    pub fn send_slice<'a>(&'a self, handle: Handle, values: &'a [u32]) -> SendSliceFuture<'a> {
        SendSliceFuture::new(self, handle, values)
    }

    /// Moves up to `out.len()` buffered values into `out` and returns how
    /// many were moved. Fails with [`BusError::WouldBlock`] when the buffer
    /// is empty (or `out` is empty), and with [`BusError::NoChannel`] once
    /// the channel is closed and drained.
    pub fn try_recv_slice(&self, handle: Handle, out: &mut [u32]) -> Result<usize, BusError> {
        let ch = self.lookup(handle)?;
        let received = ch.pop_slice(out);
        if received == 0 {
            let err = if ch.is_closed() && ch.is_empty() {
                BusError::NoChannel
            } else {
                BusError::WouldBlock
            };
            return Err(self.fail(err));
        }
        if ch.is_closed() && ch.is_empty() {
            self.retire(handle);
        }
        self.ok();
        for _ in 0..received {
            ch.send_waiters.wake_one();
        }
        Ok(received)
    }

    /// Receives a run of values into `out` in one step, waiting until at
    /// least one is buffered.
    pub fn recv_slice<'a>(&'a self, handle: Handle, out: &'a mut [u32]) -> RecvSliceFuture<'a> {
        RecvSliceFuture::new(self, handle, out)
    }

    /// Capacity the channel was opened with.
    pub fn capacity(&self, handle: Handle) -> Result<usize, BusError> {
        let ch = self.lookup(handle)?;
        self.ok();
        Ok(ch.capacity())
    }

    /// Number of values currently buffered.
    pub fn len(&self, handle: Handle) -> Result<usize, BusError> {
        let ch = self.lookup(handle)?;
        self.ok();
        Ok(ch.len())
    }

    /// True once the channel has been closed (it may still be draining).
    pub fn is_closed(&self, handle: Handle) -> Result<bool, BusError> {
        let ch = self.lookup(handle)?;
        self.ok();
        Ok(ch.is_closed())
    }
}
