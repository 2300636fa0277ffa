use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::waitq::WaitQueue;

/// Per-slot channel state: a bounded FIFO of values plus the two queues of
/// coroutines parked on it.
///
/// Only the currently running coroutine touches a channel, so plain
/// single-threaded interior mutability is enough; there is no suspension
/// point inside any of these methods.
pub(super) struct Channel {
    capacity: usize,
    data: RefCell<VecDeque<u32>>,
    closed: Cell<bool>,
    pub(super) send_waiters: WaitQueue,
    pub(super) recv_waiters: WaitQueue,
}

impl Channel {
    pub(super) fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "channel capacity must be positive");
        Self {
            capacity,
            // grows on demand up to `capacity` items
            data: RefCell::new(VecDeque::new()),
            closed: Cell::new(false),
            send_waiters: WaitQueue::new(),
            recv_waiters: WaitQueue::new(),
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(super) fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }

    pub(super) fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Free space left in the buffer.
    pub(super) fn room(&self) -> usize {
        self.capacity - self.len()
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Monotonic: a channel never reopens.
    pub(super) fn close(&self) {
        self.closed.set(true);
    }

    pub(super) fn push(&self, value: u32) {
        debug_assert!(!self.is_full());
        self.data.borrow_mut().push_back(value);
    }

    pub(super) fn pop(&self) -> Option<u32> {
        self.data.borrow_mut().pop_front()
    }

    /// Appends the longest prefix of `values` that fits, returning how many
    /// items were taken.
    pub(super) fn push_slice(&self, values: &[u32]) -> usize {
        let n = self.room().min(values.len());
        self.data.borrow_mut().extend(values[..n].iter().copied());
        n
    }

    /// Moves up to `out.len()` buffered items into `out`, returning how many
    /// were moved.
    pub(super) fn pop_slice(&self, out: &mut [u32]) -> usize {
        let mut data = self.data.borrow_mut();
        let n = data.len().min(out.len());
        for (slot, value) in out.iter_mut().zip(data.drain(..n)) {
            *slot = value;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Buffer stays within 0..=capacity and keeps FIFO order
    #[test]
    fn test_push_pop_fifo() {
        let ch = Channel::new(3);
        assert!(ch.is_empty());
        ch.push(1);
        ch.push(2);
        ch.push(3);
        assert!(ch.is_full());
        assert_eq!(ch.room(), 0);
        assert_eq!(ch.pop(), Some(1));
        assert_eq!(ch.pop(), Some(2));
        assert_eq!(ch.pop(), Some(3));
        assert_eq!(ch.pop(), None);
    }

    /// push_slice takes only what fits, pop_slice only what is buffered
    #[test]
    fn test_slice_transfer_is_partial() {
        let ch = Channel::new(4);
        assert_eq!(ch.push_slice(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(ch.len(), 4);

        let mut out = [0u32; 3];
        assert_eq!(ch.pop_slice(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(ch.len(), 1);

        let mut out = [0u32; 8];
        assert_eq!(ch.pop_slice(&mut out), 1);
        assert_eq!(out[0], 4);
    }

    /// close is monotonic and does not disturb buffered data
    #[test]
    fn test_close_keeps_data() {
        let ch = Channel::new(2);
        ch.push(9);
        ch.close();
        assert!(ch.is_closed());
        assert_eq!(ch.pop(), Some(9));
        assert!(ch.is_closed());
    }
}
