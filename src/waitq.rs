use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;

/// Identifies one parked coroutine inside a [`WaitQueue`].
///
/// Tokens are unique process-wide and never reused, so a token minted on a
/// channel that has since been retired can never match an entry of a channel
/// that later reused the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaitToken(u64);

fn next_token() -> WaitToken {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    WaitToken(NEXT.fetch_add(1, Ordering::Relaxed))
}

struct Entry {
    token: WaitToken,
    waker: Waker,
}

/// FIFO queue of suspended coroutines.
///
/// Every blocking bus operation parks here while it cannot make progress:
/// one entry per suspended coroutine, in arrival order. The suspended
/// operation's future owns its entry and unlinks it on drop, so an entry
/// never outlives the stack frame that created it.
#[derive(Default)]
pub(crate) struct WaitQueue {
    entries: RefCell<VecDeque<Entry>>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Parks the calling coroutine at the tail of the queue.
    pub(crate) fn suspend(&self, waker: Waker) -> WaitToken {
        let token = next_token();
        self.entries.borrow_mut().push_back(Entry { token, waker });
        token
    }

    /// Refreshes the waker of a still-parked coroutine, keeping its FIFO
    /// position. Returns false if the entry was already woken or unlinked,
    /// in which case the caller has to [`suspend`](Self::suspend) again.
    pub(crate) fn resume(&self, token: WaitToken, waker: &Waker) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.iter_mut().find(|e| e.token == token) {
            Some(entry) => {
                entry.waker.clone_from(waker);
                true
            }
            None => false,
        }
    }

    /// Wakes the head of the queue, if any.
    pub(crate) fn wake_one(&self) {
        let head = self.entries.borrow_mut().pop_front();
        // wake after the borrow is released: a waker may re-enter the bus
        if let Some(entry) = head {
            entry.waker.wake();
        }
    }

    /// Unlinks every entry and wakes each one, in FIFO order.
    pub(crate) fn wake_all(&self) {
        let drained: Vec<Entry> = self.entries.borrow_mut().drain(..).collect();
        for entry in drained {
            entry.waker.wake();
        }
    }

    /// Unlinks an entry without waking it. No-op if the entry is gone.
    pub(crate) fn forget(&self, token: WaitToken) {
        let mut entries = self.entries.borrow_mut();
        if let Some(i) = entries.iter().position(|e| e.token == token) {
            entries.remove(i);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
