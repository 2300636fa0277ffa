use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use super::{Bus, BusError, Handle};
use crate::waitq::WaitToken;

/// Which of a channel's two wait queues an operation parks on.
#[derive(Clone, Copy)]
enum Side {
    Send,
    Recv,
}

/// Parks the operation on `channel`'s queue, or refreshes its waker in place
/// if it is still parked from an earlier poll. The caller has just observed
/// `WouldBlock`, so the channel is guaranteed to still be in its slot.
fn park(
    bus: &Bus,
    channel: Handle,
    side: Side,
    parked: Option<WaitToken>,
    waker: &Waker,
) -> WaitToken {
    let ch = bus.channel(channel).expect("parked on a vanished channel");
    let queue = match side {
        Side::Send => &ch.send_waiters,
        Side::Recv => &ch.recv_waiters,
    };
    match parked {
        // spurious poll: keep the FIFO position
        Some(token) if queue.resume(token, waker) => token,
        // first poll, or woken and lost the race: (re)park at the tail
        _ => queue.suspend(waker.clone()),
    }
}

/// Unlinks a parked entry when the operation is dropped mid-wait. If the
/// channel is gone (closed and drained) the entry was already unlinked by the
/// closing wake-up; a reused slot cannot match because tokens are unique.
fn unpark(bus: &Bus, channel: Handle, side: Side, parked: Option<WaitToken>) {
    let Some(token) = parked else { return };
    let Some(ch) = bus.channel(channel) else {
        return;
    };
    let queue = match side {
        Side::Send => &ch.send_waiters,
        Side::Recv => &ch.recv_waiters,
    };
    queue.forget(token);
}

/// Future of [`Bus::send`]. Resolves once the value is buffered, or with
/// [`BusError::NoChannel`] if the channel goes away while waiting.
#[must_use = "futures do nothing unless polled"]
pub struct SendFuture<'a> {
    bus: &'a Bus,
    channel: Handle,
    value: u32,
    parked: Option<WaitToken>,
}

impl<'a> SendFuture<'a> {
    pub(super) fn new(bus: &'a Bus, channel: Handle, value: u32) -> Self {
        Self {
            bus,
            channel,
            value,
            parked: None,
        }
    }
}

impl Future for SendFuture<'_> {
    type Output = Result<(), BusError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.bus.try_send(this.channel, this.value) {
            Err(BusError::WouldBlock) => {
                this.parked = Some(park(this.bus, this.channel, Side::Send, this.parked, cx.waker()));
                Poll::Pending
            }
            done => {
                // a spurious poll can complete while the entry is still
                // linked; it must not swallow a later wake-up
                unpark(this.bus, this.channel, Side::Send, this.parked.take());
                Poll::Ready(done)
            }
        }
    }
}

impl Drop for SendFuture<'_> {
    fn drop(&mut self) {
        unpark(self.bus, self.channel, Side::Send, self.parked.take());
    }
}

/// Future of [`Bus::recv`]. Resolves with the next value, or with
/// [`BusError::NoChannel`] once the channel is closed and drained.
#[must_use = "futures do nothing unless polled"]
pub struct RecvFuture<'a> {
    bus: &'a Bus,
    channel: Handle,
    parked: Option<WaitToken>,
}

impl<'a> RecvFuture<'a> {
    pub(super) fn new(bus: &'a Bus, channel: Handle) -> Self {
        Self {
            bus,
            channel,
            parked: None,
        }
    }
}

impl Future for RecvFuture<'_> {
    type Output = Result<u32, BusError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.bus.try_recv(this.channel) {
            Err(BusError::WouldBlock) => {
                this.parked = Some(park(this.bus, this.channel, Side::Recv, this.parked, cx.waker()));
                Poll::Pending
            }
            done => {
                unpark(this.bus, this.channel, Side::Recv, this.parked.take());
                Poll::Ready(done)
            }
        }
    }
}

impl Drop for RecvFuture<'_> {
    fn drop(&mut self) {
        unpark(self.bus, self.channel, Side::Recv, self.parked.take());
    }
}

/// Future of [`Bus::broadcast`]. Resolves once the value has been appended to
/// every open channel.
///
/// While some open channel is full, the operation parks on that channel's
/// send queue; every wake-up retries the broadcast from the top, so a channel
/// that filled up in the meantime is waited on in turn.
#[must_use = "futures do nothing unless polled"]
pub struct BroadcastFuture<'a> {
    bus: &'a Bus,
    value: u32,
    /// Channel whose send queue we are parked on, if any.
    parked: Option<(Handle, WaitToken)>,
}

impl<'a> BroadcastFuture<'a> {
    pub(super) fn new(bus: &'a Bus, value: u32) -> Self {
        Self {
            bus,
            value,
            parked: None,
        }
    }
}

impl Future for BroadcastFuture<'_> {
    type Output = Result<(), BusError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.bus.try_broadcast(this.value) {
            Err(BusError::WouldBlock) => {
                let target = this
                    .bus
                    .first_full_open()
                    .expect("broadcast would block without a full channel");
                let refreshed = match this.parked.take() {
                    Some((h, token)) if h == target => {
                        let ch = this.bus.channel(h).expect("full channel vanished");
                        ch.send_waiters.resume(token, cx.waker()).then_some((h, token))
                    }
                    Some((h, token)) => {
                        // the blocker moved: unlink from the old queue first
                        unpark(this.bus, h, Side::Send, Some(token));
                        None
                    }
                    None => None,
                };
                this.parked = refreshed.or_else(|| {
                    Some((target, park(this.bus, target, Side::Send, None, cx.waker())))
                });
                Poll::Pending
            }
            done => {
                if let Some((h, token)) = this.parked.take() {
                    unpark(this.bus, h, Side::Send, Some(token));
                }
                Poll::Ready(done)
            }
        }
    }
}

impl Drop for BroadcastFuture<'_> {
    fn drop(&mut self) {
        if let Some((h, token)) = self.parked.take() {
            unpark(self.bus, h, Side::Send, Some(token));
        }
    }
}

/// Future of [`Bus::send_slice`]. Resolves with the number of items sent, as
/// soon as at least one fits; the request is never split across suspensions.
#[must_use = "futures do nothing unless polled"]
pub struct SendSliceFuture<'a> {
    bus: &'a Bus,
    channel: Handle,
    values: &'a [u32],
    parked: Option<WaitToken>,
}

impl<'a> SendSliceFuture<'a> {
    pub(super) fn new(bus: &'a Bus, channel: Handle, values: &'a [u32]) -> Self {
        Self {
            bus,
            channel,
            values,
            parked: None,
        }
    }
}

impl Future for SendSliceFuture<'_> {
    type Output = Result<usize, BusError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.bus.try_send_slice(this.channel, this.values) {
            Err(BusError::WouldBlock) => {
                this.parked = Some(park(this.bus, this.channel, Side::Send, this.parked, cx.waker()));
                Poll::Pending
            }
            done => {
                unpark(this.bus, this.channel, Side::Send, this.parked.take());
                Poll::Ready(done)
            }
        }
    }
}

impl Drop for SendSliceFuture<'_> {
    fn drop(&mut self) {
        unpark(self.bus, self.channel, Side::Send, self.parked.take());
    }
}

/// Future of [`Bus::recv_slice`]. Resolves with the number of items moved
/// into the output buffer, as soon as at least one is available.
#[must_use = "futures do nothing unless polled"]
pub struct RecvSliceFuture<'a> {
    bus: &'a Bus,
    channel: Handle,
    out: &'a mut [u32],
    parked: Option<WaitToken>,
}

impl<'a> RecvSliceFuture<'a> {
    pub(super) fn new(bus: &'a Bus, channel: Handle, out: &'a mut [u32]) -> Self {
        Self {
            bus,
            channel,
            out,
            parked: None,
        }
    }
}

impl Future for RecvSliceFuture<'_> {
    type Output = Result<usize, BusError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.bus.try_recv_slice(this.channel, this.out) {
            Err(BusError::WouldBlock) => {
                this.parked = Some(park(this.bus, this.channel, Side::Recv, this.parked, cx.waker()));
                Poll::Pending
            }
            done => {
                unpark(this.bus, this.channel, Side::Recv, this.parked.take());
                Poll::Ready(done)
            }
        }
    }
}

impl Drop for RecvSliceFuture<'_> {
    fn drop(&mut self) {
        unpark(self.bus, self.channel, Side::Recv, self.parked.take());
    }
}
