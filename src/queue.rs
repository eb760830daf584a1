// serialcan/src/queue.rs
//
// Implements the bounded reception queue of a CAN channel.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The reception queue.
//!
//! A bounded FIFO decoupling the transport reader loop from caller-driven
//! reads. Frames keep their wire order. When the queue is full, the
//! incoming frame is dropped and counted — never silently, and never by
//! overwriting queued frames.
//!
//! [`MessageQueue::pop`] blocks the calling thread, not the reader loop:
//! a zero timeout polls, `None` blocks until a frame arrives, anything
//! else waits up to that duration. [`MessageQueue::kill`] wakes every
//! blocked `pop` with a cancellation error; it is idempotent, safe to
//! call from any thread, and leaves the queue usable afterwards.

use crate::{frame::CanFrame, Error, Result};
use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

#[derive(Debug)]
struct Inner {
    queue: VecDeque<CanFrame>,
    lost: u64,
    kill_generation: u64,
}

/// Bounded FIFO of received frames, shared between the reader loop and
/// caller threads.
#[derive(Debug)]
pub struct MessageQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl MessageQueue {
    /// Creates a queue holding up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                lost: 0,
                kill_generation: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueues a received frame.
    ///
    /// Returns `false` when the queue is full; the frame is dropped and
    /// counted, the queued frames stay untouched.
    pub fn push(&self, frame: CanFrame) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.len() >= self.capacity {
            inner.lost += 1;
            return false;
        }
        inner.queue.push_back(frame);
        drop(inner);
        self.cond.notify_one();
        true
    }

    /// Dequeues the oldest frame.
    ///
    /// - `Some(Duration::ZERO)` returns immediately, [`Error::ReceiverEmpty`]
    ///   if nothing is queued;
    /// - `Some(d)` waits up to `d`, then [`Error::ReceiverEmpty`];
    /// - `None` blocks until a frame arrives or the queue is killed,
    ///   which yields [`Error::Canceled`] instead.
    pub fn pop(&self, timeout: Option<Duration>) -> Result<CanFrame> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(frame) = inner.queue.pop_front() {
            return Ok(frame);
        }
        let deadline = match timeout {
            Some(d) if d.is_zero() => return Err(Error::ReceiverEmpty),
            Some(d) => Some(Instant::now() + d),
            None => None,
        };
        let generation = inner.kill_generation;
        loop {
            inner = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::ReceiverEmpty);
                    }
                    let (guard, _) = self.cond.wait_timeout(inner, deadline - now).unwrap();
                    guard
                }
                None => self.cond.wait(inner).unwrap(),
            };
            if inner.kill_generation != generation {
                return Err(Error::Canceled);
            }
            if let Some(frame) = inner.queue.pop_front() {
                return Ok(frame);
            }
        }
    }

    /// Wakes every thread blocked in [`Self::pop`] with a cancellation
    /// error. Frames already queued stay queued.
    pub fn kill(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.kill_generation += 1;
        drop(inner);
        self.cond.notify_all();
    }

    /// Removes all queued frames and resets the lost counter.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.lost = 0;
    }

    /// Whether the queue currently holds no frame.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().queue.is_empty()
    }

    /// The number of frames currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// The number of frames dropped since the last [`Self::clear`].
    pub fn lost(&self) -> u64 {
        self.inner.lock().unwrap().lost
    }
}
