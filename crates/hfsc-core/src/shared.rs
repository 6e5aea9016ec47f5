//! Thread-shared scheduler handle.
//!
//! All state of one scheduler sits behind a single mutex: packet arrivals,
//! transmit opportunities, watchdog expiry and administration from any
//! thread serialize on it.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::class::ClassId;
use crate::queue::{FifoQueue, LeafQueue};
use crate::scheduler::{Dequeue, Scheduler, Verdict, Watchdog};

pub struct SharedScheduler<Q: LeafQueue = FifoQueue> {
    inner: Arc<Mutex<Scheduler<Q>>>,
}

impl<Q: LeafQueue> Clone for SharedScheduler<Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Q: LeafQueue> SharedScheduler<Q> {
    pub fn new(scheduler: Scheduler<Q>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(scheduler)),
        }
    }

    pub fn enqueue(&self, target: Option<ClassId>, packet: Bytes, now: u64) -> Verdict {
        self.inner.lock().unwrap().enqueue(target, packet, now)
    }

    pub fn dequeue(&self, now: u64) -> Dequeue {
        self.inner.lock().unwrap().dequeue(now)
    }

    pub fn dequeue_or_arm(&self, now: u64, watchdog: &mut impl Watchdog) -> Dequeue {
        self.inner.lock().unwrap().dequeue_or_arm(now, watchdog)
    }

    /// Run `f` with exclusive access, e.g. for administration.
    pub fn with<R>(&self, f: impl FnOnce(&mut Scheduler<Q>) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }
}
