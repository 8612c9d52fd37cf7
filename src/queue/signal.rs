// src/queue/signal.rs
//! Blocking MPMC queue: the [`IndexQueue`] ring with an attached semaphore.
//!
//! The scheduler's steal bus is a `SignalQueue`.  Pools that accumulate
//! work past their steal threshold push their pool index here; idle worker
//! threads sleep on the semaphore and are handed a pool index to steal
//! from when one arrives.  Aside from the sleep/wake behavior the queue is
//! identical to the plain ring.

use crate::queue::IndexQueue;
use crate::sync::Semaphore;

/// Spin attempts a consumer makes before sleeping on the semaphore.
const TAKE_SPIN_COUNT: u32 = 4096;

/// Bounded MPMC queue whose consumers block while the queue is empty.
///
/// # Example
///
/// ```rust
/// use taskweave::queue::SignalQueue;
///
/// let bus = SignalQueue::new(8);
/// bus.push(3);
/// assert_eq!(bus.take(), Some(3));
/// ```
pub struct SignalQueue {
    queue: IndexQueue,
    sem: Semaphore,
}

impl SignalQueue {
    /// Creates an empty signal queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is less than 2.
    pub fn new(capacity: u32) -> Self {
        Self {
            queue: IndexQueue::new(capacity),
            sem: Semaphore::new(0),
        }
    }

    /// Maximum number of values the queue can hold.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.queue.capacity()
    }

    /// Enqueues `value` and signals one sleeping consumer.
    ///
    /// Returns `false` if the queue is full (nothing is signaled).
    pub fn push(&self, value: u32) -> bool {
        if self.queue.push(value) {
            self.sem.post();
            true
        } else {
            false
        }
    }

    /// Dequeues the oldest value, sleeping while the queue is empty.
    ///
    /// Returns `None` only in the transient case where another consumer
    /// claimed the value between the wakeup and the dequeue; callers
    /// should treat that as "try again".
    pub fn take(&self) -> Option<u32> {
        self.sem.wait(TAKE_SPIN_COUNT);
        self.queue.take()
    }

    /// Attempts a dequeue without blocking.
    pub fn try_take(&self) -> Option<u32> {
        if self.sem.try_wait() {
            self.queue.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_then_take() {
        let bus = SignalQueue::new(16);
        assert!(bus.push(5));
        assert!(bus.push(9));
        assert_eq!(bus.take(), Some(5));
        assert_eq!(bus.take(), Some(9));
    }

    #[test]
    fn test_try_take_empty() {
        let bus = SignalQueue::new(4);
        assert_eq!(bus.try_take(), None);
    }

    #[test]
    fn test_take_blocks_until_push() {
        let bus = Arc::new(SignalQueue::new(8));
        let consumer = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.take())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        bus.push(42);
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_many_producers_one_sleeper_each() {
        let bus = Arc::new(SignalQueue::new(64));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || bus.take())
            })
            .collect();
        thread::sleep(std::time::Duration::from_millis(20));
        for i in 0..4 {
            bus.push(i);
        }
        let mut got: Vec<u32> = consumers
            .into_iter()
            .map(|c| c.join().unwrap().unwrap())
            .collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }
}
