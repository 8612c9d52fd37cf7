// src/sync/semaphore.rs
//! Userspace-fast counting semaphore.
//!
//! # Architecture
//!
//! The semaphore keeps a signed atomic counter in front of an OS blocking
//! layer (a mutex-protected permit count plus a condvar).  As long as the
//! counter stays positive, acquire and release never leave userspace:
//!
//! 1. **Spin phase** (~ns, lock-free CAS decrement while the count is positive)
//! 2. **Committed decrement** (`fetch_sub`; a negative result means the caller
//!    must sleep)
//! 3. **Kernel phase** (block on the condvar until a release hands over a permit)
//!
//! The counter value encodes both sides: a positive value is the number of
//! available resources, a negative value is the number of sleeping waiters.
//!
//! Cancellation and timeouts are not supported.  A waiter blocks until a
//! matching `post` arrives or the process exits.

use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Condvar, Mutex};

/// Counting semaphore that stays in userspace unless a thread must sleep.
///
/// # Example
///
/// ```rust
/// use taskweave::sync::Semaphore;
///
/// let sem = Semaphore::new(2);
/// assert!(sem.try_wait());
/// assert!(sem.try_wait());
/// assert!(!sem.try_wait());
/// sem.post();
/// assert!(sem.try_wait());
/// ```
pub struct Semaphore {
    /// Fast-path counter: available resources when positive, waiter count
    /// (negated) when negative.
    count: AtomicI32,
    /// Kernel-side permits handed from `post` to sleeping waiters.
    permits: Mutex<u32>,
    wakeup: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with `count` available resources.
    pub fn new(count: i32) -> Self {
        Self {
            count: AtomicI32::new(count),
            permits: Mutex::new(0),
            wakeup: Condvar::new(),
        }
    }

    /// Attempts to claim a resource without blocking.
    ///
    /// Succeeds only by a CAS decrement from a positive count, so it never
    /// pushes the counter negative and never interacts with the kernel layer.
    pub fn try_wait(&self) -> bool {
        let backoff = Backoff::new();
        let mut count = self.count.load(Ordering::Acquire);
        while count > 0 {
            match self.count.compare_exchange_weak(
                count,
                count - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => {
                    count = observed;
                    backoff.spin();
                }
            }
        }
        false
    }

    /// Claims a resource, blocking the calling thread if none is available.
    ///
    /// Spins up to `spin_count` lock-free attempts before committing to an
    /// atomic decrement; a negative post-decrement value puts the caller to
    /// sleep until a matching [`post`](Self::post).
    pub fn wait(&self, spin_count: u32) {
        for _ in 0..spin_count {
            if self.try_wait() {
                return;
            }
        }
        if self.count.fetch_sub(1, Ordering::AcqRel) < 1 {
            self.block();
        }
    }

    /// Releases one resource, waking one sleeping waiter if any.
    pub fn post(&self) {
        if self.count.fetch_add(1, Ordering::AcqRel) < 0 {
            self.release(1);
        }
    }

    /// Releases `n` resources at once, waking `min(waiters, n)` sleepers.
    pub fn post_many(&self, n: i32) {
        debug_assert!(n > 0);
        let previous = self.count.fetch_add(n, Ordering::AcqRel);
        if previous < 0 {
            let waiters = -previous;
            self.release(waiters.min(n) as u32);
        }
    }

    /// Current counter value: available resources when positive, sleeping
    /// waiters (negated) when negative.
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    /// Reinitializes the semaphore to `count` available resources.
    ///
    /// Only valid while no thread is waiting; used when a pool is rebound
    /// to a new owner thread.
    pub fn reset(&self, count: i32) {
        self.count.store(count, Ordering::SeqCst);
        *self.permits.lock().unwrap() = 0;
    }

    fn block(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.wakeup.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    fn release(&self, n: u32) {
        let mut permits = self.permits.lock().unwrap();
        *permits += n;
        if n == 1 {
            self.wakeup.notify_one();
        } else {
            self.wakeup.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_try_wait_counts_down() {
        let sem = Semaphore::new(3);
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_post_wakes_counter() {
        let sem = Semaphore::new(0);
        assert!(!sem.try_wait());
        sem.post();
        assert_eq!(sem.count(), 1);
        assert!(sem.try_wait());
    }

    #[test]
    fn test_wait_blocks_until_post() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                sem.wait(64);
                true
            })
        };
        // The waiter parks; a single post must release it.
        thread::sleep(std::time::Duration::from_millis(20));
        sem.post();
        assert!(waiter.join().unwrap());
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_post_many_wakes_all_waiters() {
        let sem = Arc::new(Semaphore::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sem = Arc::clone(&sem);
                thread::spawn(move || sem.wait(0))
            })
            .collect();
        thread::sleep(std::time::Duration::from_millis(20));
        sem.post_many(4);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_reset_restores_capacity() {
        let sem = Semaphore::new(2);
        assert!(sem.try_wait());
        sem.reset(2);
        assert_eq!(sem.count(), 2);
    }
}
