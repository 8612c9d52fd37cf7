// src/queue/deque.rs
//! Fixed-capacity Chase–Lev work-stealing deque of task identifiers.
//!
//! # Architecture
//!
//! One owner thread pushes and takes at the private (back) end in LIFO
//! order; any other thread may steal from the public (front) end in FIFO
//! order.  Both ends are 64-bit monotonic counters, so they never wrap in
//! any realistic process lifetime and never need resetting mid-flight.
//!
//! The deque does not check for overflow on push.  The scheduler guarantees
//! that at most `capacity` task ids are live per pool (the free queue hands
//! out at most `capacity` slots), so the ring can never wrap onto an
//! unconsumed entry.
//!
//! Cells are `AtomicU32` holding raw task-id bits; a stealer may read a cell
//! that a racing take is about to reclaim, but the CAS on the public end
//! decides a single winner before the id is acted upon.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering, fence};

use crate::task::TaskId;

/// Result of a [`WorkStealQueue::steal`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal {
    /// A task was claimed; the flag reports whether more items remain.
    Taken(TaskId, bool),
    /// Lost a race with another thief or the owner; the queue may still
    /// be non-empty, try again.
    Retry,
    /// The queue was observed empty.
    Empty,
}

/// Single-owner, multi-thief deque of ready-to-run task ids.
///
/// The owner thread calls [`push`](Self::push) and [`take`](Self::take);
/// any thread may call [`steal`](Self::steal).
pub struct WorkStealQueue {
    cells: Box<[AtomicU32]>,
    mask: i64,
    /// Front end, advanced by steals (and by a take claiming the final item).
    public_pos: CachePadded<AtomicI64>,
    /// Back end, advanced by the owner's pushes and takes.
    private_pos: CachePadded<AtomicI64>,
}

impl WorkStealQueue {
    /// Creates an empty deque.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is less than 2.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity >= 2, "deque capacity must be at least 2");
        assert!(
            capacity.is_power_of_two(),
            "deque capacity must be a power of two"
        );
        let cells: Box<[AtomicU32]> = (0..capacity)
            .map(|_| AtomicU32::new(TaskId::INVALID.to_bits()))
            .collect();
        Self {
            cells,
            mask: i64::from(capacity) - 1,
            public_pos: CachePadded::new(AtomicI64::new(0)),
            private_pos: CachePadded::new(AtomicI64::new(0)),
        }
    }

    /// Maximum number of task ids the deque can hold.
    #[inline]
    pub fn capacity(&self) -> u32 {
        (self.mask + 1) as u32
    }

    /// Approximate number of queued task ids.
    #[inline]
    pub fn len(&self) -> u32 {
        let private = self.private_pos.load(Ordering::Relaxed);
        let public = self.public_pos.load(Ordering::Relaxed);
        (private - public).max(0) as u32
    }

    /// Returns `true` if the deque is observed empty (approximate).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes a task id onto the back of the deque.  Owner thread only.
    ///
    /// Never fails: the pool's free-queue capacity guarantees the ring
    /// cannot wrap onto a live entry.
    pub fn push(&self, id: TaskId) {
        let pos = self.private_pos.load(Ordering::Relaxed);
        self.cells[(pos & self.mask) as usize].store(id.to_bits(), Ordering::Relaxed);
        // Publish the cell write to stealers that acquire private_pos.
        self.private_pos.store(pos + 1, Ordering::Release);
    }

    /// Takes the most recently pushed task id (LIFO).  Owner thread only.
    ///
    /// On success the flag reports whether at least one more item remains.
    /// Returns `None` if the deque is empty or a concurrent steal claimed
    /// the final item.
    pub fn take(&self) -> Option<(TaskId, bool)> {
        let pos = self.private_pos.load(Ordering::Relaxed) - 1;
        // Speculatively reserve the back entry, then look at the front.
        // The fence orders the reservation before the public_pos load so a
        // concurrent steal either sees the reservation or loses the CAS.
        self.private_pos.store(pos, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let top = self.public_pos.load(Ordering::Relaxed);

        if top <= pos {
            let id = TaskId::from_bits(self.cells[(pos & self.mask) as usize].load(Ordering::Relaxed));
            if top != pos {
                // At least one more item separates us from the thieves.
                return Some((id, true));
            }
            // Final item: race any concurrent steal for it.
            let won = self
                .public_pos
                .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.private_pos.store(top + 1, Ordering::Relaxed);
            if won { Some((id, false)) } else { None }
        } else {
            // Empty; restore the canonical empty state.
            self.private_pos.store(top, Ordering::Relaxed);
            None
        }
    }

    /// Steals the oldest task id (FIFO).  Callable from any thread.
    pub fn steal(&self) -> Steal {
        let top = self.public_pos.load(Ordering::Acquire);
        // Pairs with the fence in `take`: a steal either observes the
        // owner's speculative reservation or loses the CAS below.
        fence(Ordering::SeqCst);
        let pos = self.private_pos.load(Ordering::Acquire);
        if top < pos {
            let id = TaskId::from_bits(self.cells[(top & self.mask) as usize].load(Ordering::Relaxed));
            match self
                .public_pos
                .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => Steal::Taken(id, top + 1 < pos),
                Err(_) => Steal::Retry,
            }
        } else {
            Steal::Empty
        }
    }

    /// Restores the just-constructed empty state.
    ///
    /// Only valid while no other thread is accessing the deque; used when a
    /// pool is rebound to a new owner thread.
    pub fn reset(&self) {
        self.public_pos.store(0, Ordering::SeqCst);
        self.private_pos.store(0, Ordering::SeqCst);
    }
}
