// src/queue/mpmc.rs
//! Bounded multi-producer, multi-consumer ring of `u32` payloads.
//!
//! # Architecture
//!
//! This is the classic Vyukov bounded MPMC queue: each cell carries a
//! sequence number that encodes whether the cell is ready for the next
//! push or the next take.  Producers and consumers claim cells by CAS on
//! cache-line-isolated cursors and publish with a release store of the
//! cell sequence.  Push and take are wait-free on the uncontended path
//! and never block.
//!
//! The scheduler uses this ring in three roles:
//! - the per-pool **free queue** of available task-slot indices
//!   (constructed pre-filled with `0..capacity`),
//! - the per-pool **inbox** of task ids readied by other threads,
//! - the storage-wide **steal bus** payload ring (see
//!   [`SignalQueue`](crate::queue::SignalQueue)).

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, Ordering};

struct Cell {
    sequence: AtomicU32,
    value: AtomicU32,
}

/// Fixed-capacity lock-free MPMC queue of small integer values.
///
/// The capacity must be a power of two of at least 2.
///
/// # Example
///
/// ```rust
/// use taskweave::queue::IndexQueue;
///
/// let queue = IndexQueue::new(8);
/// assert!(queue.push(7));
/// assert_eq!(queue.take(), Some(7));
/// assert_eq!(queue.take(), None);
/// ```
pub struct IndexQueue {
    cells: Box<[Cell]>,
    mask: u32,
    enqueue_pos: CachePadded<AtomicU32>,
    dequeue_pos: CachePadded<AtomicU32>,
}

impl IndexQueue {
    /// Creates an empty queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is less than 2.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity >= 2, "queue capacity must be at least 2");
        assert!(
            capacity.is_power_of_two(),
            "queue capacity must be a power of two"
        );
        let cells: Box<[Cell]> = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicU32::new(i),
                value: AtomicU32::new(0),
            })
            .collect();
        Self {
            cells,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicU32::new(0)),
            dequeue_pos: CachePadded::new(AtomicU32::new(0)),
        }
    }

    /// Creates a queue pre-filled with the values `0..capacity`.
    ///
    /// This is the initial state of a pool's free queue: every slot index
    /// is immediately available for a take.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is less than 2.
    pub fn with_slots(capacity: u32) -> Self {
        let queue = Self::new(capacity);
        queue.reset_filled();
        queue
    }

    /// Maximum number of values the queue can hold.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.mask + 1
    }

    /// Approximate number of values currently queued.
    ///
    /// Exact only while no push or take is in flight.
    #[inline]
    pub fn len(&self) -> u32 {
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        let head = self.dequeue_pos.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }

    /// Returns `true` if no values are queued (approximate, see [`len`](Self::len)).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues `value` at the back of the queue.
    ///
    /// Returns `false` if the queue is full.
    pub fn push(&self, value: u32) -> bool {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[(pos & self.mask) as usize];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as i32;
            if diff == 0 {
                // The cell is ready for this position; claim it.
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        cell.value.store(value, Ordering::Relaxed);
                        cell.sequence
                            .store(pos.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                // The cell still holds an unconsumed value from the previous lap.
                return false;
            } else {
                // Another producer claimed this position.
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeues the oldest value from the front of the queue.
    ///
    /// Returns `None` if the queue is empty.
    pub fn take(&self) -> Option<u32> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[(pos & self.mask) as usize];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as i32;
            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = cell.value.load(Ordering::Relaxed);
                        // Mark the cell ready for the producer's next lap.
                        cell.sequence.store(
                            pos.wrapping_add(self.mask).wrapping_add(1),
                            Ordering::Release,
                        );
                        return Some(value);
                    }
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Restores the just-constructed empty state.
    ///
    /// Only valid while no other thread is accessing the queue; used when a
    /// pool is rebound to a new owner thread.
    pub fn reset_empty(&self) {
        for (i, cell) in self.cells.iter().enumerate() {
            cell.sequence.store(i as u32, Ordering::Relaxed);
            cell.value.store(0, Ordering::Relaxed);
        }
        self.enqueue_pos.store(0, Ordering::SeqCst);
        self.dequeue_pos.store(0, Ordering::SeqCst);
    }

    /// Restores the pre-filled state holding the values `0..capacity`.
    ///
    /// Only valid while no other thread is accessing the queue.
    pub fn reset_filled(&self) {
        for (i, cell) in self.cells.iter().enumerate() {
            // The state after `capacity` pushes: cell i holds value i and
            // is ready for the consumer at position i.
            cell.sequence.store(i as u32 + 1, Ordering::Relaxed);
            cell.value.store(i as u32, Ordering::Relaxed);
        }
        self.enqueue_pos.store(self.capacity(), Ordering::SeqCst);
        self.dequeue_pos.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_exact_fill_and_drain() {
        let queue = IndexQueue::new(8);
        for i in 0..8 {
            assert!(queue.push(i), "push {} should fit", i);
        }
        assert!(!queue.push(99), "9th push must fail");
        assert_eq!(queue.take(), Some(0));
        assert!(queue.push(8), "push after one take must succeed");
        for expected in 1..9 {
            assert_eq!(queue.take(), Some(expected));
        }
        assert_eq!(queue.take(), None, "9th take must fail");
    }

    #[test]
    fn test_fifo_order() {
        let queue = IndexQueue::new(16);
        for i in 0..10 {
            queue.push(i * 3);
        }
        for i in 0..10 {
            assert_eq!(queue.take(), Some(i * 3));
        }
    }

    #[test]
    fn test_with_slots_yields_all_indices() {
        let queue = IndexQueue::with_slots(16);
        assert_eq!(queue.len(), 16);
        let mut seen = [false; 16];
        while let Some(index) = queue.take() {
            seen[index as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_reset_filled_after_churn() {
        let queue = IndexQueue::with_slots(4);
        queue.take();
        queue.take();
        queue.push(9);
        queue.reset_filled();
        assert_eq!(queue.len(), 4);
        let drained: Vec<u32> = std::iter::from_fn(|| queue.take()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_concurrent_producers_consumers() {
        let queue = Arc::new(IndexQueue::new(1024));
        let produced = 4 * 5000u64;
        let consumed = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let producers: Vec<_> = (0..4u32)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..5000u32 {
                        while !queue.push(t * 5000 + i) {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let consumed = Arc::clone(&consumed);
                thread::spawn(move || {
                    let mut sum = 0u64;
                    loop {
                        match queue.take() {
                            Some(v) => {
                                sum += u64::from(v);
                                consumed.fetch_add(1, Ordering::Relaxed);
                            }
                            None => {
                                if consumed.load(Ordering::Relaxed) >= produced {
                                    break;
                                }
                                thread::yield_now();
                            }
                        }
                    }
                    sum
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        let total: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        // Every pushed value consumed exactly once.
        let expected: u64 = (0..20000u64).sum();
        assert_eq!(total, expected);
    }
}
