// src/queue/mod.rs
//! Bounded lock-free queues: the MPMC slot ring, the semaphore-backed
//! signal queue, and the single-owner work-stealing deque.

pub(crate) mod deque;
pub(crate) mod mpmc;
pub(crate) mod signal;

pub use deque::{Steal, WorkStealQueue};
pub use mpmc::IndexQueue;
pub use signal::SignalQueue;
