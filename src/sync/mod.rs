// src/sync/mod.rs
//! Low-level synchronization primitives used by the scheduler.

pub(crate) mod semaphore;

pub use semaphore::Semaphore;
