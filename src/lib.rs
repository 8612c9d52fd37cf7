// src/lib.rs
//! # Work-Stealing Task Scheduler
//!
//! A fixed-capacity, lock-free task scheduler for game-engine style
//! workloads, built around pre-reserved pools and cooperative stealing.
//!
//! Features:
//! - Bounded MPMC slot queues and Chase–Lev work-stealing deques, all
//!   fixed capacity and allocation-free after construction
//! - Parent/child task relationships and permit-based dependencies
//!   resolved entirely with atomics
//! - A storage-wide steal bus that sleeps idle workers on a
//!   userspace-fast semaphore
//! - Pool acquisition bound to OS threads, with validation and
//!   deterministic memory sizing up front
//! - A buddy allocator with split/status bit indices for carving
//!   power-of-two state memory
//!
//! # Example
//!
//! ```rust
//! use taskweave::prelude::*;
//!
//! fn body(_id: TaskId, _args: &mut [u8]) {}
//!
//! let types = [PoolTypeConfig::main_thread(), PoolTypeConfig::worker(2)];
//! let storage = PoolStorage::new(&types)?;
//!
//! let pool = storage.acquire(POOL_TYPE_MAIN)?;
//! let task = pool.define(TaskInit::new(body))?;
//! pool.launch(task);
//! pool.run_until_idle();
//! # Ok::<(), taskweave::TaskError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_safety_doc)]

pub mod buddy;
pub mod cpu;
pub mod error;
pub mod profiler;
pub mod queue;
pub mod sync;
pub mod task;

// Re-export main types
pub use buddy::{BuddyAllocator, BuddyBlock, BuddyConfig};
pub use cpu::CpuInfo;
pub use error::{Result, TaskError};
pub use profiler::Profiler;
pub use queue::{IndexQueue, SignalQueue, Steal, WorkStealQueue};
pub use sync::Semaphore;
pub use task::{
    POOL_TYPE_MAIN, POOL_TYPE_USER, POOL_TYPE_WORKER, PoolHandle, PoolStorage, PoolTypeConfig,
    TaskId, TaskInit, TaskKind, ValidationCode, validate_config,
};

/// Commonly used imports.
pub mod prelude {
    pub use crate::buddy::{BuddyAllocator, BuddyBlock, BuddyConfig};
    pub use crate::cpu::CpuInfo;
    pub use crate::error::{Result, TaskError};
    pub use crate::profiler::Profiler;
    pub use crate::queue::Steal;
    pub use crate::task::{
        POOL_TYPE_MAIN, POOL_TYPE_USER, POOL_TYPE_WORKER, PoolHandle, PoolStorage, PoolTypeConfig,
        TaskId, TaskInit, TaskKind, ValidationCode, validate_config,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    fn noop(_: TaskId, _: &mut [u8]) {}

    #[test]
    fn test_basic_scheduling() {
        let storage = PoolStorage::new(&[PoolTypeConfig::worker(1)]).unwrap();
        let pool = storage.acquire(POOL_TYPE_WORKER).unwrap();

        let task = pool.define(TaskInit::new(noop)).unwrap();
        pool.launch(task);
        assert_eq!(pool.run_until_idle(), 1);
        assert_eq!(pool.pool().free_slots(), pool.pool().capacity());
    }

    #[test]
    fn test_validation_via_prelude() {
        let (per_type, global) = validate_config(&[PoolTypeConfig::worker(2)]);
        assert_eq!(global, ValidationCode::Success);
        assert_eq!(per_type, vec![ValidationCode::Success]);
    }

    #[test]
    fn test_buddy_roundtrip() {
        let mut alloc = BuddyAllocator::new(BuddyConfig {
            memory_size: 1 << 20,
            min_block: 1 << 10,
            max_block: 1 << 20,
            bytes_reserved: 0,
        })
        .unwrap();
        let block = alloc.allocate(4096, 64).unwrap();
        assert_eq!(block.size, 4096);
        alloc.free(block);
    }

    #[test]
    fn test_cpu_query() {
        let info = CpuInfo::query().unwrap();
        assert!(info.hardware_threads >= 1);
    }
}
