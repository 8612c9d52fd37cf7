// src/task/storage.rs
//! Process-wide pool storage: construction, sizing, acquisition, and the
//! steal bus that coordinates idle workers.
//!
//! All pools are created up front from a validated pool-type table and
//! live for the storage's whole lifetime.  Threads never own pools; they
//! borrow one from the per-type free list and return it by dropping the
//! [`PoolHandle`].  Pools are addressed by index everywhere — a task id
//! encodes its pool's index, so no record needs a pointer back to its
//! container.

use std::mem::size_of;
use std::sync::Mutex;

use log::trace;

use crate::error::{Result, TaskError};
use crate::queue::{SignalQueue, Steal};
use crate::task::config::{PoolTypeConfig, first_failure, validate_config};
use crate::task::id::TaskId;
use crate::task::pool::{PoolHandle, TaskPool};
use crate::task::slot::TaskSlot;

/// Capacity of the steal bus, independent of any pool's capacity.
pub const STEAL_BUS_CAPACITY: u32 = 65536;

/// Pool-index payload that wakes a worker without giving it a steal target.
const WAKE_SENTINEL: u32 = u32::MAX;

/// Owning container of every task pool in the scheduler.
///
/// # Example
///
/// ```rust
/// use taskweave::task::{PoolStorage, PoolTypeConfig, POOL_TYPE_MAIN, POOL_TYPE_WORKER};
///
/// let types = [PoolTypeConfig::main_thread(), PoolTypeConfig::worker(2)];
/// let storage = PoolStorage::new(&types).unwrap();
///
/// let main = storage.acquire(POOL_TYPE_MAIN).unwrap();
/// let worker = storage.acquire(POOL_TYPE_WORKER).unwrap();
/// assert_ne!(main.pool().pool_index(), worker.pool().pool_index());
/// ```
pub struct PoolStorage {
    /// Every pool, ordered by type then per-type index.
    pools: Box<[TaskPool]>,
    /// Configured type ids, in table order.
    type_ids: Box<[u32]>,
    /// Per-type stacks of unbound pool indices.
    free_lists: Box<[Mutex<Vec<u32>>]>,
    steal_bus: SignalQueue,
}

impl PoolStorage {
    /// Validates `types`, returning the per-type and global result codes.
    ///
    /// Forwarded from [`validate_config`](crate::task::validate_config) for
    /// callers that want the full code table rather than the first failure.
    pub fn validate(
        types: &[PoolTypeConfig],
    ) -> (Vec<crate::task::ValidationCode>, crate::task::ValidationCode) {
        validate_config(types)
    }

    /// Bytes of backing state a storage built from `types` will hold.
    ///
    /// Deterministic in the configuration: the pool array, each pool's
    /// slot records and queue cells, the per-type bookkeeping, and the
    /// steal bus.
    pub fn required_size(types: &[PoolTypeConfig]) -> usize {
        // MPMC cell: sequence + value.
        const MPMC_CELL: usize = 2 * size_of::<u32>();

        let mut total = size_of::<PoolStorage>();
        total += STEAL_BUS_CAPACITY as usize * MPMC_CELL;
        for config in types {
            let capacity = config.max_active_tasks as usize;
            let per_pool = size_of::<TaskPool>()
                + capacity * size_of::<TaskSlot>()
                + 2 * capacity * MPMC_CELL          // free queue + inbox
                + capacity * size_of::<u32>();      // ready deque cells
            total += config.pool_count as usize * per_pool;
            // Type id, free-list head, free-list entries.
            total += size_of::<u32>()
                + size_of::<Mutex<Vec<u32>>>()
                + config.pool_count as usize * size_of::<u32>();
        }
        total
    }

    /// Builds a storage from a validated pool-type table.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidConfig`] carrying the first failing validation
    /// code.
    pub fn new(types: &[PoolTypeConfig]) -> Result<Self> {
        let (per_type, global) = validate_config(types);
        if let Some(code) = first_failure(&per_type, global) {
            return Err(TaskError::InvalidConfig(code));
        }

        let total_pools: u32 = types.iter().map(|t| t.pool_count).sum();
        let mut pools = Vec::with_capacity(total_pools as usize);
        let mut type_ids = Vec::with_capacity(types.len());
        let mut free_lists = Vec::with_capacity(types.len());

        let mut pool_index = 0;
        for config in types {
            type_ids.push(config.type_id);
            let mut free: Vec<u32> = Vec::with_capacity(config.pool_count as usize);
            for _ in 0..config.pool_count {
                pools.push(TaskPool::new(
                    pool_index,
                    config.type_id,
                    config.max_active_tasks,
                    config.steal_threshold,
                ));
                free.push(pool_index);
                pool_index += 1;
            }
            free_lists.push(Mutex::new(free));
        }

        trace!(
            "pool storage created: {} pools across {} types, {} bytes",
            total_pools,
            types.len(),
            Self::required_size(types)
        );
        Ok(Self {
            pools: pools.into_boxed_slice(),
            type_ids: type_ids.into_boxed_slice(),
            free_lists: free_lists.into_boxed_slice(),
            steal_bus: SignalQueue::new(STEAL_BUS_CAPACITY),
        })
    }

    /// Builds a storage only if its state fits within `budget` bytes.
    ///
    /// # Errors
    ///
    /// [`TaskError::InsufficientMemory`] when the configuration needs more
    /// than `budget`; [`TaskError::InvalidConfig`] as for [`new`](Self::new).
    pub fn with_budget(types: &[PoolTypeConfig], budget: usize) -> Result<Self> {
        let required = Self::required_size(types);
        if required > budget {
            return Err(TaskError::InsufficientMemory {
                required,
                available: budget,
            });
        }
        Self::new(types)
    }

    /// Total number of pools across all types.
    #[inline]
    pub fn pool_count(&self) -> u32 {
        self.pools.len() as u32
    }

    /// Number of unbound pools of the given type.
    pub fn free_pool_count(&self, type_id: u32) -> u32 {
        match self.type_index(type_id) {
            Some(index) => self.free_lists[index].lock().unwrap().len() as u32,
            None => 0,
        }
    }

    /// Binds an unbound pool of the given type to the calling thread.
    ///
    /// # Errors
    ///
    /// - [`TaskError::UnknownPoolType`] if `type_id` is not configured.
    /// - [`TaskError::NoPoolAvailable`] if every pool of the type is bound.
    pub fn acquire(&self, type_id: u32) -> Result<PoolHandle<'_>> {
        let type_index = self
            .type_index(type_id)
            .ok_or(TaskError::UnknownPoolType(type_id))?;
        let pool_index = self.free_lists[type_index]
            .lock()
            .unwrap()
            .pop()
            .ok_or(TaskError::NoPoolAvailable)?;
        Ok(PoolHandle::bind(self, &self.pools[pool_index as usize]))
    }

    /// Returns a released pool to its type's free list.
    ///
    /// The pool must be empty (no live tasks); this is a precondition, not
    /// enforced.
    pub(crate) fn release(&self, pool_index: u32) {
        let type_id = self.pools[pool_index as usize].type_id();
        let type_index = self
            .type_index(type_id)
            .expect("released pool has a configured type");
        self.free_lists[type_index].lock().unwrap().push(pool_index);
    }

    /// Blocks until some pool advertises stealable work.
    ///
    /// Returns `None` when the wakeup was a shutdown signal (see
    /// [`wake_workers`](Self::wake_workers)); worker loops exit on it.
    pub fn next_steal_target(&self) -> Option<u32> {
        match self.steal_bus.take() {
            Some(WAKE_SENTINEL) | None => None,
            Some(pool_index) => Some(pool_index),
        }
    }

    /// Steals a ready task from the pool at `pool_index`.
    ///
    /// Falls back to the pool's inbox when the deque is empty so that a
    /// cross-pool ready cannot be stranded behind a sleeping owner.
    pub fn steal_from(&self, pool_index: u32) -> Steal {
        let pool = self.pool(pool_index);
        match pool.ready.steal() {
            Steal::Taken(id, more) => {
                pool.note_ready_pop();
                Steal::Taken(id, more)
            }
            Steal::Empty => match pool.inbox.take() {
                Some(bits) => {
                    pool.note_ready_pop();
                    Steal::Taken(TaskId::from_bits(bits), false)
                }
                None => Steal::Empty,
            },
            Steal::Retry => Steal::Retry,
        }
    }

    /// Posts `count` shutdown wakeups to the steal bus.
    ///
    /// Each blocked worker consumes one and exits its run loop.
    pub fn wake_workers(&self, count: u32) {
        for _ in 0..count {
            self.steal_bus.push(WAKE_SENTINEL);
        }
    }

    /// Outstanding-work count of `id` (observability for tests and tools).
    pub fn work_count(&self, id: TaskId) -> i32 {
        self.slot(id).work_count()
    }

    /// Wait count of `id` (observability for tests and tools).
    pub fn wait_count(&self, id: TaskId) -> i32 {
        self.slot(id).wait_count()
    }

    /// Permit count of `id`: -1 once the task completed.
    pub fn permit_count(&self, id: TaskId) -> i32 {
        self.slot(id).permit_count()
    }

    #[inline]
    pub(crate) fn steal_bus(&self) -> &SignalQueue {
        &self.steal_bus
    }

    #[inline]
    pub(crate) fn pool(&self, pool_index: u32) -> &TaskPool {
        &self.pools[pool_index as usize]
    }

    #[inline]
    pub(crate) fn slot(&self, id: TaskId) -> &TaskSlot {
        debug_assert!(id.is_valid());
        self.pool(id.pool_index()).slot(id.slot_index())
    }

    fn type_index(&self, type_id: u32) -> Option<usize> {
        self.type_ids.iter().position(|&id| id == type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::config::{POOL_TYPE_MAIN, POOL_TYPE_WORKER, PoolTypeConfig};
    use crate::task::{TaskInit, ValidationCode};

    fn noop(_: TaskId, _: &mut [u8]) {}

    #[test]
    fn test_invalid_config_rejected() {
        let result = PoolStorage::new(&[PoolTypeConfig::main_thread()]);
        assert_eq!(
            result.err(),
            Some(TaskError::InvalidConfig(ValidationCode::NoWorkerId))
        );
    }

    #[test]
    fn test_required_size_is_deterministic_and_monotonic() {
        let small = [PoolTypeConfig::worker(1)];
        let large = [PoolTypeConfig::worker(8)];
        assert_eq!(
            PoolStorage::required_size(&small),
            PoolStorage::required_size(&small)
        );
        assert!(PoolStorage::required_size(&large) > PoolStorage::required_size(&small));
    }

    #[test]
    fn test_with_budget_enforces_sizing() {
        let types = [PoolTypeConfig::worker(2)];
        let required = PoolStorage::required_size(&types);
        assert!(PoolStorage::with_budget(&types, required).is_ok());
        match PoolStorage::with_budget(&types, required - 1) {
            Err(TaskError::InsufficientMemory {
                required: r,
                available,
            }) => {
                assert_eq!(r, required);
                assert_eq!(available, required - 1);
            }
            other => panic!("expected InsufficientMemory, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_acquire_release_preserves_free_lists() {
        let types = [PoolTypeConfig::main_thread(), PoolTypeConfig::worker(3)];
        let storage = PoolStorage::new(&types).unwrap();
        assert_eq!(storage.free_pool_count(POOL_TYPE_MAIN), 1);
        assert_eq!(storage.free_pool_count(POOL_TYPE_WORKER), 3);

        {
            let _a = storage.acquire(POOL_TYPE_WORKER).unwrap();
            let _b = storage.acquire(POOL_TYPE_WORKER).unwrap();
            assert_eq!(storage.free_pool_count(POOL_TYPE_WORKER), 1);
        }
        // Handles dropped: every pool back on its free list.
        assert_eq!(storage.free_pool_count(POOL_TYPE_WORKER), 3);
        assert_eq!(storage.free_pool_count(POOL_TYPE_MAIN), 1);
    }

    #[test]
    fn test_acquire_exhaustion() {
        let storage = PoolStorage::new(&[PoolTypeConfig::worker(1)]).unwrap();
        let held = storage.acquire(POOL_TYPE_WORKER).unwrap();
        assert!(matches!(
            storage.acquire(POOL_TYPE_WORKER).err(),
            Some(TaskError::NoPoolAvailable)
        ));
        drop(held);
        assert!(storage.acquire(POOL_TYPE_WORKER).is_ok());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let storage = PoolStorage::new(&[PoolTypeConfig::worker(1)]).unwrap();
        assert!(matches!(
            storage.acquire(77).err(),
            Some(TaskError::UnknownPoolType(77))
        ));
    }

    #[test]
    fn test_reacquired_pool_starts_empty() {
        let storage = PoolStorage::new(&[PoolTypeConfig::worker(1)]).unwrap();
        {
            let pool = storage.acquire(POOL_TYPE_WORKER).unwrap();
            let id = pool.define(TaskInit::new(noop)).unwrap();
            pool.launch(id);
            let (claimed, _) = pool.take().unwrap();
            pool.execute(claimed);
        }
        let pool = storage.acquire(POOL_TYPE_WORKER).unwrap();
        assert_eq!(pool.pool().free_slots(), pool.pool().capacity());
        assert!(pool.take().is_none());
    }

    #[test]
    fn test_steal_from_reaches_inbox() {
        // A cross-pool ready parks in the target pool's inbox; a thief
        // must find it even though the deque is empty.
        let storage = PoolStorage::new(&[PoolTypeConfig::worker(2)]).unwrap();
        let pool = storage.acquire(POOL_TYPE_WORKER).unwrap();
        let id = pool.define(TaskInit::new(noop)).unwrap();
        let target = pool.pool();
        let (claimed, _) = pool.take().unwrap();
        assert_eq!(claimed, id);
        target.inbox.push(id.to_bits());
        target.note_ready_push(&storage);

        match storage.steal_from(target.pool_index()) {
            Steal::Taken(stolen, false) => assert_eq!(stolen, id),
            other => panic!("expected inbox steal, got {:?}", other),
        }
        pool.execute(id);
        pool.launch(id);
    }
}
