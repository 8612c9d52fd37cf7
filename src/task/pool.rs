// src/task/pool.rs
//! Task pools and the task lifecycle: define, launch, execute, complete.
//!
//! # Architecture
//!
//! A pool is bound to one owner thread at a time.  The owner defines tasks
//! into the pool and drains the pool's ready deque in LIFO order; other
//! threads steal from the deque in FIFO order after a notification on the
//! storage-wide steal bus.
//!
//! A pool is four fixed-capacity structures sharing one capacity:
//!
//! - the **free queue** (MPMC ring) of available slot indices,
//! - the **ready deque** (Chase–Lev) of runnable task ids,
//! - the **inbox** (MPMC ring) of task ids readied by threads that do not
//!   own this pool — the owner folds it into the deque, thieves may also
//!   take from it directly,
//! - the **slot array** of task records.
//!
//! Back-pressure: a semaphore counts free slots.  [`PoolHandle::define`]
//! blocks while the pool is full; [`PoolHandle::try_define`] fails fast.
//!
//! All lifecycle operations go through [`PoolHandle`], which carries the
//! storage reference needed to reach other pools' records (parents and
//! permittees may live anywhere).  The handle is deliberately `!Send`:
//! owner-only queue ends must stay on the thread that acquired the pool.

use std::marker::PhantomData;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::ThreadId;

use log::trace;

use crate::error::{Result, TaskError};
use crate::queue::{IndexQueue, WorkStealQueue};
use crate::sync::Semaphore;
use crate::task::id::{MAX_TASK_ARGS, TaskId, TaskKind};
use crate::task::slot::{PermitAdd, TaskSlot};
use crate::task::storage::PoolStorage;
use crate::task::TaskInit;

/// Spin attempts before a full pool puts the defining thread to sleep.
const DEFINE_SPIN_COUNT: u32 = 1024;

/// A fixed-capacity, owner-bound container of task records.
///
/// Pools are created by [`PoolStorage`](crate::task::PoolStorage) and
/// live for its whole lifetime; threads bind one with
/// [`acquire`](crate::task::PoolStorage::acquire) and unbind it by
/// dropping the returned [`PoolHandle`].
pub struct TaskPool {
    pub(crate) free: IndexQueue,
    pub(crate) inbox: IndexQueue,
    pub(crate) ready: WorkStealQueue,
    pub(crate) slots: Box<[TaskSlot]>,
    pub(crate) sem: Semaphore,
    /// Approximate population of deque + inbox, drives steal notifications.
    ready_count: AtomicU32,
    /// Set while a steal notification for this pool is outstanding.
    steal_posted: AtomicBool,
    owner: Mutex<Option<ThreadId>>,
    pool_index: u32,
    type_id: u32,
    capacity: u32,
    steal_threshold: u32,
}

impl TaskPool {
    pub(crate) fn new(
        pool_index: u32,
        type_id: u32,
        capacity: u32,
        steal_threshold: u32,
    ) -> Self {
        Self {
            free: IndexQueue::with_slots(capacity),
            inbox: IndexQueue::new(capacity),
            ready: WorkStealQueue::new(capacity),
            slots: (0..capacity).map(|_| TaskSlot::new()).collect(),
            sem: Semaphore::new(capacity as i32),
            ready_count: AtomicU32::new(0),
            steal_posted: AtomicBool::new(false),
            owner: Mutex::new(None),
            pool_index,
            type_id,
            capacity,
            steal_threshold,
        }
    }

    /// Index of this pool within its storage.
    #[inline]
    pub fn pool_index(&self) -> u32 {
        self.pool_index
    }

    /// The pool-type id this pool was configured under.
    #[inline]
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    /// Maximum number of simultaneously live tasks.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of free task slots (approximate under concurrency).
    #[inline]
    pub fn free_slots(&self) -> u32 {
        self.free.len()
    }

    /// Number of ready-to-run tasks queued (approximate under concurrency).
    #[inline]
    pub fn ready_tasks(&self) -> u32 {
        self.ready_count.load(Ordering::Relaxed)
    }

    pub(crate) fn slot(&self, slot_index: u32) -> &TaskSlot {
        &self.slots[slot_index as usize]
    }

    /// Rebinds the pool to the calling thread, restoring the empty state.
    pub(crate) fn bind(&self) {
        self.free.reset_filled();
        self.inbox.reset_empty();
        self.ready.reset();
        self.sem.reset(self.capacity as i32);
        self.ready_count.store(0, Ordering::SeqCst);
        self.steal_posted.store(false, Ordering::SeqCst);
        *self.owner.lock().unwrap() = Some(std::thread::current().id());
    }

    pub(crate) fn unbind(&self) {
        *self.owner.lock().unwrap() = None;
    }

    #[cfg(debug_assertions)]
    pub(crate) fn assert_owned_by_current_thread(&self) {
        let owner = *self.owner.lock().unwrap();
        debug_assert_eq!(
            owner,
            Some(std::thread::current().id()),
            "owner-only pool operation from a foreign thread"
        );
    }

    /// Accounts for one task id entering the deque or inbox, posting a
    /// steal notification when the population crosses the threshold.
    pub(crate) fn note_ready_push(&self, storage: &PoolStorage) {
        let population = self.ready_count.fetch_add(1, Ordering::AcqRel) + 1;
        if population > self.steal_threshold && !self.steal_posted.swap(true, Ordering::AcqRel) {
            storage.steal_bus().push(self.pool_index);
        }
    }

    /// Accounts for one task id leaving the deque or inbox, re-arming the
    /// steal notification once the pool drains back under the threshold.
    pub(crate) fn note_ready_pop(&self) {
        let population = self.ready_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if population <= self.steal_threshold {
            self.steal_posted.store(false, Ordering::Release);
        }
    }
}

/// A task pool bound to the calling thread.
///
/// Dropping the handle releases the pool back to its storage's free list.
/// The pool must be idle at that point (no live tasks); this is a caller
/// obligation, not enforced.
///
/// # Example
///
/// ```rust
/// use taskweave::task::{PoolStorage, PoolTypeConfig, TaskId, TaskInit, POOL_TYPE_WORKER};
///
/// fn body(_id: TaskId, _args: &mut [u8]) {}
///
/// let storage = PoolStorage::new(&[PoolTypeConfig::worker(2)]).unwrap();
/// let pool = storage.acquire(POOL_TYPE_WORKER).unwrap();
///
/// let id = pool.define(TaskInit::new(body)).unwrap();
/// pool.launch(id);
/// let (claimed, _) = pool.take().unwrap();
/// pool.execute(claimed);
/// ```
pub struct PoolHandle<'s> {
    storage: &'s PoolStorage,
    pool: &'s TaskPool,
    /// Owner-only queue ends must not migrate to another thread.
    _not_send: PhantomData<*const ()>,
}

impl<'s> PoolHandle<'s> {
    pub(crate) fn bind(storage: &'s PoolStorage, pool: &'s TaskPool) -> Self {
        pool.bind();
        trace!(
            "pool {} (type {}) bound to {:?}",
            pool.pool_index(),
            pool.type_id(),
            std::thread::current().id()
        );
        Self {
            storage,
            pool,
            _not_send: PhantomData,
        }
    }

    /// The bound pool.
    #[inline]
    pub fn pool(&self) -> &TaskPool {
        self.pool
    }

    /// The storage this pool belongs to.
    #[inline]
    pub fn storage(&self) -> &'s PoolStorage {
        self.storage
    }

    /// Defines a task, blocking while the pool has no free slot.
    ///
    /// On success the task is recorded, its dependencies are wired up, and
    /// it is pushed onto the ready deque once its wait count reaches zero.
    /// The task cannot complete until [`launch`](Self::launch) is called.
    ///
    /// # Errors
    ///
    /// - [`TaskError::ArgsTooLarge`] if `init.args` exceeds 48 bytes.
    /// - [`TaskError::TooManyDependencies`] if a dependency's permit list
    ///   is full.
    pub fn define(&self, init: TaskInit<'_>) -> Result<TaskId> {
        self.pool.sem.wait(DEFINE_SPIN_COUNT);
        self.define_bound(init)
    }

    /// Defines a task without blocking.
    ///
    /// # Errors
    ///
    /// As [`define`](Self::define), plus [`TaskError::PoolFull`] when no
    /// slot is free.
    pub fn try_define(&self, init: TaskInit<'_>) -> Result<TaskId> {
        if !self.pool.sem.try_wait() {
            return Err(TaskError::PoolFull);
        }
        self.define_bound(init)
    }

    /// Definition body; the caller already claimed one semaphore permit.
    fn define_bound(&self, init: TaskInit<'_>) -> Result<TaskId> {
        #[cfg(debug_assertions)]
        self.pool.assert_owned_by_current_thread();

        if init.args.len() > MAX_TASK_ARGS {
            self.pool.sem.post();
            return Err(TaskError::ArgsTooLarge);
        }
        let Some(slot_index) = self.pool.free.take() else {
            // The semaphore said a slot exists; the free queue must agree.
            self.pool.sem.post();
            return Err(TaskError::PoolFull);
        };

        let id = TaskId::new(TaskKind::Internal, self.pool.pool_index(), slot_index);
        let slot = self.pool.slot(slot_index);
        let dep_count = init.dependencies.len() as i32;
        // The +1 bias keeps the task unready while dependencies are wired
        // up, even if one of them completes concurrently.
        slot.begin_define(init.entry, init.args, init.parent, 1 + dep_count);

        let mut resolved = 0;
        for (wired, &dependency) in init.dependencies.iter().enumerate() {
            let dep_slot = self.storage.slot(dependency);
            match dep_slot.try_add_permit(id) {
                PermitAdd::Added => {}
                PermitAdd::Completed => resolved += 1,
                PermitAdd::Full => {
                    // Permits already appended will decrement this task's
                    // wait count later; the slot cannot simply be freed.
                    // Convert it into a self-freeing no-op instead.
                    let unwired = dep_count - wired as i32;
                    slot.neutralize();
                    if slot.resolve_waits(1 + resolved + unwired) <= 0 {
                        self.push_ready_local(id);
                    }
                    return Err(TaskError::TooManyDependencies);
                }
            }
        }

        if init.parent.is_valid() {
            self.storage.slot(init.parent).add_work(1);
        }

        // Drop the definition bias plus any dependencies that had already
        // completed; at zero the task is immediately runnable.
        if slot.resolve_waits(1 + resolved) <= 0 {
            self.push_ready_local(id);
        }
        Ok(id)
    }

    /// Marks the end of the definition phase for `id`.
    ///
    /// Launching retires the "outstanding define" work item.  A task can
    /// only reach its completion logic after it has been launched, even if
    /// its body already ran.
    pub fn launch(&self, id: TaskId) {
        debug_assert!(id.is_valid());
        if self.storage.slot(id).finish_work() == 0 {
            self.finish(id);
        }
    }

    /// Retires one outstanding work item of `id` (its executed body, or a
    /// completed child), cascading into full completion at zero.
    pub fn complete(&self, id: TaskId) {
        debug_assert!(id.is_valid());
        if self.storage.slot(id).finish_work() == 0 {
            self.finish(id);
        }
    }

    /// Takes the most recently readied task from the local deque.
    ///
    /// Owner-only.  Cross-pool readies parked in the inbox are folded into
    /// the deque first.  The flag reports whether more work remains.
    pub fn take(&self) -> Option<(TaskId, bool)> {
        #[cfg(debug_assertions)]
        self.pool.assert_owned_by_current_thread();

        while let Some(bits) = self.pool.inbox.take() {
            self.pool.ready.push(TaskId::from_bits(bits));
        }
        let taken = self.pool.ready.take();
        if taken.is_some() {
            self.pool.note_ready_pop();
        }
        taken
    }

    /// Runs `id`'s body and completes it.
    ///
    /// The caller must have claimed `id` from a deque or inbox and must
    /// call this exactly once per claim.
    pub fn execute(&self, id: TaskId) {
        debug_assert!(id.is_valid());
        self.storage.slot(id).run(id);
        self.complete(id);
    }

    /// Pushes a ready task onto the local deque.  Owner-only.
    fn push_ready_local(&self, id: TaskId) {
        self.pool.ready.push(id);
        self.pool.note_ready_push(self.storage);
    }

    /// Full completion: the task's work count reached zero.
    ///
    /// Latches the permit list, readies every permittee, cascades into the
    /// parent, then returns the slot to the owning pool's free queue.
    fn finish(&self, id: TaskId) {
        let slot = self.storage.slot(id);

        let permit_count = slot.latch_permits();
        for index in 0..permit_count as usize {
            self.ready_permittee(slot.permit(index));
        }

        let parent = slot.parent();
        if parent.is_valid() {
            self.complete(parent);
        }

        let owner = self.storage.pool(id.pool_index());
        let pushed = owner.free.push(id.slot_index());
        debug_assert!(pushed, "free queue can always re-admit its own slot");
        owner.sem.post();
    }

    /// Readies a task whose last prerequisite just completed.
    fn ready_permittee(&self, id: TaskId) {
        let slot = self.storage.slot(id);
        if slot.resolve_waits(1) > 0 {
            return;
        }
        if id.pool_index() == self.pool.pool_index() {
            // The permittee lives in the pool this thread owns; the deque
            // push is legal here.
            self.push_ready_local(id);
        } else {
            // Remote pool: park the id in its inbox and notify, so either
            // the owner folds it into the deque or a thief picks it up.
            let target = self.storage.pool(id.pool_index());
            let pushed = target.inbox.push(id.to_bits());
            debug_assert!(pushed, "inbox capacity matches pool capacity");
            target.note_ready_push(self.storage);
        }
    }
}

impl Drop for PoolHandle<'_> {
    fn drop(&mut self) {
        trace!(
            "pool {} (type {}) released",
            self.pool.pool_index(),
            self.pool.type_id()
        );
        self.pool.unbind();
        self.storage.release(self.pool.pool_index());
    }
}
