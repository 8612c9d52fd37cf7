// src/task/slot.rs
//! Per-task record storage and the task definition descriptor.
//!
//! Each pool owns a fixed array of [`TaskSlot`] records, one per task
//! capacity.  A record is two cache lines: the counters and permit list
//! that remote threads hammer with atomics, plus the entry point and
//! argument bytes that only the defining thread writes.
//!
//! Access discipline:
//! - `entry`/`args` are written while the defining thread holds the slot
//!   exclusively (freshly taken from the free queue, not yet published)
//!   and read only after an acquire-ordered claim out of a deque.
//! - Everything else is an atomic and may be touched from any thread.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::task::id::{MAX_TASK_ARGS, MAX_TASK_PERMITS, TaskId};

/// Task entry point: receives the task's id and its inline argument bytes.
pub type TaskEntry = fn(TaskId, &mut [u8]);

/// Outcome of appending a permit to a dependency's permit list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PermitAdd {
    /// The permit was appended; the dependency will ready the task on completion.
    Added,
    /// The dependency already completed; the dependency counts as resolved.
    Completed,
    /// The permit list is full.
    Full,
}

/// Fixed-layout task record.
#[repr(align(64))]
pub(crate) struct TaskSlot {
    /// Number of prerequisites not yet complete; the task is ready at <= 0.
    wait_count: AtomicI32,
    /// Outstanding work items: 2 at define (body + launch), +1 per child.
    work_count: AtomicI32,
    /// Valid permit entries, or -1 once completion latched the list.
    permit_count: AtomicI32,
    /// Parent task id bits, or the invalid id for a root task.
    parent: AtomicU32,
    entry: UnsafeCell<TaskEntry>,
    args: UnsafeCell<[u8; MAX_TASK_ARGS]>,
    permits: [AtomicU32; MAX_TASK_PERMITS],
}

// The UnsafeCell fields are guarded by the slot lifecycle: exclusive during
// definition, immutable afterwards.
unsafe impl Sync for TaskSlot {}

const _: () = assert!(std::mem::size_of::<TaskSlot>() <= 128);

fn entry_unreachable(_: TaskId, _: &mut [u8]) {
    unreachable!("task slot executed before definition");
}

impl TaskSlot {
    pub(crate) fn new() -> Self {
        Self {
            wait_count: AtomicI32::new(0),
            work_count: AtomicI32::new(0),
            permit_count: AtomicI32::new(-1),
            parent: AtomicU32::new(TaskId::INVALID.to_bits()),
            entry: UnsafeCell::new(entry_unreachable),
            args: UnsafeCell::new([0; MAX_TASK_ARGS]),
            permits: std::array::from_fn(|_| AtomicU32::new(TaskId::INVALID.to_bits())),
        }
    }

    /// Initializes the record for a freshly allocated slot.
    ///
    /// The caller owns the slot exclusively: its index was just taken from
    /// the free queue and the id has not been published anywhere yet.
    /// `wait_bias` is `1 + dependency_count`; the final bias subtraction
    /// happens in the definition path once the permit appends are done.
    pub(crate) fn begin_define(
        &self,
        entry: TaskEntry,
        args: &[u8],
        parent: TaskId,
        wait_bias: i32,
    ) {
        debug_assert!(args.len() <= MAX_TASK_ARGS);
        // Permit slots must read as invalid before permit_count goes
        // non-negative, or a completer could observe a stale entry.
        for permit in &self.permits {
            permit.store(TaskId::INVALID.to_bits(), Ordering::Relaxed);
        }
        unsafe {
            *self.entry.get() = entry;
            let buffer = &mut *self.args.get();
            buffer[..args.len()].copy_from_slice(args);
        }
        self.parent.store(parent.to_bits(), Ordering::Relaxed);
        self.wait_count.store(wait_bias, Ordering::Relaxed);
        self.work_count.store(2, Ordering::Relaxed);
        // Release-publishes every store above to threads that observe the
        // permit count.
        self.permit_count.store(0, Ordering::Release);
    }

    /// Rewrites the entry point and detaches the parent.
    ///
    /// Used to neutralize a definition that failed after some permits were
    /// already appended to its dependencies: the slot drains through the
    /// normal ready/execute/complete path as a no-op and frees itself.
    /// The caller must still hold the slot exclusively.
    pub(crate) fn neutralize(&self) {
        unsafe {
            *self.entry.get() = |_, _| {};
        }
        self.parent
            .store(TaskId::INVALID.to_bits(), Ordering::Relaxed);
        // One outstanding work item: the no-op body.  No launch will come.
        self.work_count.store(1, Ordering::Release);
    }

    /// Runs the task body.  Only valid after an acquire-ordered claim.
    pub(crate) fn run(&self, id: TaskId) {
        let entry = unsafe { *self.entry.get() };
        let args = unsafe { &mut *self.args.get() };
        entry(id, args);
    }

    /// Parent task id, or invalid for a root task.
    pub(crate) fn parent(&self) -> TaskId {
        TaskId::from_bits(self.parent.load(Ordering::Acquire))
    }

    /// Current outstanding-work count (observability for tests).
    pub(crate) fn work_count(&self) -> i32 {
        self.work_count.load(Ordering::Acquire)
    }

    /// Current wait count (observability for tests).
    pub(crate) fn wait_count(&self) -> i32 {
        self.wait_count.load(Ordering::Acquire)
    }

    /// Current permit count, -1 once completion latched the list.
    pub(crate) fn permit_count(&self) -> i32 {
        self.permit_count.load(Ordering::Acquire)
    }

    /// Adds `n` outstanding work items (a child task attaching).
    pub(crate) fn add_work(&self, n: i32) {
        let previous = self.work_count.fetch_add(n, Ordering::AcqRel);
        debug_assert!(previous > 0, "work added to a completed task");
    }

    /// Retires one outstanding work item, returning the remaining count.
    pub(crate) fn finish_work(&self) -> i32 {
        let remaining = self.work_count.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(remaining >= 0, "work count fell below zero");
        remaining
    }

    /// Subtracts `n` prerequisites, returning the remaining wait count.
    pub(crate) fn resolve_waits(&self, n: i32) -> i32 {
        self.wait_count.fetch_sub(n, Ordering::AcqRel) - n
    }

    /// Appends `id` to the permit list unless the task already completed.
    pub(crate) fn try_add_permit(&self, id: TaskId) -> PermitAdd {
        let mut count = self.permit_count.load(Ordering::Acquire);
        loop {
            if count < 0 {
                return PermitAdd::Completed;
            }
            if count as usize >= MAX_TASK_PERMITS {
                return PermitAdd::Full;
            }
            match self.permit_count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.permits[count as usize].store(id.to_bits(), Ordering::Release);
                    return PermitAdd::Added;
                }
                Err(observed) => count = observed,
            }
        }
    }

    /// Latches the permit list closed, returning the number of valid entries.
    ///
    /// After this call, [`try_add_permit`](Self::try_add_permit) reports the
    /// task as completed.  Transitions to -1 exactly once per definition.
    pub(crate) fn latch_permits(&self) -> i32 {
        let count = self.permit_count.swap(-1, Ordering::AcqRel);
        debug_assert!(count >= 0, "permit list latched twice");
        count
    }

    /// Reads permit entry `index`, waiting out an in-flight append.
    ///
    /// An appender that won its slot via CAS may not have stored the id
    /// yet when the completer latches the list; the store follows
    /// immediately, so spin rather than sleep.
    pub(crate) fn permit(&self, index: usize) -> TaskId {
        let backoff = crossbeam::utils::Backoff::new();
        loop {
            let bits = self.permits[index].load(Ordering::Acquire);
            let id = TaskId::from_bits(bits);
            if id.is_valid() {
                return id;
            }
            backoff.snooze();
        }
    }
}

/// Descriptor for defining a task.
///
/// # Example
///
/// ```rust
/// use taskweave::task::{TaskId, TaskInit};
///
/// fn body(_id: TaskId, _args: &mut [u8]) {}
///
/// let payload = 42u32.to_le_bytes();
/// let init = TaskInit::new(body).args(&payload);
/// assert_eq!(init.args.len(), 4);
/// assert!(!init.parent.is_valid());
/// ```
#[derive(Clone, Copy)]
pub struct TaskInit<'a> {
    /// The function executed as the task body.
    pub entry: TaskEntry,
    /// Argument bytes copied into the task record (at most 48).
    pub args: &'a [u8],
    /// Tasks that must complete before this one becomes ready.
    pub dependencies: &'a [TaskId],
    /// Parent task, or [`TaskId::INVALID`] for a root task.
    pub parent: TaskId,
}

impl<'a> TaskInit<'a> {
    /// Describes a root task with no arguments and no dependencies.
    pub fn new(entry: TaskEntry) -> Self {
        Self {
            entry,
            args: &[],
            dependencies: &[],
            parent: TaskId::INVALID,
        }
    }

    /// Describes a child task of `parent` with no arguments or dependencies.
    ///
    /// The parent must be defined and not yet completed.
    pub fn child_of(parent: TaskId, entry: TaskEntry) -> Self {
        Self {
            entry,
            args: &[],
            dependencies: &[],
            parent,
        }
    }

    /// Sets the argument bytes copied into the task record.
    pub fn args(mut self, args: &'a [u8]) -> Self {
        self.args = args;
        self
    }

    /// Sets the tasks this task waits on.
    pub fn depends_on(mut self, dependencies: &'a [TaskId]) -> Self {
        self.dependencies = dependencies;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    fn noop(_: TaskId, _: &mut [u8]) {}

    #[test]
    fn test_slot_fits_two_cache_lines() {
        assert!(std::mem::size_of::<TaskSlot>() <= 128);
        assert_eq!(std::mem::align_of::<TaskSlot>(), 64);
    }

    #[test]
    fn test_define_initializes_counters() {
        let slot = TaskSlot::new();
        slot.begin_define(noop, &[1, 2, 3], TaskId::INVALID, 1);
        assert_eq!(slot.work_count(), 2);
        assert_eq!(slot.wait_count(), 1);
        assert_eq!(slot.permit_count(), 0);
        assert!(!slot.parent().is_valid());
    }

    #[test]
    fn test_permit_append_and_latch() {
        let slot = TaskSlot::new();
        slot.begin_define(noop, &[], TaskId::INVALID, 1);

        let dependent = TaskId::new(TaskKind::Internal, 0, 7);
        assert_eq!(slot.try_add_permit(dependent), PermitAdd::Added);
        assert_eq!(slot.permit_count(), 1);

        assert_eq!(slot.latch_permits(), 1);
        assert_eq!(slot.permit(0), dependent);
        assert_eq!(slot.permit_count(), -1);

        // Appending after the latch reports the dependency as complete.
        assert_eq!(slot.try_add_permit(dependent), PermitAdd::Completed);
    }

    #[test]
    fn test_permit_list_caps_out() {
        let slot = TaskSlot::new();
        slot.begin_define(noop, &[], TaskId::INVALID, 1);
        for i in 0..MAX_TASK_PERMITS {
            let id = TaskId::new(TaskKind::Internal, 0, i as u32);
            assert_eq!(slot.try_add_permit(id), PermitAdd::Added);
        }
        let extra = TaskId::new(TaskKind::Internal, 0, 99);
        assert_eq!(slot.try_add_permit(extra), PermitAdd::Full);
    }

    #[test]
    fn test_work_count_arithmetic() {
        let slot = TaskSlot::new();
        slot.begin_define(noop, &[], TaskId::INVALID, 1);
        slot.add_work(1); // child attaches
        assert_eq!(slot.work_count(), 3);
        assert_eq!(slot.finish_work(), 2); // launch
        assert_eq!(slot.finish_work(), 1); // body
        assert_eq!(slot.finish_work(), 0); // child completion
    }

    #[test]
    fn test_run_sees_args() {
        static SEEN: AtomicU32 = AtomicU32::new(0);
        fn record(_: TaskId, args: &mut [u8]) {
            let value = u32::from_le_bytes([args[0], args[1], args[2], args[3]]);
            SEEN.store(value, Ordering::SeqCst);
        }
        let slot = TaskSlot::new();
        slot.begin_define(record, &0xBEEF_u32.to_le_bytes(), TaskId::INVALID, 1);
        slot.run(TaskId::new(TaskKind::Internal, 0, 0));
        assert_eq!(SEEN.load(Ordering::SeqCst), 0xBEEF);
    }
}
