// src/task/worker.rs
//! Worker thread main loop.
//!
//! A worker binds a pool of the worker type, drains its own deque in LIFO
//! order, and otherwise sleeps on the storage's steal bus until some pool
//! advertises stealable work.  Stolen work arrives in FIFO order, oldest
//! first, so long-queued tasks migrate to idle threads.
//!
//! Workers have no task-level cancellation; they run until the storage
//! posts shutdown wakeups (see
//! [`wake_workers`](crate::task::PoolStorage::wake_workers)).

use log::trace;

use crate::queue::Steal;
use crate::task::pool::PoolHandle;

impl PoolHandle<'_> {
    /// Executes local ready tasks until the deque and inbox are empty.
    ///
    /// Returns the number of tasks executed.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        while let Some((id, _more)) = self.take() {
            self.execute(id);
            executed += 1;
        }
        executed
    }

    /// Runs the worker loop until a shutdown wakeup arrives.
    ///
    /// Loop shape: drain the local deque, then block on the steal bus for
    /// a pool index and steal from that pool.  A lost steal race or an
    /// already-drained pool simply goes back to sleep; another
    /// notification follows when work is produced past the threshold.
    pub fn run_worker(&self) {
        trace!("worker started on pool {}", self.pool().pool_index());
        let mut executed: u64 = 0;
        loop {
            executed += self.run_until_idle() as u64;
            match self.storage().next_steal_target() {
                Some(pool_index) => match self.storage().steal_from(pool_index) {
                    Steal::Taken(id, _more) => {
                        self.execute(id);
                        executed += 1;
                    }
                    Steal::Retry | Steal::Empty => continue,
                },
                None => break,
            }
        }
        trace!(
            "worker on pool {} stopped after {} tasks",
            self.pool().pool_index(),
            executed
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::task::config::{POOL_TYPE_MAIN, POOL_TYPE_WORKER, PoolTypeConfig};
    use crate::task::{PoolStorage, TaskId, TaskInit};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    static EXECUTED: AtomicUsize = AtomicUsize::new(0);

    fn count_execution(_: TaskId, _: &mut [u8]) {
        EXECUTED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_workers_drain_a_producer_pool() {
        EXECUTED.store(0, Ordering::SeqCst);
        let types = [
            {
                let mut main = PoolTypeConfig::main_thread();
                main.steal_threshold = 0;
                main.max_active_tasks = 512;
                main
            },
            PoolTypeConfig::worker(2),
        ];
        let storage = Arc::new(PoolStorage::new(&types).unwrap());
        let task_count = 200;

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    let pool = storage.acquire(POOL_TYPE_WORKER).unwrap();
                    pool.run_worker();
                })
            })
            .collect();

        {
            let producer = storage.acquire(POOL_TYPE_MAIN).unwrap();
            let mut ids = Vec::new();
            for _ in 0..task_count {
                ids.push(producer.define(TaskInit::new(count_execution)).unwrap());
            }
            for id in ids {
                producer.launch(id);
            }
            // The producer participates too; whatever the workers have not
            // stolen yet drains here.
            while EXECUTED.load(Ordering::SeqCst) < task_count {
                if producer.run_until_idle() == 0 {
                    thread::yield_now();
                }
            }
        }

        storage.wake_workers(2);
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(EXECUTED.load(Ordering::SeqCst), task_count);
    }
}
