// benches/scheduler_bench.rs
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use taskweave::prelude::*;
use taskweave::queue::{IndexQueue, WorkStealQueue};

fn noop(_id: TaskId, _args: &mut [u8]) {}

fn bench_task_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_lifecycle");

    let storage = PoolStorage::new(&[PoolTypeConfig::worker(1)]).unwrap();
    let pool = storage.acquire(POOL_TYPE_WORKER).unwrap();

    group.bench_function("define_launch_execute_complete", |b| {
        b.iter(|| {
            let id = pool.define(TaskInit::new(black_box(noop))).unwrap();
            pool.launch(id);
            let (claimed, _) = pool.take().unwrap();
            pool.execute(claimed);
        });
    });

    group.bench_function("define_with_args_and_dependency", |b| {
        b.iter(|| {
            let gate = pool.define(TaskInit::new(noop)).unwrap();
            let dependent = pool
                .define(
                    TaskInit::new(noop)
                        .args(black_box(&42u64.to_le_bytes()))
                        .depends_on(&[gate]),
                )
                .unwrap();
            pool.launch(gate);
            pool.launch(dependent);
            pool.run_until_idle();
        });
    });

    group.finish();
}

fn bench_queues(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_operations");

    for capacity in [256u32, 4096].iter() {
        group.bench_with_input(
            BenchmarkId::new("mpmc_push_take", capacity),
            capacity,
            |b, &capacity| {
                let queue = IndexQueue::new(capacity);
                b.iter(|| {
                    queue.push(black_box(7));
                    let _ = queue.take().unwrap();
                });
            },
        );
    }

    group.bench_function("deque_push_take", |b| {
        let deque = WorkStealQueue::new(1024);
        let id = TaskId::new(TaskKind::Internal, 0, 0);
        b.iter(|| {
            deque.push(black_box(id));
            let _ = deque.take().unwrap();
        });
    });

    group.finish();
}

fn bench_buddy_allocator(c: &mut Criterion) {
    let mut group = c.benchmark_group("buddy_allocator");

    group.bench_function("allocate_free_min_block", |b| {
        let mut alloc = BuddyAllocator::new(BuddyConfig {
            memory_size: 1 << 24,
            min_block: 1 << 12,
            max_block: 1 << 24,
            bytes_reserved: 0,
        })
        .unwrap();
        b.iter(|| {
            let block = alloc.allocate(black_box(4096), 64).unwrap();
            alloc.free(block);
        });
    });

    group.bench_function("split_merge_full_depth", |b| {
        let mut alloc = BuddyAllocator::new(BuddyConfig {
            memory_size: 1 << 24,
            min_block: 1 << 12,
            max_block: 1 << 24,
            bytes_reserved: 0,
        })
        .unwrap();
        b.iter(|| {
            // Splitting from the root down and merging back exercises the
            // index maintenance at every level.
            let small = alloc.allocate(black_box(4096), 64).unwrap();
            let large = alloc.allocate(black_box(1 << 23), 64).unwrap();
            alloc.free(small);
            alloc.free(large);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_task_lifecycle,
    bench_queues,
    bench_buddy_allocator
);
criterion_main!(benches);
