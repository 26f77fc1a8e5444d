use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tg_relay::model::{Priority, WorkItem, WorkKind};
use tg_relay::queue::PriorityQueue;
use tokio::runtime::Runtime;

fn item(priority: Priority) -> WorkItem {
    WorkItem::new(1, 1, priority, WorkKind::Delete)
}

/// Push throughput at a range of queue depths, mirroring the teacher's
/// `bench_single_message_dedup` parameterization by input size.
fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_push");
    for depth in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let queue = PriorityQueue::new(depth + 1);
                for i in 0..depth {
                    let priority = match i % 4 {
                        0 => Priority::Urgent,
                        1 => Priority::High,
                        2 => Priority::Normal,
                        _ => Priority::Low,
                    };
                    queue.push(black_box(item(priority)));
                }
            });
        });
    }
    group.finish();
}

/// Push-then-drain throughput, exercising both the heap insert and the
/// pop-under-lock hot path together.
fn bench_push_and_drain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("priority_queue_drain");
    for depth in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                rt.block_on(async {
                    let queue = PriorityQueue::new(depth + 1);
                    for i in 0..depth {
                        let priority = match i % 4 {
                            0 => Priority::Urgent,
                            1 => Priority::High,
                            2 => Priority::Normal,
                            _ => Priority::Low,
                        };
                        queue.push(item(priority));
                    }
                    for _ in 0..depth {
                        black_box(queue.pop().await);
                    }
                });
            });
        });
    }
    group.finish();
}

/// Overflow behavior under sustained pressure: pushing well past
/// capacity should stay cheap (drop-oldest, not block).
fn bench_overflow_drop(c: &mut Criterion) {
    c.bench_function("priority_queue_overflow_drop", |b| {
        b.iter(|| {
            let queue = PriorityQueue::new(100);
            for i in 0..10_000 {
                let priority = match i % 4 {
                    0 => Priority::Urgent,
                    1 => Priority::High,
                    2 => Priority::Normal,
                    _ => Priority::Low,
                };
                queue.push(black_box(item(priority)));
            }
        });
    });
}

criterion_group!(benches, bench_push, bench_push_and_drain, bench_overflow_drop);
criterion_main!(benches);
