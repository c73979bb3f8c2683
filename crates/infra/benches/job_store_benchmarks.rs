use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use jobqueue_core::{JobId, JobStatus, NewJob, StatusEnvelope};
use jobqueue_infra::jobs::{InMemoryJobStore, JobStore};
use jobqueue_infra::realtime::{ConnectionHandle, SubscriptionHub};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn job() -> NewJob {
    NewJob::new("send_email", serde_json::json!({"to": "a@example.com"}))
}

/// One full happy-path lifecycle: enqueue → claim → mark_success.
fn bench_job_lifecycle(c: &mut Criterion) {
    let rt = runtime();
    let store = InMemoryJobStore::new();

    c.bench_function("in_memory_lifecycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let job = store.enqueue(job()).await.unwrap();
                let claimed = store.claim().await.unwrap().unwrap();
                black_box(store.mark_success(claimed.id).await.unwrap());
                black_box(job.id)
            })
        });
    });
}

/// Claim latency as the pending backlog grows.
fn bench_claim_with_backlog(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_with_backlog");
    let rt = runtime();

    for backlog in [10, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("claim", backlog), backlog, |b, &size| {
            let store = InMemoryJobStore::new();
            rt.block_on(async {
                for _ in 0..size {
                    store.enqueue(job()).await.unwrap();
                }
            });

            b.iter(|| {
                rt.block_on(async {
                    // Replace the claimed job so the backlog stays constant.
                    let claimed = store.claim().await.unwrap().unwrap();
                    store.mark_success(claimed.id).await.unwrap();
                    store.enqueue(job()).await.unwrap();
                    black_box(claimed.id)
                })
            });
        });
    }

    group.finish();
}

/// Fan-out cost for one status envelope.
fn bench_hub_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_publish");

    for watchers in [1, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*watchers as u64));
        group.bench_with_input(
            BenchmarkId::new("publish", watchers),
            watchers,
            |b, &count| {
                let hub = SubscriptionHub::new();
                let job_id = JobId::new(1);
                let mut outboxes = Vec::with_capacity(count);
                for _ in 0..count {
                    let (connection, outbox) = ConnectionHandle::channel();
                    hub.subscribe(&connection, job_id);
                    outboxes.push(outbox);
                }
                let envelope = StatusEnvelope {
                    job_id,
                    status: JobStatus::Running,
                    attempts: 0,
                    error: None,
                };

                b.iter(|| {
                    let delivered = hub.publish(black_box(&envelope));
                    for outbox in outboxes.iter_mut() {
                        while outbox.try_recv().is_ok() {}
                    }
                    black_box(delivered)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_job_lifecycle,
    bench_claim_with_backlog,
    bench_hub_publish
);
criterion_main!(benches);
