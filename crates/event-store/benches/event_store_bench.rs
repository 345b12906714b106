use common::AggregateRef;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{EventEnvelope, EventStore, EventStoreExt, InMemoryEventStore, Version};
use uuid::Uuid;

fn make_event(aggregate: &AggregateRef) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate(aggregate)
        .event_type("ActionCompleted")
        .payload_raw(serde_json::json!({
            "type": "ActionCompleted",
            "data": {
                "path": [0],
                "action": "CreateServerGroup",
                "command_type": "CreateServerGroupCommand",
                "command": { "region": "us-east-1" }
            }
        }))
        .build()
        .unwrap()
}

fn fresh_aggregate() -> AggregateRef {
    AggregateRef::new("ServerGroup", Uuid::new_v4().to_string())
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let aggregate = fresh_aggregate();
                store
                    .append(&aggregate, Version::initial(), vec![make_event(&aggregate)])
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let aggregate = fresh_aggregate();
                let events: Vec<EventEnvelope> = (0..10).map(|_| make_event(&aggregate)).collect();
                store
                    .append(&aggregate, Version::initial(), events)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_sequential_appends(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/sequential_appends_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let aggregate = fresh_aggregate();
                let mut version = Version::initial();
                for _ in 0..100 {
                    version = store
                        .append_event(&aggregate, version, make_event(&aggregate))
                        .await
                        .unwrap();
                }
            });
        });
    });
}

fn bench_load(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let aggregate = fresh_aggregate();

    // Pre-populate with 100 events
    rt.block_on(async {
        let events: Vec<EventEnvelope> = (0..100).map(|_| make_event(&aggregate)).collect();
        store
            .append(&aggregate, Version::initial(), events)
            .await
            .unwrap();
    });

    c.bench_function("event_store/load_100_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load_ref(&aggregate).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_batch_10,
    bench_sequential_appends,
    bench_load
);
criterion_main!(benches);
