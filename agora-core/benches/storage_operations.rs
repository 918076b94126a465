use agora_core::core_gossip::NetworkMessage;
use agora_core::core_payload::{ProtectedPayload, StorageEntry};
use agora_core::test_utils::{deterministic_keypair, offer_payload, signed_entry, TestStorage};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

const START: u64 = 1_700_000_000_000;

fn entries(count: usize) -> Vec<(ProtectedPayload, StorageEntry)> {
    let owner = deterministic_keypair(42);
    (0..count)
        .map(|i| {
            let payload = offer_payload(&owner, &format!("bench-{}", i));
            let entry = signed_entry(payload.clone(), 1, &owner, START).unwrap();
            (payload, entry)
        })
        .collect()
}

fn bench_add_protected(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_add");
    group.measurement_time(Duration::from_secs(10));

    for size in [100usize, 1_000] {
        let batch = entries(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("add_protected_entry", size), &batch, |b, batch| {
            b.iter_batched(
                || TestStorage::new(START),
                |node| {
                    for (_, entry) in batch {
                        black_box(node.storage.add_protected_entry(entry.clone()).unwrap());
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_add_remove_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_remove");
    let owner = deterministic_keypair(42);
    let batch = entries(500);
    let removals: Vec<StorageEntry> = batch
        .iter()
        .map(|(payload, _)| signed_entry(payload.clone(), 2, &owner, START).unwrap())
        .collect();

    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("add_then_remove", |b| {
        b.iter_batched(
            || TestStorage::new(START),
            |node| {
                for (_, entry) in &batch {
                    node.storage.add_protected_entry(entry.clone()).unwrap();
                }
                for removal in &removals {
                    black_box(node.storage.remove_protected_entry(removal.clone()).unwrap());
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_wire_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");
    let (_, entry) = entries(1).remove(0);
    let message = NetworkMessage::AddData(entry);
    let frame = message.encode().unwrap();

    group.bench_function("encode_add_data", |b| b.iter(|| black_box(message.encode().unwrap())));
    group.bench_function("decode_add_data", |b| {
        b.iter(|| black_box(NetworkMessage::decode(&frame, 1024 * 1024).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_add_protected, bench_add_remove_cycle, bench_wire_codec);
criterion_main!(benches);
