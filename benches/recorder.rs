//! Benchmarks for the dual-store recorder over in-process stores
//!
//! Measures recorder overhead (timeouts, fan-out, merge) without network.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shardcore::core::ShardIndex;
use shardcore::pool::ShardPool;
use shardcore::recorder::{DualStoreRecorder, DEFAULT_STORE_TIMEOUT};
use shardcore::stores::{MemoryBackend, MemoryStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const SHARDS: usize = 8;

fn recorder() -> DualStoreRecorder<MemoryStore, MemoryStore> {
    let pool = |backend: Arc<MemoryBackend>| match ShardPool::create("bench", SHARDS, |_| {
        Ok::<_, String>(backend.handle())
    }) {
        Ok(pool) => Arc::new(pool),
        Err(e) => panic!("pool init failed: {}", e),
    };
    DualStoreRecorder::new(pool(MemoryBackend::new()), pool(MemoryBackend::new()), DEFAULT_STORE_TIMEOUT)
}

fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Builder::new_multi_thread().enable_time().build() {
        Ok(rt) => rt,
        Err(e) => panic!("runtime init failed: {}", e),
    }
}

fn bench_write(c: &mut Criterion) {
    let rt = runtime();
    let recorder = recorder();
    let next = AtomicU64::new(0);

    c.bench_function("recorder_write", |b| {
        b.to_async(&rt).iter(|| async {
            let id = next.fetch_add(1, Ordering::Relaxed);
            let shard = ShardIndex(id as usize % SHARDS);
            black_box(recorder.write(shard, id).await.is_ok())
        })
    });
}

fn bench_read_all(c: &mut Criterion) {
    let rt = runtime();
    let recorder = recorder();
    rt.block_on(async {
        for id in 0..1_000u64 {
            let _ = recorder.write(ShardIndex(id as usize % SHARDS), id).await;
        }
    });

    c.bench_function("recorder_read_all_1k", |b| {
        b.to_async(&rt).iter(|| async { black_box(recorder.read_all(SHARDS).await.0.len()) })
    });
}

criterion_group!(benches, bench_write, bench_read_all);
criterion_main!(benches);
