//! Test utilities: a store wrapper with switchable faults
//!
//! Wraps a `MemoryStore` so tests can make writes fail, make reads fail on
//! chosen shards, or stall every call.

use crate::core::{RequestId, ShardIndex};
use crate::pool::ShardResource;
use crate::stores::{MemoryStore, RequestStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fault switches shared by every `FaultyStore` built from it
#[derive(Debug, Default)]
pub struct Fault {
    writes: AtomicBool,
    all_reads: AtomicBool,
    read_shards: Mutex<HashSet<ShardIndex>>,
    delay: Mutex<Option<Duration>>,
}

impl Fault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, on: bool) {
        self.writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_all_reads(&self, on: bool) {
        self.all_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_reads_on(&self, shard: ShardIndex) {
        self.read_shards.lock().insert(shard);
    }

    pub fn delay(&self, by: Duration) {
        *self.delay.lock() = Some(by);
    }

    fn read_fails(&self, shard: ShardIndex) -> bool {
        self.all_reads.load(Ordering::SeqCst) || self.read_shards.lock().contains(&shard)
    }

    async fn stall(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// `MemoryStore` that consults a shared `Fault` before every call
pub struct FaultyStore {
    inner: MemoryStore,
    fault: Arc<Fault>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, fault: Arc<Fault>) -> Self {
        Self { inner, fault }
    }
}

impl ShardResource for FaultyStore {
    fn release(&self) {
        self.inner.release();
    }
}

#[async_trait]
impl RequestStore for FaultyStore {
    fn backend(&self) -> &'static str {
        "faulty"
    }

    async fn append(&self, shard: ShardIndex, request_id: RequestId) -> Result<(), StoreError> {
        self.fault.stall().await;
        if self.fault.writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        self.inner.append(shard, request_id).await
    }

    async fn fetch(&self, shard: ShardIndex) -> Result<Vec<RequestId>, StoreError> {
        self.fault.stall().await;
        if self.fault.read_fails(shard) {
            return Err(StoreError::Backend("injected read failure".into()));
        }
        self.inner.fetch(shard).await
    }
}
