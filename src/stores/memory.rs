//! In-process request store
//!
//! All handles created from one `MemoryBackend` see the same data, the way
//! N network clients see one database.

use crate::core::{RequestId, ShardIndex};
use crate::pool::ShardResource;
use crate::stores::traits::{RequestStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared in-memory data behind any number of `MemoryStore` handles
#[derive(Debug, Default)]
pub struct MemoryBackend {
    lists: Mutex<HashMap<ShardIndex, Vec<RequestId>>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// New handle onto this backend
    pub fn handle(self: &Arc<Self>) -> MemoryStore {
        MemoryStore {
            backend: Arc::clone(self),
            released: AtomicBool::new(false),
        }
    }

    /// Direct read, bypassing any handle
    pub fn records(&self, shard: ShardIndex) -> Vec<RequestId> {
        self.lists.lock().get(&shard).cloned().unwrap_or_default()
    }

    /// Total number of stored ids across all shards
    pub fn total(&self) -> usize {
        self.lists.lock().values().map(Vec::len).sum()
    }
}

/// Handle onto a `MemoryBackend`
#[derive(Debug)]
pub struct MemoryStore {
    backend: Arc<MemoryBackend>,
    released: AtomicBool,
}

impl MemoryStore {
    pub fn shared(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl ShardResource for MemoryStore {
    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, shard: ShardIndex, request_id: RequestId) -> Result<(), StoreError> {
        if self.is_released() {
            return Err(StoreError::Closed);
        }
        self.backend.lists.lock().entry(shard).or_default().push(request_id);
        Ok(())
    }

    async fn fetch(&self, shard: ShardIndex) -> Result<Vec<RequestId>, StoreError> {
        if self.is_released() {
            return Err(StoreError::Closed);
        }
        Ok(self.backend.records(shard))
    }
}
