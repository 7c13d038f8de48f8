//! Backing stores for request records
//!
//! - `postgres`: store A, a `request_tracking (core, request_id)` table
//! - `redis`: store B, one `request:core:{shard}` list per shard
//! - `memory`: in-process store used by tests and benchmarks

pub mod memory;
pub mod postgres;
pub mod redis;
pub mod traits;

pub use memory::{MemoryBackend, MemoryStore};
pub use postgres::{PostgresConfig, PostgresStore};
pub use self::redis::RedisStore;
pub use traits::{RequestStore, StoreError};

use serde::Serialize;

/// Which of the two stores an operation targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Store {
    /// Relational store, written first
    #[serde(rename = "storeA")]
    A,
    /// Key-value store, written second
    #[serde(rename = "storeB")]
    B,
}

impl Store {
    pub fn name(&self) -> &'static str {
        match self {
            Store::A => "storeA",
            Store::B => "storeB",
        }
    }
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
