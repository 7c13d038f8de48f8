//! Per-core sharded backend pools
//!
//! Fixed-size pools of backend handles indexed by logical shard, and a
//! recorder that writes each request to two independent stores and reads
//! them back with partial-failure reporting.

pub mod core;
pub mod infrastructure;
pub mod pool;
pub mod recorder;
pub mod rest;
pub mod stores;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use crate::core::{ShardIndex, ShardResolver};
pub use infrastructure::config::Config;
pub use pool::{PoolError, ShardPool, ShardResource};
pub use recorder::DualStoreRecorder;

use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] infrastructure::config::ConfigError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Store error: {0}")]
    Store(#[from] stores::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
