//! Core types shared by pools, stores and the recorder
//!
//! - ShardIndex / ShardResolver: logical shard keys
//! - RequestRecord / CombinedView: what gets written and read back

pub mod record;
pub mod shard;

pub use record::{CombinedView, RequestId, RequestRecord, ShardRequests};
pub use shard::{default_shard_count, ShardIndex, ShardResolver};
