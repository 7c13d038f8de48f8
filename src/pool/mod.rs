//! Per-shard resource pools
//!
//! A `ShardPool<T>` owns exactly N backend handles, one per logical shard,
//! built once at startup and released once at shutdown. Lookups reduce any
//! shard key modulo N, so every key maps to a handle and the same key always
//! maps to the same handle.
//!
//! The handle array is populated before the pool is shared and never
//! mutated afterwards, so lookups take no lock at all. Only the closed flag
//! is written after construction.

use crate::core::ShardIndex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// A backend handle that can be held in a `ShardPool`
///
/// Handles must be usable from many tasks at once; pools never lock
/// around handle use.
pub trait ShardResource: Send + Sync {
    /// Release the backend resources held by this handle.
    ///
    /// Called at most once by the owning pool. Operations issued after
    /// release should fail fast rather than touch the backend.
    fn release(&self);
}

/// Pool construction and lookup errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("{pool} pool needs at least one shard")]
    Empty { pool: &'static str },

    #[error("failed to initialize {pool} handle for core {shard}: {reason}")]
    Initialization {
        pool: &'static str,
        shard: ShardIndex,
        reason: String,
    },

    #[error("{pool} pool is closed")]
    Closed { pool: &'static str },
}

/// Fixed-size, shard-indexed collection of live backend handles
///
/// # Example
/// ```
/// use shardcore::core::ShardIndex;
/// use shardcore::pool::{ShardPool, ShardResource};
///
/// struct Conn(usize);
///
/// impl ShardResource for Conn {
///     fn release(&self) {}
/// }
///
/// let pool = ShardPool::create("demo", 4, |shard| {
///     Ok::<_, String>(Conn(shard.as_usize()))
/// })
/// .unwrap();
///
/// // Keys outside the range wrap around
/// assert_eq!(pool.get(ShardIndex(6)).0, 2);
/// pool.close();
/// ```
pub struct ShardPool<T: ShardResource> {
    name: &'static str,
    handles: Box<[T]>,
    closed: AtomicBool,
}

impl<T: ShardResource> ShardPool<T> {
    /// Build `shards` handles with a synchronous factory
    ///
    /// If any factory call fails, every handle built so far is released
    /// before the error is returned.
    pub fn create<F, E>(name: &'static str, shards: usize, mut factory: F) -> Result<Self, PoolError>
    where
        F: FnMut(ShardIndex) -> Result<T, E>,
        E: fmt::Display,
    {
        if shards == 0 {
            return Err(PoolError::Empty { pool: name });
        }

        let mut handles = Vec::with_capacity(shards);
        for i in 0..shards {
            let shard = ShardIndex(i);
            match factory(shard) {
                Ok(handle) => handles.push(handle),
                Err(e) => return Err(abort_init(name, shard, e, handles)),
            }
        }

        Ok(Self::from_handles(name, handles))
    }

    /// Build `shards` handles with an async factory (network connects)
    ///
    /// Handles are connected one after another; the first failure releases
    /// everything already connected.
    pub async fn connect<F, Fut, E>(
        name: &'static str,
        shards: usize,
        mut factory: F,
    ) -> Result<Self, PoolError>
    where
        F: FnMut(ShardIndex) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if shards == 0 {
            return Err(PoolError::Empty { pool: name });
        }

        let mut handles = Vec::with_capacity(shards);
        for i in 0..shards {
            let shard = ShardIndex(i);
            match factory(shard).await {
                Ok(handle) => handles.push(handle),
                Err(e) => return Err(abort_init(name, shard, e, handles)),
            }
        }

        Ok(Self::from_handles(name, handles))
    }

    fn from_handles(name: &'static str, handles: Vec<T>) -> Self {
        tracing::info!(target: "pool", "{} pool ready with {} handles", name, handles.len());
        Self {
            name,
            handles: handles.into_boxed_slice(),
            closed: AtomicBool::new(false),
        }
    }

    /// Handle for `shard`, reduced modulo the pool size
    ///
    /// Never fails. After `close()` the returned handle is released and its
    /// operations fail fast; use `try_get` to detect that up front.
    #[inline]
    pub fn get(&self, shard: ShardIndex) -> &T {
        &self.handles[shard.reduce(self.handles.len()).as_usize()]
    }

    /// Like `get`, but refuses to hand out handles from a closed pool
    #[inline]
    pub fn try_get(&self, shard: ShardIndex) -> Result<&T, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed { pool: self.name });
        }
        Ok(self.get(shard))
    }

    /// Pool name (used in logs and errors)
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of shards (and handles)
    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Always false for a constructed pool
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Every shard index in `[0, len)`
    pub fn shards(&self) -> impl Iterator<Item = ShardIndex> {
        (0..self.handles.len()).map(ShardIndex)
    }

    /// Release all handles. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in self.handles.iter() {
            handle.release();
        }
        tracing::info!(target: "pool", "{} pool closed ({} handles released)", self.name, self.handles.len());
    }
}

impl<T: ShardResource> Drop for ShardPool<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: ShardResource> fmt::Debug for ShardPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardPool")
            .field("name", &self.name)
            .field("shards", &self.handles.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Release a partially built handle set and turn the failure into an error
fn abort_init<T: ShardResource, E: fmt::Display>(
    name: &'static str,
    shard: ShardIndex,
    err: E,
    built: Vec<T>,
) -> PoolError {
    tracing::error!(
        target: "pool",
        "{} handle for core {} failed: {} (releasing {} built handles)",
        name,
        shard,
        err,
        built.len()
    );
    for handle in built.iter().rev() {
        handle.release();
    }
    PoolError::Initialization {
        pool: name,
        shard,
        reason: err.to_string(),
    }
}
