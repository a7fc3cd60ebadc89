use std::collections::HashMap;
use std::sync::Mutex;

use crate::foundation::error::CombMaskResult;
use crate::scratch::{ScratchAllocator, ScratchBuffer};

/// Pool configuration for retained scratch buffers.
#[derive(Debug, Clone, Copy)]
pub struct PoolOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained buffers per (size, align) bucket.
    pub max_buffers_per_bucket: usize,
}

impl Default for PoolOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 64 * 1024 * 1024,
            max_buffers_per_bucket: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BufferKey {
    size: usize,
    align: usize,
}

/// Counters reported by [`PooledAllocator::stats`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently held by the pool.
    pub retained_buffers: usize,
    /// Bytes currently held by the pool.
    pub retained_bytes: usize,
    /// Fresh allocations made because no retained buffer fitted.
    pub alloc_buffers: u64,
    /// Bytes of fresh allocations.
    pub alloc_bytes: u64,
    /// Requests served from a retained buffer.
    pub reused_buffers: u64,
    /// Buffers released but not retained because a cap was hit.
    pub dropped_on_free: u64,
}

#[derive(Default)]
struct PoolState {
    stats: PoolStats,
    buckets: HashMap<BufferKey, Vec<ScratchBuffer>>,
}

/// Bounded pooled allocator keyed by `(size, align)`.
///
/// Requests are made per filter call, never per pixel, so a mutex around the buckets is fine.
pub struct PooledAllocator {
    opts: PoolOpts,
    state: Mutex<PoolState>,
}

impl PooledAllocator {
    /// Empty pool bounded by `opts`.
    pub fn new(opts: PoolOpts) -> Self {
        Self {
            opts,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // Buckets hold plain bytes; a panic elsewhere cannot leave them inconsistent.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PooledAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledAllocator")
            .field("opts", &self.opts)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ScratchAllocator for PooledAllocator {
    fn allocate(&self, size: usize, align: usize) -> CombMaskResult<ScratchBuffer> {
        let key = BufferKey { size, align };
        {
            let mut state = self.lock();
            if let Some(mut buf) = state.buckets.get_mut(&key).and_then(Vec::pop) {
                state.stats.retained_buffers = state.stats.retained_buffers.saturating_sub(1);
                state.stats.retained_bytes = state.stats.retained_bytes.saturating_sub(size);
                state.stats.reused_buffers = state.stats.reused_buffers.saturating_add(1);
                drop(state);
                buf.as_mut_slice().fill(0);
                return Ok(buf);
            }
        }

        let buf = ScratchBuffer::zeroed(size, align)?;
        let mut state = self.lock();
        state.stats.alloc_buffers = state.stats.alloc_buffers.saturating_add(1);
        state.stats.alloc_bytes = state.stats.alloc_bytes.saturating_add(size as u64);
        tracing::debug!(size, align, "scratch pool miss");
        Ok(buf)
    }

    fn free(&self, buffer: ScratchBuffer) {
        let mut state = self.lock();
        if self.opts.max_pool_bytes == 0 || self.opts.max_buffers_per_bucket == 0 {
            state.stats.dropped_on_free = state.stats.dropped_on_free.saturating_add(1);
            return;
        }

        let key = BufferKey {
            size: buffer.len(),
            align: buffer.align(),
        };
        if state.stats.retained_bytes.saturating_add(key.size) > self.opts.max_pool_bytes {
            state.stats.dropped_on_free = state.stats.dropped_on_free.saturating_add(1);
            return;
        }

        let bucket = state.buckets.entry(key).or_default();
        if bucket.len() >= self.opts.max_buffers_per_bucket {
            state.stats.dropped_on_free = state.stats.dropped_on_free.saturating_add(1);
            return;
        }
        bucket.push(buffer);
        state.stats.retained_buffers = state.stats.retained_buffers.saturating_add(1);
        state.stats.retained_bytes = state.stats.retained_bytes.saturating_add(key.size);
    }
}
