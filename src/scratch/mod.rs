//! Aligned scratch memory for intermediate masks.

pub(crate) mod pool;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{CombMaskError, CombMaskResult};
use crate::plane::aligned::AlignedBytes;
use crate::plane::view::PlaneMut;

pub use pool::{PoolOpts, PoolStats, PooledAllocator};

/// Aligned, zero-initialised byte region handed out by a [`ScratchAllocator`].
#[derive(Debug)]
pub struct ScratchBuffer {
    bytes: AlignedBytes,
}

impl ScratchBuffer {
    /// Fresh zero-filled buffer; the building block for custom allocators.
    pub fn zeroed(size: usize, align: usize) -> CombMaskResult<Self> {
        Ok(Self {
            bytes: AlignedBytes::zeroed(size, align)?,
        })
    }

    /// Usable size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for a zero-sized buffer.
    pub fn is_empty(&self) -> bool {
        self.bytes.len() == 0
    }

    /// Alignment of the first byte.
    pub fn align(&self) -> usize {
        self.bytes.align()
    }

    /// The whole region.
    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// The whole region, writable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.bytes.as_mut_slice()
    }

    /// Carve `N` consecutive planes of `pitch * height` bytes each out of the buffer.
    pub(crate) fn planes_mut<const N: usize>(
        &mut self,
        width: usize,
        height: usize,
        pitch: usize,
    ) -> CombMaskResult<[PlaneMut<'_>; N]> {
        let slot = pitch
            .checked_mul(height)
            .ok_or_else(|| CombMaskError::allocation(usize::MAX, self.align()))?;
        let needed = slot
            .checked_mul(N)
            .ok_or_else(|| CombMaskError::allocation(usize::MAX, self.align()))?;
        if self.len() < needed {
            return Err(CombMaskError::precondition(format!(
                "scratch buffer of {} bytes cannot hold {N} planes of {slot} bytes",
                self.len()
            )));
        }

        let mut rest = &mut self.as_mut_slice()[..needed];
        let mut out = Vec::with_capacity(N);
        for _ in 0..N {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(slot);
            out.push(PlaneMut::new(head, width, height, pitch)?);
            rest = tail;
        }
        out.try_into()
            .map_err(|_| CombMaskError::precondition("scratch plane count mismatch"))
    }
}

/// Source of aligned scratch memory.
///
/// Filters call `allocate` once per buffer they need and hand every buffer back through
/// `free`, on success and failure paths alike.
pub trait ScratchAllocator: Send + Sync {
    /// Obtain `size` zeroed bytes whose first byte is aligned to `align` (a power of two).
    fn allocate(&self, size: usize, align: usize) -> CombMaskResult<ScratchBuffer>;

    /// Return a buffer obtained from `allocate`.
    fn free(&self, buffer: ScratchBuffer);
}

/// Allocates fresh memory on every request and releases it on `free`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl ScratchAllocator for HeapAllocator {
    fn allocate(&self, size: usize, align: usize) -> CombMaskResult<ScratchBuffer> {
        ScratchBuffer::zeroed(size, align)
    }

    fn free(&self, buffer: ScratchBuffer) {
        drop(buffer);
    }
}

/// Lifetime of a filter's scratch buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchMode {
    /// Allocated once at construction and reused by every call.
    ///
    /// A second call that overlaps one already in flight fails with a precondition error.
    Shared,
    /// Allocated at the start of each call and freed before it returns.
    #[default]
    PerCall,
}

/// Buffer on loan from an allocator, handed back when dropped.
pub(crate) struct ScratchLease<'a> {
    allocator: &'a dyn ScratchAllocator,
    buffer: Option<ScratchBuffer>,
}

impl<'a> ScratchLease<'a> {
    pub(crate) fn new(
        allocator: &'a dyn ScratchAllocator,
        size: usize,
        align: usize,
    ) -> CombMaskResult<Self> {
        let buffer = allocator.allocate(size, align)?;
        tracing::trace!(size, align, "scratch leased");
        Ok(Self {
            allocator,
            buffer: Some(buffer),
        })
    }

    pub(crate) fn buffer_mut(&mut self) -> CombMaskResult<&mut ScratchBuffer> {
        self.buffer
            .as_mut()
            .ok_or_else(|| CombMaskError::precondition("scratch lease already returned"))
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.allocator.free(buffer);
        }
    }
}
