//! Interlace comb detection and conditional masked merging for planar 8-bit video frames.
//!
//! The crate is a set of pull-based filters over a host-supplied [`FrameSource`]:
//!
//! - [`CombMaskFilter`] turns each frame into a binary mask of combed pixels, optionally
//!   gated by motion against the previous frame and dilated horizontally.
//! - [`MaskedMergeFilter`] classifies a mask frame block by block and, when it is combed,
//!   replaces the masked pixels of a base frame with those of an alternate frame.
//! - [`IsCombed`] answers the per-frame "is this frame combed" question for conditional hosts.
//!
//! Every pixel kernel has a scalar reference and x86_64 SSE2/AVX2 variants that produce
//! byte-identical output; the variant is picked once per filter (see [`SimdLevel`]).

#![deny(missing_docs)]

mod filter;
mod foundation;
mod host;
mod kernels;
mod plane;
mod scratch;

#[cfg(test)]
mod test_util;

pub use crate::filter::FrameSource;
pub use crate::filter::comb_mask::{CombMaskFilter, CombMaskOpts};
pub use crate::filter::is_combed::{EvalContext, IsCombed, IsCombedOpts};
pub use crate::filter::masked_merge::{MaskedMergeFilter, MaskedMergeOpts};
pub use crate::filter::source::ClipSource;
pub use crate::foundation::core::{FormatInfo, FrameIndex, PixelLayout, PlaneKind};
pub use crate::foundation::error::{CombMaskError, CombMaskResult};
pub use crate::host::{PullStats, PullThreading, pull_frames};
pub use crate::kernels::{BLOCK_SIZES, Kernels, Metric, SIMD_ENV_VAR, SimdLevel, SimdRequest};
pub use crate::plane::frame::{FRAME_ALIGN, Frame, Plane};
pub use crate::plane::view::{PlaneMut, PlaneRef};
pub use crate::scratch::{
    HeapAllocator, PoolOpts, PoolStats, PooledAllocator, ScratchAllocator, ScratchBuffer,
    ScratchMode,
};
