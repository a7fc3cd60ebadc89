use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::filter::comb_mask::{CombMaskFilter, CombMaskOpts};
use crate::filter::masked_merge::{validate_block, validate_mi};
use crate::filter::{FrameSource, parse_opts};
use crate::foundation::core::{FrameIndex, PlaneKind};
use crate::foundation::error::{CombMaskError, CombMaskResult};
use crate::kernels::{Metric, SimdRequest};
use crate::scratch::{HeapAllocator, ScratchAllocator, ScratchMode};

/// Options for [`IsCombed`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsCombedOpts {
    /// Comb threshold; `None` picks the metric's default.
    pub cthresh: Option<i32>,
    /// Motion threshold; `0` disables motion gating.
    pub mthresh: i32,
    /// Per-block pixel count above which the frame is combed, `0..=128`.
    pub mi: i32,
    /// Classifier block width (8, 16 or 32).
    pub block_width: usize,
    /// Classifier block height (8, 16 or 32).
    pub block_height: usize,
    /// Comb detection formula.
    pub metric: Metric,
    /// Kernel level.
    pub simd: SimdRequest,
}

impl Default for IsCombedOpts {
    fn default() -> Self {
        Self {
            cthresh: None,
            mthresh: 9,
            mi: 80,
            block_width: 16,
            block_height: 16,
            metric: Metric::Zero,
            simd: SimdRequest::Auto,
        }
    }
}

impl IsCombedOpts {
    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> CombMaskResult<Self> {
        parse_opts("IsCombed", s)
    }
}

/// Evaluation context supplied by a conditional host: which frame is being rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvalContext {
    /// Frame under evaluation; `None` outside a per-frame evaluation.
    pub current_frame: Option<FrameIndex>,
}

impl EvalContext {
    /// Context evaluating frame `n`.
    pub fn at(n: FrameIndex) -> Self {
        Self {
            current_frame: Some(n),
        }
    }
}

/// Per-frame combing decision over a source clip.
///
/// Computes a luma-only, unexpanded comb mask and classifies it. Unlike
/// [`MaskedMergeFilter`](crate::MaskedMergeFilter), `mi == 0` is an ordinary threshold here:
/// a single set pixel marks the frame as combed.
pub struct IsCombed {
    mask: CombMaskFilter,
    mi: u32,
    block_width: usize,
    block_height: usize,
    allocator: Arc<dyn ScratchAllocator>,
}

impl IsCombed {
    /// Evaluator over `source`. Thresholds and block sizes are validated here.
    pub fn new(source: Arc<dyn FrameSource>, opts: IsCombedOpts) -> CombMaskResult<Self> {
        validate_mi(opts.mi)?;
        validate_block("block_width", opts.block_width)?;
        validate_block("block_height", opts.block_height)?;

        let allocator: Arc<dyn ScratchAllocator> = Arc::new(HeapAllocator);
        let mask = CombMaskFilter::with_allocator(
            source,
            CombMaskOpts {
                cthresh: opts.cthresh,
                mthresh: opts.mthresh,
                chroma: false,
                expand: false,
                metric: opts.metric,
                simd: opts.simd,
                scratch: ScratchMode::PerCall,
            },
            allocator.clone(),
        )?;
        Ok(Self {
            mask,
            mi: opts.mi as u32,
            block_width: opts.block_width,
            block_height: opts.block_height,
            allocator,
        })
    }

    /// Decision for the context's current frame.
    pub fn evaluate(&self, ctx: &EvalContext) -> CombMaskResult<bool> {
        let n = ctx.current_frame.ok_or_else(|| {
            CombMaskError::precondition("IsCombed can only be evaluated for a current frame")
        })?;
        self.frame_is_combed(n)
    }

    #[tracing::instrument(skip_all, fields(n = n.0))]
    fn frame_is_combed(&self, n: FrameIndex) -> CombMaskResult<bool> {
        let mask = self.mask.get_frame(n)?;
        let combed = self.mask.kernels().is_combed(
            mask.plane(PlaneKind::Y)?,
            self.mi,
            self.block_width,
            self.block_height,
            &*self.allocator,
        )?;
        tracing::debug!(combed);
        Ok(combed)
    }
}

impl std::fmt::Debug for IsCombed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsCombed")
            .field("mask", &self.mask)
            .field("mi", &self.mi)
            .field("block_width", &self.block_width)
            .field("block_height", &self.block_height)
            .finish_non_exhaustive()
    }
}
