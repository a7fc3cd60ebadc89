use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::filter::{FrameSource, parse_opts, require_planar};
use crate::foundation::core::{FormatInfo, FrameIndex, PlaneKind};
use crate::foundation::error::{CombMaskError, CombMaskResult};
use crate::kernels::{BLOCK_SIZES, Kernels, Metric, SimdRequest};
use crate::plane::frame::Frame;
use crate::scratch::{HeapAllocator, ScratchAllocator};

/// Options for [`MaskedMergeFilter`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaskedMergeOpts {
    /// Per-block pixel count above which a frame is combed, `0..=128`.
    ///
    /// `0` skips classification and always merges.
    pub mi: i32,
    /// Classifier block width (8, 16 or 32).
    pub block_width: usize,
    /// Classifier block height (8, 16 or 32).
    pub block_height: usize,
    /// Merge chroma too. When `false` the chroma planes are copied from the base clip.
    pub chroma: bool,
    /// Kernel level.
    pub simd: SimdRequest,
}

impl Default for MaskedMergeOpts {
    fn default() -> Self {
        Self {
            mi: 40,
            block_width: 8,
            block_height: 8,
            chroma: true,
            simd: SimdRequest::Auto,
        }
    }
}

impl MaskedMergeOpts {
    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> CombMaskResult<Self> {
        parse_opts("MaskedMerge", s)
    }

    /// Check `mi` and both block dimensions.
    pub fn validate(&self) -> CombMaskResult<()> {
        validate_mi(self.mi)?;
        validate_block("block_width", self.block_width)?;
        validate_block("block_height", self.block_height)
    }
}

pub(crate) fn validate_mi(mi: i32) -> CombMaskResult<()> {
    if !(0..=128).contains(&mi) {
        return Err(CombMaskError::configuration(format!(
            "mi must be between 0 and 128, got {mi}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_block(name: &str, v: usize) -> CombMaskResult<()> {
    if !BLOCK_SIZES.contains(&v) {
        return Err(CombMaskError::configuration(format!(
            "{name} must be set to 8, 16 or 32, got {v}"
        )));
    }
    Ok(())
}

/// Replaces the pixels a mask selects with those of an alternate clip, but only on frames
/// whose mask is classified as combed.
pub struct MaskedMergeFilter {
    base: Arc<dyn FrameSource>,
    alt: Arc<dyn FrameSource>,
    mask: Arc<dyn FrameSource>,
    format: FormatInfo,
    mi: u32,
    block_width: usize,
    block_height: usize,
    plane_count: usize,
    kernels: Kernels,
    allocator: Arc<dyn ScratchAllocator>,
}

impl MaskedMergeFilter {
    /// Merge `alt` into `base` where `mask` is set.
    pub fn new(
        base: Arc<dyn FrameSource>,
        alt: Arc<dyn FrameSource>,
        mask: Arc<dyn FrameSource>,
        opts: MaskedMergeOpts,
    ) -> CombMaskResult<Self> {
        Self::with_allocator(base, alt, mask, opts, Arc::new(HeapAllocator))
    }

    /// As [`MaskedMergeFilter::new`], drawing classifier scratch from `allocator`.
    pub fn with_allocator(
        base: Arc<dyn FrameSource>,
        alt: Arc<dyn FrameSource>,
        mask: Arc<dyn FrameSource>,
        opts: MaskedMergeOpts,
        allocator: Arc<dyn ScratchAllocator>,
    ) -> CombMaskResult<Self> {
        let format = base.format();
        require_planar("MaskedMerge", format)?;
        opts.validate()?;

        let (alt_fmt, mask_fmt) = (alt.format(), mask.format());
        if alt_fmt.layout != format.layout || mask_fmt.layout != format.layout {
            return Err(CombMaskError::configuration(format!(
                "unmatched colorspaces: base {:?}, alt {:?}, mask {:?}",
                format.layout, alt_fmt.layout, mask_fmt.layout
            )));
        }
        if !alt_fmt.matches(&format) || !mask_fmt.matches(&format) {
            return Err(CombMaskError::configuration(format!(
                "unmatched resolutions: base {}x{}, alt {}x{}, mask {}x{}",
                format.width,
                format.height,
                alt_fmt.width,
                alt_fmt.height,
                mask_fmt.width,
                mask_fmt.height
            )));
        }

        let kernels = Kernels::for_level(opts.simd.resolve()?, Metric::Zero)?;
        let plane_count = if opts.chroma { format.plane_count() } else { 1 };
        tracing::debug!(
            level = ?kernels.level(),
            mi = opts.mi,
            block_width = opts.block_width,
            block_height = opts.block_height,
            plane_count,
            "MaskedMerge configured"
        );

        Ok(Self {
            base,
            alt,
            mask,
            format,
            mi: opts.mi as u32,
            block_width: opts.block_width,
            block_height: opts.block_height,
            plane_count,
            kernels,
            allocator,
        })
    }

    /// Classifier decision for an already fetched mask frame.
    pub fn is_combed(&self, mask: &Frame) -> CombMaskResult<bool> {
        self.kernels.is_combed(
            mask.plane(PlaneKind::Y)?,
            self.mi,
            self.block_width,
            self.block_height,
            &*self.allocator,
        )
    }
}

impl FrameSource for MaskedMergeFilter {
    fn format(&self) -> FormatInfo {
        self.format
    }

    #[tracing::instrument(skip_all, fields(n = n.0))]
    fn get_frame(&self, n: FrameIndex) -> CombMaskResult<Arc<Frame>> {
        let src = self.base.get_frame(n)?;
        let mask = self.mask.get_frame(n)?;
        if self.mi > 0 && !self.is_combed(&mask)? {
            tracing::debug!("not combed, passing base frame through");
            return Ok(src);
        }

        let alt = self.alt.get_frame(n)?;
        let mut dst = Frame::new_blank(self.format, self.kernels.level().alignment())?;
        for (i, &kind) in self.format.planes().iter().enumerate() {
            let mut d = dst.plane_mut(kind)?;
            if i < self.plane_count {
                self.kernels
                    .merge(&mut d, src.plane(kind)?, alt.plane(kind)?, mask.plane(kind)?)?;
            } else {
                d.copy_from(src.plane(kind)?)?;
            }
        }
        Ok(Arc::new(dst))
    }
}

impl std::fmt::Debug for MaskedMergeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskedMergeFilter")
            .field("format", &self.format)
            .field("mi", &self.mi)
            .field("block_width", &self.block_width)
            .field("block_height", &self.block_height)
            .field("plane_count", &self.plane_count)
            .field("kernels", &self.kernels)
            .finish_non_exhaustive()
    }
}
