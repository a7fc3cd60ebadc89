use std::sync::{Arc, Mutex, TryLockError};

use serde::{Deserialize, Serialize};

use crate::filter::{FrameSource, parse_opts, require_planar};
use crate::foundation::core::{FormatInfo, FrameIndex};
use crate::foundation::error::{CombMaskError, CombMaskResult};
use crate::foundation::math::align_up;
use crate::kernels::{Kernels, Metric, SimdRequest};
use crate::plane::frame::Frame;
use crate::scratch::{HeapAllocator, ScratchAllocator, ScratchBuffer, ScratchLease, ScratchMode};

/// Options for [`CombMaskFilter`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CombMaskOpts {
    /// Comb threshold; `None` picks the metric's default (6 or 10).
    pub cthresh: Option<i32>,
    /// Motion threshold in `0..=255`; `0` disables motion gating.
    pub mthresh: i32,
    /// Process chroma planes too. When `false` the output chroma planes are all `0x00`.
    pub chroma: bool,
    /// Dilate the final mask horizontally by one pixel each side.
    pub expand: bool,
    /// Comb detection formula.
    pub metric: Metric,
    /// Kernel level.
    pub simd: SimdRequest,
    /// Scratch buffer lifetime.
    pub scratch: ScratchMode,
}

impl Default for CombMaskOpts {
    fn default() -> Self {
        Self {
            cthresh: None,
            mthresh: 9,
            chroma: true,
            expand: true,
            metric: Metric::Zero,
            simd: SimdRequest::Auto,
            scratch: ScratchMode::PerCall,
        }
    }
}

impl CombMaskOpts {
    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> CombMaskResult<Self> {
        parse_opts("CombMask", s)
    }

    /// The comb threshold in effect.
    pub fn effective_cthresh(&self) -> i32 {
        self.cthresh.unwrap_or_else(|| self.metric.default_cthresh())
    }

    /// Check every threshold against its allowed range.
    pub fn validate(&self) -> CombMaskResult<()> {
        let cthresh = self.effective_cthresh();
        let max = self.metric.max_cthresh();
        if !(0..=max).contains(&cthresh) {
            return Err(CombMaskError::configuration(format!(
                "cthresh must be between 0 and {max} on metric {}, got {cthresh}",
                u8::from(self.metric)
            )));
        }
        if !(0..=255).contains(&self.mthresh) {
            return Err(CombMaskError::configuration(format!(
                "mthresh must be between 0 and 255, got {}",
                self.mthresh
            )));
        }
        Ok(())
    }
}

enum Scratch {
    /// No intermediate planes needed.
    Unused,
    PerCall,
    Shared(Mutex<Option<ScratchBuffer>>),
}

/// Per-frame comb mask, optionally gated by motion against the previous frame.
///
/// Output frames have the source layout; every sample is `0x00` or `0xFF`.
pub struct CombMaskFilter {
    source: Arc<dyn FrameSource>,
    format: FormatInfo,
    cthresh: i32,
    mthresh: u8,
    expand: bool,
    plane_count: usize,
    kernels: Kernels,
    allocator: Arc<dyn ScratchAllocator>,
    scratch: Scratch,
    scratch_pitch: usize,
    scratch_len: usize,
}

impl CombMaskFilter {
    /// Filter over `source` using heap scratch memory.
    pub fn new(source: Arc<dyn FrameSource>, opts: CombMaskOpts) -> CombMaskResult<Self> {
        Self::with_allocator(source, opts, Arc::new(HeapAllocator))
    }

    /// Filter over `source` drawing scratch memory from `allocator`.
    pub fn with_allocator(
        source: Arc<dyn FrameSource>,
        opts: CombMaskOpts,
        allocator: Arc<dyn ScratchAllocator>,
    ) -> CombMaskResult<Self> {
        let format = source.format();
        require_planar("CombMask", format)?;
        opts.validate()?;
        let level = opts.simd.resolve()?;
        let kernels = Kernels::for_level(level, opts.metric)?;

        let mthresh = opts.mthresh as u8;
        let need_scratch = mthresh > 0 || opts.expand;
        let slots = if mthresh > 0 { 2 } else { 1 };
        let (luma_w, luma_h) = (format.width as usize, format.height as usize);
        let align = level.alignment();
        let scratch_pitch =
            align_up(luma_w, align).ok_or_else(|| CombMaskError::allocation(luma_w, align))?;
        let scratch_len = scratch_pitch
            .checked_mul(luma_h)
            .and_then(|v| v.checked_mul(slots))
            .ok_or_else(|| CombMaskError::allocation(usize::MAX, align))?;

        let scratch = match (need_scratch, opts.scratch) {
            (false, _) => Scratch::Unused,
            (true, ScratchMode::PerCall) => Scratch::PerCall,
            (true, ScratchMode::Shared) => {
                let buf = allocator.allocate(scratch_len, align)?;
                Scratch::Shared(Mutex::new(Some(buf)))
            }
        };

        let plane_count = if opts.chroma { format.plane_count() } else { 1 };
        tracing::debug!(
            ?level,
            metric = ?opts.metric,
            cthresh = opts.effective_cthresh(),
            mthresh,
            expand = opts.expand,
            plane_count,
            scratch_len,
            "CombMask configured"
        );

        Ok(Self {
            source,
            format,
            cthresh: opts.effective_cthresh(),
            mthresh,
            expand: opts.expand,
            plane_count,
            kernels,
            allocator,
            scratch,
            scratch_pitch,
            scratch_len,
        })
    }

    /// Kernel table in use.
    pub fn kernels(&self) -> Kernels {
        self.kernels
    }

    fn render(
        &self,
        src: &Frame,
        prev: Option<&Frame>,
        dst: &mut Frame,
        mut scratch: Option<&mut ScratchBuffer>,
    ) -> CombMaskResult<()> {
        let k = &self.kernels;
        for &kind in &self.format.planes()[..self.plane_count] {
            let s = src.plane(kind)?;
            let mut d = dst.plane_mut(kind)?;

            let Some(buf) = scratch.as_deref_mut() else {
                k.comb(&mut d, s, self.cthresh)?;
                continue;
            };
            let (w, h) = (s.width(), s.height());

            let Some(prev) = prev else {
                let [mut comb] = buf.planes_mut::<1>(w, h, self.scratch_pitch)?;
                k.comb(&mut comb, s, self.cthresh)?;
                k.expand(&mut d, comb.view())?;
                continue;
            };

            let [mut comb, mut tmp] = buf.planes_mut::<2>(w, h, self.scratch_pitch)?;
            k.comb(&mut comb, s, self.cthresh)?;
            k.motion(&mut tmp, &mut d, s, prev.plane(kind)?, self.mthresh)?;
            if self.expand {
                k.and(&mut comb, d.view())?;
                k.expand(&mut d, comb.view())?;
            } else {
                k.and(&mut d, comb.view())?;
            }
        }
        Ok(())
    }
}

impl FrameSource for CombMaskFilter {
    fn format(&self) -> FormatInfo {
        self.format
    }

    #[tracing::instrument(skip_all, fields(n = n.0))]
    fn get_frame(&self, n: FrameIndex) -> CombMaskResult<Arc<Frame>> {
        let src = self.source.get_frame(n)?;
        let prev = if self.mthresh > 0 {
            Some(self.source.get_frame(n.prev_clamped())?)
        } else {
            None
        };
        let mut dst = Frame::new_blank(self.format, self.kernels.level().alignment())?;

        match &self.scratch {
            Scratch::Unused => self.render(&src, None, &mut dst, None)?,
            Scratch::PerCall => {
                let mut lease = ScratchLease::new(
                    &*self.allocator,
                    self.scratch_len,
                    self.kernels.level().alignment(),
                )?;
                self.render(&src, prev.as_deref(), &mut dst, Some(lease.buffer_mut()?))?;
            }
            Scratch::Shared(slot) => {
                let mut guard = match slot.try_lock() {
                    Ok(g) => g,
                    Err(TryLockError::WouldBlock) => {
                        return Err(CombMaskError::precondition(
                            "CombMask shared scratch buffer is already in use; \
                             concurrent hosts need ScratchMode::PerCall",
                        ));
                    }
                    // Scratch contents are rewritten by every call.
                    Err(TryLockError::Poisoned(p)) => p.into_inner(),
                };
                let buf = guard
                    .as_mut()
                    .ok_or_else(|| CombMaskError::precondition("shared scratch buffer released"))?;
                self.render(&src, prev.as_deref(), &mut dst, Some(buf))?;
            }
        }
        Ok(Arc::new(dst))
    }
}

impl Drop for CombMaskFilter {
    fn drop(&mut self) {
        if let Scratch::Shared(slot) = &mut self.scratch {
            let buf = slot
                .get_mut()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            if let Some(buf) = buf {
                self.allocator.free(buf);
            }
        }
    }
}

impl std::fmt::Debug for CombMaskFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombMaskFilter")
            .field("format", &self.format)
            .field("cthresh", &self.cthresh)
            .field("mthresh", &self.mthresh)
            .field("expand", &self.expand)
            .field("plane_count", &self.plane_count)
            .field("kernels", &self.kernels)
            .finish_non_exhaustive()
    }
}
