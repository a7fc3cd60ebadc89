//! Pixel kernels and their dispatch table.
//!
//! Every kernel has a scalar reference and, on x86_64, SSE2 and AVX2 variants that produce
//! byte-identical output. A [`Kernels`] table is chosen once per filter from a
//! [`SimdLevel`] and a [`Metric`].

pub(crate) mod classify;
pub(crate) mod comb;
pub(crate) mod combine;
pub(crate) mod cpu;
pub(crate) mod merge;
pub(crate) mod motion;

use crate::foundation::error::{CombMaskError, CombMaskResult};
use crate::plane::view::{PlaneMut, PlaneRef, ensure_same_size};
use crate::scratch::ScratchAllocator;

pub use comb::Metric;
pub use cpu::{SIMD_ENV_VAR, SimdLevel, SimdRequest};

/// Block dimensions accepted by the classifier.
pub const BLOCK_SIZES: [usize; 3] = [8, 16, 32];

type CombFn = fn(&mut PlaneMut<'_>, PlaneRef<'_>, i32);
type MotionFn = fn(&mut PlaneMut<'_>, &mut PlaneMut<'_>, PlaneRef<'_>, PlaneRef<'_>, u8);
type BinaryFn = fn(&mut PlaneMut<'_>, PlaneRef<'_>);
type MergeFn = fn(&mut PlaneMut<'_>, PlaneRef<'_>, PlaneRef<'_>, PlaneRef<'_>);
type ClassifyFn =
    fn(PlaneRef<'_>, u32, usize, usize, &dyn ScratchAllocator) -> CombMaskResult<bool>;

/// Kernel implementations for one [`SimdLevel`] and [`Metric`].
///
/// All entry points check plane sizes and write every visible sample of their output.
#[derive(Clone, Copy)]
pub struct Kernels {
    level: SimdLevel,
    metric: Metric,
    comb: CombFn,
    motion: MotionFn,
    and: BinaryFn,
    expand: BinaryFn,
    merge: MergeFn,
    classify: ClassifyFn,
}

impl Kernels {
    /// Table for `level`, failing if this CPU cannot run it.
    pub fn for_level(level: SimdLevel, metric: Metric) -> CombMaskResult<Self> {
        let table = match level {
            SimdLevel::Scalar => Self::scalar(metric),
            #[cfg(target_arch = "x86_64")]
            SimdLevel::Vector128 => Self::sse2(metric),
            #[cfg(target_arch = "x86_64")]
            SimdLevel::Vector256 if level.is_supported() => Self::avx2(metric),
            _ => {
                return Err(CombMaskError::precondition(format!(
                    "{level:?} kernels are not supported on this CPU"
                )));
            }
        };
        tracing::debug!(?level, ?metric, "kernel table selected");
        Ok(table)
    }

    fn scalar(metric: Metric) -> Self {
        Self {
            level: SimdLevel::Scalar,
            metric,
            comb: match metric {
                Metric::Zero => comb::metric0_scalar,
                Metric::One => comb::metric1_scalar,
            },
            motion: motion::motion_scalar,
            and: combine::and_scalar,
            expand: combine::expand_scalar,
            merge: merge::merge_scalar,
            classify: classify::classify_scalar,
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn sse2(metric: Metric) -> Self {
        Self {
            level: SimdLevel::Vector128,
            metric,
            comb: match metric {
                Metric::Zero => comb::metric0_sse2,
                Metric::One => comb::metric1_sse2,
            },
            motion: motion::motion_sse2,
            and: combine::and_sse2,
            expand: combine::expand_sse2,
            merge: merge::merge_sse2,
            classify: classify::classify_sse2,
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn avx2(metric: Metric) -> Self {
        Self {
            level: SimdLevel::Vector256,
            metric,
            comb: match metric {
                Metric::Zero => comb::metric0_avx2,
                Metric::One => comb::metric1_avx2,
            },
            motion: motion::motion_avx2,
            and: combine::and_avx2,
            expand: combine::expand_avx2,
            merge: merge::merge_avx2,
            classify: classify::classify_avx2,
        }
    }

    /// Level the table was built for.
    pub fn level(&self) -> SimdLevel {
        self.level
    }

    /// Comb formula used by [`Kernels::comb`].
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Comb mask of `src` into `dst`: `0xFF` where the pixel is combed, `0x00` elsewhere.
    pub fn comb(
        &self,
        dst: &mut PlaneMut<'_>,
        src: PlaneRef<'_>,
        cthresh: i32,
    ) -> CombMaskResult<()> {
        ensure_same_size("comb", dims_mut(dst), dims(src))?;
        if !(0..=self.metric.max_cthresh()).contains(&cthresh) {
            return Err(CombMaskError::precondition(format!(
                "cthresh {cthresh} is outside 0..={} for {:?}",
                self.metric.max_cthresh(),
                self.metric
            )));
        }
        if !is_empty(src) {
            (self.comb)(dst, src, cthresh);
        }
        Ok(())
    }

    /// Motion mask of `src` against `prev`, vertically dilated by one row.
    ///
    /// `tmp` receives the undilated mask.
    pub fn motion(
        &self,
        tmp: &mut PlaneMut<'_>,
        dst: &mut PlaneMut<'_>,
        src: PlaneRef<'_>,
        prev: PlaneRef<'_>,
        mthresh: u8,
    ) -> CombMaskResult<()> {
        ensure_same_size("motion", dims(src), dims(prev))?;
        ensure_same_size("motion", dims(src), dims_mut(tmp))?;
        ensure_same_size("motion", dims(src), dims_mut(dst))?;
        if !is_empty(src) {
            (self.motion)(tmp, dst, src, prev, mthresh);
        }
        Ok(())
    }

    /// `dst &= alt`.
    pub fn and(&self, dst: &mut PlaneMut<'_>, alt: PlaneRef<'_>) -> CombMaskResult<()> {
        ensure_same_size("and", dims_mut(dst), dims(alt))?;
        if !is_empty(alt) {
            (self.and)(dst, alt);
        }
        Ok(())
    }

    /// Horizontal 3-pixel OR dilation of `src` into `dst`.
    pub fn expand(&self, dst: &mut PlaneMut<'_>, src: PlaneRef<'_>) -> CombMaskResult<()> {
        ensure_same_size("expand", dims_mut(dst), dims(src))?;
        if !is_empty(src) {
            (self.expand)(dst, src);
        }
        Ok(())
    }

    /// `dst = (src & !mask) | (alt & mask)`.
    pub fn merge(
        &self,
        dst: &mut PlaneMut<'_>,
        src: PlaneRef<'_>,
        alt: PlaneRef<'_>,
        mask: PlaneRef<'_>,
    ) -> CombMaskResult<()> {
        ensure_same_size("merge", dims_mut(dst), dims(src))?;
        ensure_same_size("merge", dims(src), dims(alt))?;
        ensure_same_size("merge", dims(src), dims(mask))?;
        if !is_empty(src) {
            (self.merge)(dst, src, alt, mask);
        }
        Ok(())
    }

    /// `true` if any full block of `mask` holds more than `mi` set pixels.
    pub fn is_combed(
        &self,
        mask: PlaneRef<'_>,
        mi: u32,
        block_width: usize,
        block_height: usize,
        allocator: &dyn ScratchAllocator,
    ) -> CombMaskResult<bool> {
        ensure_block_size("block width", block_width)?;
        ensure_block_size("block height", block_height)?;
        (self.classify)(mask, mi, block_width, block_height, allocator)
    }
}

impl std::fmt::Debug for Kernels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernels")
            .field("level", &self.level)
            .field("metric", &self.metric)
            .finish_non_exhaustive()
    }
}

pub(crate) fn ensure_block_size(what: &str, v: usize) -> CombMaskResult<()> {
    if !BLOCK_SIZES.contains(&v) {
        return Err(CombMaskError::precondition(format!(
            "{what} must be 8, 16 or 32, got {v}"
        )));
    }
    Ok(())
}

fn dims(p: PlaneRef<'_>) -> (usize, usize) {
    (p.width(), p.height())
}

fn dims_mut(p: &PlaneMut<'_>) -> (usize, usize) {
    (p.width(), p.height())
}

fn is_empty(p: PlaneRef<'_>) -> bool {
    p.width() == 0 || p.height() == 0
}
