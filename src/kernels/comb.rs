//! Per-pixel interlace comb detection.
//!
//! Both metrics look at a vertical window centred on the output pixel. Rows outside the
//! plane are reflected about the first/last row (see [`mirror_row`]).

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use serde::{Deserialize, Serialize};

use crate::foundation::error::CombMaskError;
use crate::foundation::math::mirror_row;
use crate::plane::view::{PlaneMut, PlaneRef};

/// Comb detection formula.
///
/// Serialized as the plugin's integer `metric` argument.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Metric {
    /// Five-tap detector: `c` must stand out from both vertical neighbours by more than
    /// `cthresh` and the 5-tap high-pass response must exceed `6 * cthresh`.
    #[default]
    Zero,
    /// Product detector: `(b - c) * (d - c) > cthresh`.
    One,
}

impl Metric {
    /// `cthresh` used when none is configured.
    pub fn default_cthresh(self) -> i32 {
        match self {
            Metric::Zero => 6,
            Metric::One => 10,
        }
    }

    /// Largest accepted `cthresh`.
    pub fn max_cthresh(self) -> i32 {
        match self {
            Metric::Zero => 255,
            Metric::One => 65025,
        }
    }
}

impl TryFrom<u8> for Metric {
    type Error = CombMaskError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Metric::Zero),
            1 => Ok(Metric::One),
            other => Err(CombMaskError::configuration(format!(
                "metric must be 0 or 1, got {other}"
            ))),
        }
    }
}

impl From<Metric> for u8 {
    fn from(m: Metric) -> Self {
        match m {
            Metric::Zero => 0,
            Metric::One => 1,
        }
    }
}

/// The five rows `y-2 ..= y+2` around an output row.
#[derive(Clone, Copy)]
struct Taps<'a> {
    a: &'a [u8],
    b: &'a [u8],
    c: &'a [u8],
    d: &'a [u8],
    e: &'a [u8],
}

impl<'a> Taps<'a> {
    fn at(src: PlaneRef<'a>, y: usize) -> Self {
        let h = src.height();
        let y = y as isize;
        Self {
            a: src.row(mirror_row(y - 2, h)),
            b: src.row(mirror_row(y - 1, h)),
            c: src.row(y as usize),
            d: src.row(mirror_row(y + 1, h)),
            e: src.row(mirror_row(y + 2, h)),
        }
    }

    fn skip(self, x: usize) -> Self {
        Self {
            a: &self.a[x..],
            b: &self.b[x..],
            c: &self.c[x..],
            d: &self.d[x..],
            e: &self.e[x..],
        }
    }
}

fn for_each_row(
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    mut row_fn: impl FnMut(Taps<'_>, &mut [u8]),
) {
    for y in 0..src.height() {
        row_fn(Taps::at(src, y), dst.row_mut(y));
    }
}

#[inline(always)]
fn metric0_row(t: Taps<'_>, dst: &mut [u8], cthresh: i32) {
    let cth6 = cthresh * 6;
    for (x, out) in dst.iter_mut().enumerate() {
        let (a, b, c, d, e) = (
            i32::from(t.a[x]),
            i32::from(t.b[x]),
            i32::from(t.c[x]),
            i32::from(t.d[x]),
            i32::from(t.e[x]),
        );
        let d1 = c - b;
        let d2 = c - d;
        let extremum = (d1 > cthresh && d2 > cthresh) || (d1 < -cthresh && d2 < -cthresh);
        *out = if extremum && (a + 4 * c + e - 3 * (b + d)).abs() > cth6 {
            0xFF
        } else {
            0
        };
    }
}

#[inline(always)]
fn metric1_row(t: Taps<'_>, dst: &mut [u8], cthresh: i32) {
    for (x, out) in dst.iter_mut().enumerate() {
        let c = i32::from(t.c[x]);
        let val = (i32::from(t.b[x]) - c) * (i32::from(t.d[x]) - c);
        *out = if val > cthresh { 0xFF } else { 0 };
    }
}

pub(super) fn metric0_scalar(dst: &mut PlaneMut<'_>, src: PlaneRef<'_>, cthresh: i32) {
    for_each_row(dst, src, |t, row| metric0_row(t, row, cthresh));
}

pub(super) fn metric1_scalar(dst: &mut PlaneMut<'_>, src: PlaneRef<'_>, cthresh: i32) {
    for_each_row(dst, src, |t, row| metric1_row(t, row, cthresh));
}

#[cfg(target_arch = "x86_64")]
pub(super) fn metric0_sse2(dst: &mut PlaneMut<'_>, src: PlaneRef<'_>, cthresh: i32) {
    // SAFETY: SSE2 is part of the x86_64 baseline.
    for_each_row(dst, src, |t, row| unsafe { metric0_row_sse2(t, row, cthresh) });
}

#[cfg(target_arch = "x86_64")]
pub(super) fn metric1_sse2(dst: &mut PlaneMut<'_>, src: PlaneRef<'_>, cthresh: i32) {
    // SAFETY: SSE2 is part of the x86_64 baseline.
    for_each_row(dst, src, |t, row| unsafe { metric1_row_sse2(t, row, cthresh) });
}

#[cfg(target_arch = "x86_64")]
pub(super) fn metric0_avx2(dst: &mut PlaneMut<'_>, src: PlaneRef<'_>, cthresh: i32) {
    // SAFETY: only installed by `Kernels::for_level` after AVX2 was detected.
    for_each_row(dst, src, |t, row| unsafe { metric0_row_avx2(t, row, cthresh) });
}

#[cfg(target_arch = "x86_64")]
pub(super) fn metric1_avx2(dst: &mut PlaneMut<'_>, src: PlaneRef<'_>, cthresh: i32) {
    // SAFETY: only installed by `Kernels::for_level` after AVX2 was detected.
    for_each_row(dst, src, |t, row| unsafe { metric1_row_avx2(t, row, cthresh) });
}

/// Eight samples widened to 16-bit lanes.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
#[inline]
unsafe fn widen8(row: &[u8], x: usize) -> __m128i {
    debug_assert!(x + 8 <= row.len());
    unsafe {
        _mm_unpacklo_epi8(
            _mm_loadl_epi64(row.as_ptr().add(x) as *const __m128i),
            _mm_setzero_si128(),
        )
    }
}

/// Sixteen samples widened to 16-bit lanes.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn widen16(row: &[u8], x: usize) -> __m256i {
    debug_assert!(x + 16 <= row.len());
    unsafe { _mm256_cvtepu8_epi16(_mm_loadu_si128(row.as_ptr().add(x) as *const __m128i)) }
}

/// Narrow sixteen 0/-1 lanes to bytes, keeping lane order.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn store_narrow16(dst: &mut [u8], x: usize, v: __m256i) {
    debug_assert!(x + 16 <= dst.len());
    unsafe {
        let lo = _mm256_castsi256_si128(v);
        let hi = _mm256_extracti128_si256::<1>(v);
        _mm_storeu_si128(
            dst.as_mut_ptr().add(x) as *mut __m128i,
            _mm_packs_epi16(lo, hi),
        );
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn metric0_row_sse2(t: Taps<'_>, dst: &mut [u8], cthresh: i32) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        let cthp = _mm_set1_epi16(cthresh as i16);
        let cthn = _mm_set1_epi16(-cthresh as i16);
        let cth6 = _mm_set1_epi16((cthresh * 6) as i16);
        let three = _mm_set1_epi16(3);

        while x + 8 <= width {
            let b = widen8(t.b, x);
            let c = widen8(t.c, x);
            let d = widen8(t.d, x);
            let d1 = _mm_sub_epi16(c, b);
            let d2 = _mm_sub_epi16(c, d);
            let extremum = _mm_or_si128(
                _mm_and_si128(_mm_cmpgt_epi16(d1, cthp), _mm_cmpgt_epi16(d2, cthp)),
                _mm_and_si128(_mm_cmpgt_epi16(cthn, d1), _mm_cmpgt_epi16(cthn, d2)),
            );
            let f0 = _mm_add_epi16(
                _mm_add_epi16(widen8(t.a, x), widen8(t.e, x)),
                _mm_slli_epi16::<2>(c),
            );
            let f1 = _mm_mullo_epi16(_mm_add_epi16(b, d), three);
            let diff = _mm_max_epi16(_mm_sub_epi16(f0, f1), _mm_sub_epi16(f1, f0));
            let mask = _mm_and_si128(extremum, _mm_cmpgt_epi16(diff, cth6));
            _mm_storel_epi64(
                dst.as_mut_ptr().add(x) as *mut __m128i,
                _mm_packs_epi16(mask, mask),
            );
            x += 8;
        }
    }
    if x < width {
        metric0_row(t.skip(x), &mut dst[x..], cthresh);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn metric0_row_avx2(t: Taps<'_>, dst: &mut [u8], cthresh: i32) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        let cthp = _mm256_set1_epi16(cthresh as i16);
        let cthn = _mm256_set1_epi16(-cthresh as i16);
        let cth6 = _mm256_set1_epi16((cthresh * 6) as i16);
        let three = _mm256_set1_epi16(3);

        while x + 16 <= width {
            let b = widen16(t.b, x);
            let c = widen16(t.c, x);
            let d = widen16(t.d, x);
            let d1 = _mm256_sub_epi16(c, b);
            let d2 = _mm256_sub_epi16(c, d);
            let extremum = _mm256_or_si256(
                _mm256_and_si256(_mm256_cmpgt_epi16(d1, cthp), _mm256_cmpgt_epi16(d2, cthp)),
                _mm256_and_si256(_mm256_cmpgt_epi16(cthn, d1), _mm256_cmpgt_epi16(cthn, d2)),
            );
            let f0 = _mm256_add_epi16(
                _mm256_add_epi16(widen16(t.a, x), widen16(t.e, x)),
                _mm256_slli_epi16::<2>(c),
            );
            let f1 = _mm256_mullo_epi16(_mm256_add_epi16(b, d), three);
            let diff = _mm256_abs_epi16(_mm256_sub_epi16(f0, f1));
            let mask = _mm256_and_si256(extremum, _mm256_cmpgt_epi16(diff, cth6));
            store_narrow16(dst, x, mask);
            x += 16;
        }
    }
    if x < width {
        metric0_row(t.skip(x), &mut dst[x..], cthresh);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn metric1_row_sse2(t: Taps<'_>, dst: &mut [u8], cthresh: i32) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        // Products are non-negative up to 65025, so they fit an unsigned 16-bit lane.
        let cth = _mm_set1_epi16(cthresh as u16 as i16);
        let zero = _mm_setzero_si128();
        let all = _mm_cmpeq_epi8(zero, zero);

        while x + 8 <= width {
            let c = widen8(t.c, x);
            let b = _mm_sub_epi16(widen8(t.b, x), c);
            let d = _mm_sub_epi16(widen8(t.d, x), c);
            // Negative products have an all-ones high half and collapse to zero.
            let prod = _mm_andnot_si128(_mm_mulhi_epi16(b, d), _mm_mullo_epi16(b, d));
            let gt = _mm_xor_si128(_mm_cmpeq_epi16(_mm_subs_epu16(prod, cth), zero), all);
            _mm_storel_epi64(
                dst.as_mut_ptr().add(x) as *mut __m128i,
                _mm_packs_epi16(gt, gt),
            );
            x += 8;
        }
    }
    if x < width {
        metric1_row(t.skip(x), &mut dst[x..], cthresh);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn metric1_row_avx2(t: Taps<'_>, dst: &mut [u8], cthresh: i32) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        let cth = _mm256_set1_epi16(cthresh as u16 as i16);
        let zero = _mm256_setzero_si256();
        let all = _mm256_cmpeq_epi8(zero, zero);

        while x + 16 <= width {
            let c = widen16(t.c, x);
            let b = _mm256_sub_epi16(widen16(t.b, x), c);
            let d = _mm256_sub_epi16(widen16(t.d, x), c);
            let prod = _mm256_andnot_si256(_mm256_mulhi_epi16(b, d), _mm256_mullo_epi16(b, d));
            let gt = _mm256_xor_si256(
                _mm256_cmpeq_epi16(_mm256_subs_epu16(prod, cth), zero),
                all,
            );
            store_narrow16(dst, x, gt);
            x += 16;
        }
    }
    if x < width {
        metric1_row(t.skip(x), &mut dst[x..], cthresh);
    }
}
