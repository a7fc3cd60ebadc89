//! Mask intersection and horizontal dilation.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use crate::plane::view::{PlaneMut, PlaneRef};

fn for_each_row(
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    mut row_fn: impl FnMut(&mut [u8], &[u8]),
) {
    for y in 0..src.height() {
        row_fn(dst.row_mut(y), src.row(y));
    }
}

#[inline(always)]
fn and_row(dst: &mut [u8], alt: &[u8]) {
    for (d, &a) in dst.iter_mut().zip(alt) {
        *d &= a;
    }
}

/// `src[x-1] | src[x] | src[x+1]` with the first and last sample replicated outward.
#[inline(always)]
fn expand_px(src: &[u8], x: usize) -> u8 {
    let last = src.len() - 1;
    src[x.saturating_sub(1)] | src[x] | src[(x + 1).min(last)]
}

#[inline(always)]
fn expand_range(dst: &mut [u8], src: &[u8], from: usize) {
    for (x, out) in dst.iter_mut().enumerate().skip(from) {
        *out = expand_px(src, x);
    }
}

pub(super) fn and_scalar(dst: &mut PlaneMut<'_>, alt: PlaneRef<'_>) {
    for_each_row(dst, alt, and_row);
}

pub(super) fn expand_scalar(dst: &mut PlaneMut<'_>, src: PlaneRef<'_>) {
    for_each_row(dst, src, |d, s| expand_range(d, s, 0));
}

#[cfg(target_arch = "x86_64")]
pub(super) fn and_sse2(dst: &mut PlaneMut<'_>, alt: PlaneRef<'_>) {
    // SAFETY: SSE2 is part of the x86_64 baseline.
    for_each_row(dst, alt, |d, a| unsafe { and_row_sse2(d, a) });
}

#[cfg(target_arch = "x86_64")]
pub(super) fn expand_sse2(dst: &mut PlaneMut<'_>, src: PlaneRef<'_>) {
    // SAFETY: SSE2 is part of the x86_64 baseline.
    for_each_row(dst, src, |d, s| unsafe { expand_row_sse2(d, s) });
}

#[cfg(target_arch = "x86_64")]
pub(super) fn and_avx2(dst: &mut PlaneMut<'_>, alt: PlaneRef<'_>) {
    // SAFETY: only installed by `Kernels::for_level` after AVX2 was detected.
    for_each_row(dst, alt, |d, a| unsafe { and_row_avx2(d, a) });
}

#[cfg(target_arch = "x86_64")]
pub(super) fn expand_avx2(dst: &mut PlaneMut<'_>, src: PlaneRef<'_>) {
    // SAFETY: only installed by `Kernels::for_level` after AVX2 was detected.
    for_each_row(dst, src, |d, s| unsafe { expand_row_avx2(d, s) });
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn and_row_sse2(dst: &mut [u8], alt: &[u8]) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        while x + 16 <= width {
            let d = _mm_loadu_si128(dst.as_ptr().add(x) as *const __m128i);
            let a = _mm_loadu_si128(alt.as_ptr().add(x) as *const __m128i);
            _mm_storeu_si128(dst.as_mut_ptr().add(x) as *mut __m128i, _mm_and_si128(d, a));
            x += 16;
        }
    }
    if x < width {
        and_row(&mut dst[x..], &alt[x..]);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn and_row_avx2(dst: &mut [u8], alt: &[u8]) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        while x + 32 <= width {
            let d = _mm256_loadu_si256(dst.as_ptr().add(x) as *const __m256i);
            let a = _mm256_loadu_si256(alt.as_ptr().add(x) as *const __m256i);
            _mm256_storeu_si256(
                dst.as_mut_ptr().add(x) as *mut __m256i,
                _mm256_and_si256(d, a),
            );
            x += 32;
        }
    }
    if x < width {
        and_row(&mut dst[x..], &alt[x..]);
    }
}

// Column 0 and the tail go through `expand_px`; the vector loop covers interior columns
// whose left and right neighbours both lie inside the row.

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn expand_row_sse2(dst: &mut [u8], src: &[u8]) {
    let width = dst.len();
    dst[0] = expand_px(src, 0);
    let mut x = 1usize;
    unsafe {
        while x + 17 <= width {
            let l = _mm_loadu_si128(src.as_ptr().add(x - 1) as *const __m128i);
            let c = _mm_loadu_si128(src.as_ptr().add(x) as *const __m128i);
            let r = _mm_loadu_si128(src.as_ptr().add(x + 1) as *const __m128i);
            _mm_storeu_si128(
                dst.as_mut_ptr().add(x) as *mut __m128i,
                _mm_or_si128(_mm_or_si128(l, c), r),
            );
            x += 16;
        }
    }
    expand_range(dst, src, x);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn expand_row_avx2(dst: &mut [u8], src: &[u8]) {
    let width = dst.len();
    dst[0] = expand_px(src, 0);
    let mut x = 1usize;
    unsafe {
        while x + 33 <= width {
            let l = _mm256_loadu_si256(src.as_ptr().add(x - 1) as *const __m256i);
            let c = _mm256_loadu_si256(src.as_ptr().add(x) as *const __m256i);
            let r = _mm256_loadu_si256(src.as_ptr().add(x + 1) as *const __m256i);
            _mm256_storeu_si256(
                dst.as_mut_ptr().add(x) as *mut __m256i,
                _mm256_or_si256(_mm256_or_si256(l, c), r),
            );
            x += 32;
        }
    }
    expand_range(dst, src, x);
}

#[cfg(test)]
mod tests {
    use crate::kernels::{Kernels, Metric, SimdLevel};
    use crate::plane::frame::Plane;
    use crate::test_util::{XorShift, assert_binary};

    fn kernels(level: SimdLevel) -> Kernels {
        Kernels::for_level(level, Metric::Zero).unwrap()
    }

    fn expand(level: SimdLevel, src: &Plane) -> Plane {
        let mut dst = Plane::new(src.width(), src.height(), level.alignment()).unwrap();
        kernels(level)
            .expand(&mut dst.view_mut(), src.view())
            .unwrap();
        dst
    }

    #[test]
    fn and_with_all_ones_is_identity_and_with_zeros_absorbs() {
        let mut rng = XorShift::new(0xA11);
        for level in SimdLevel::available() {
            let mask = rng.mask(45, 6);
            let ones = Plane::filled(45, 6, 0xFF).unwrap();
            let zeros = Plane::filled(45, 6, 0).unwrap();

            let mut m = mask.try_clone().unwrap();
            kernels(level).and(&mut m.view_mut(), ones.view()).unwrap();
            assert_eq!(m.view().to_vec(), mask.view().to_vec(), "{level:?}");

            kernels(level).and(&mut m.view_mut(), zeros.view()).unwrap();
            assert_eq!(m.view().to_vec(), vec![0; 45 * 6], "{level:?}");
        }
    }

    #[test]
    fn expand_replicates_edges() {
        let src = Plane::from_packed(6, 1, &[0xFF, 0, 0, 0, 0, 0xFF]).unwrap();
        for level in SimdLevel::available() {
            let out = expand(level, &src);
            assert_eq!(out.view().to_vec(), vec![0xFF, 0xFF, 0, 0, 0xFF, 0xFF]);
        }
    }

    #[test]
    fn expand_single_column() {
        let src = Plane::from_packed(1, 2, &[0xFF, 0]).unwrap();
        for level in SimdLevel::available() {
            assert_eq!(expand(level, &src).view().to_vec(), vec![0xFF, 0]);
        }
    }

    #[test]
    fn expand_closes_one_pixel_gaps() {
        let mut row = vec![0u8; 40];
        row[20] = 0xFF;
        let src = Plane::from_packed(40, 1, &row).unwrap();
        for level in SimdLevel::available() {
            let out = expand(level, &src).view().to_vec();
            let set: Vec<usize> = (0..40).filter(|&x| out[x] == 0xFF).collect();
            assert_eq!(set, vec![19, 20, 21], "{level:?}");
        }
    }

    #[test]
    fn vector_levels_match_scalar() {
        let mut rng = XorShift::new(0xE4A);
        for (w, h) in [(1, 1), (2, 3), (16, 2), (17, 2), (18, 4), (33, 3), (34, 3), (97, 5)] {
            let src = rng.mask(w, h);
            let alt = rng.mask(w, h);
            let expected = expand(SimdLevel::Scalar, &src);
            assert_binary(expected.view());

            let mut and_expected = src.try_clone().unwrap();
            kernels(SimdLevel::Scalar)
                .and(&mut and_expected.view_mut(), alt.view())
                .unwrap();

            for level in SimdLevel::available() {
                assert_eq!(
                    expand(level, &src).view().to_vec(),
                    expected.view().to_vec(),
                    "expand {level:?} {w}x{h}"
                );
                let mut got = src.try_clone().unwrap();
                kernels(level).and(&mut got.view_mut(), alt.view()).unwrap();
                assert_eq!(
                    got.view().to_vec(),
                    and_expected.view().to_vec(),
                    "and {level:?} {w}x{h}"
                );
            }
        }
    }
}
