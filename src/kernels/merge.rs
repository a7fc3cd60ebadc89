//! Byte-wise select between two planes driven by a binary mask.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use crate::plane::view::{PlaneMut, PlaneRef};

struct MergeRows<'a> {
    src: &'a [u8],
    alt: &'a [u8],
    mask: &'a [u8],
}

fn for_each_row(
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    alt: PlaneRef<'_>,
    mask: PlaneRef<'_>,
    mut row_fn: impl FnMut(MergeRows<'_>, &mut [u8]),
) {
    for y in 0..src.height() {
        let rows = MergeRows {
            src: src.row(y),
            alt: alt.row(y),
            mask: mask.row(y),
        };
        row_fn(rows, dst.row_mut(y));
    }
}

#[inline(always)]
fn merge_row(r: MergeRows<'_>, dst: &mut [u8], from: usize) {
    for x in from..dst.len() {
        let m = r.mask[x];
        dst[x] = (r.src[x] & !m) | (r.alt[x] & m);
    }
}

pub(super) fn merge_scalar(
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    alt: PlaneRef<'_>,
    mask: PlaneRef<'_>,
) {
    for_each_row(dst, src, alt, mask, |r, d| merge_row(r, d, 0));
}

#[cfg(target_arch = "x86_64")]
pub(super) fn merge_sse2(
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    alt: PlaneRef<'_>,
    mask: PlaneRef<'_>,
) {
    // SAFETY: SSE2 is part of the x86_64 baseline.
    for_each_row(dst, src, alt, mask, |r, d| unsafe { merge_row_sse2(r, d) });
}

#[cfg(target_arch = "x86_64")]
pub(super) fn merge_avx2(
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    alt: PlaneRef<'_>,
    mask: PlaneRef<'_>,
) {
    // SAFETY: only installed by `Kernels::for_level` after AVX2 was detected.
    for_each_row(dst, src, alt, mask, |r, d| unsafe { merge_row_avx2(r, d) });
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn merge_row_sse2(r: MergeRows<'_>, dst: &mut [u8]) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        while x + 16 <= width {
            let s = _mm_loadu_si128(r.src.as_ptr().add(x) as *const __m128i);
            let a = _mm_loadu_si128(r.alt.as_ptr().add(x) as *const __m128i);
            let m = _mm_loadu_si128(r.mask.as_ptr().add(x) as *const __m128i);
            let v = _mm_or_si128(_mm_and_si128(m, a), _mm_andnot_si128(m, s));
            _mm_storeu_si128(dst.as_mut_ptr().add(x) as *mut __m128i, v);
            x += 16;
        }
    }
    merge_row(r, dst, x);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn merge_row_avx2(r: MergeRows<'_>, dst: &mut [u8]) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        while x + 32 <= width {
            let s = _mm256_loadu_si256(r.src.as_ptr().add(x) as *const __m256i);
            let a = _mm256_loadu_si256(r.alt.as_ptr().add(x) as *const __m256i);
            let m = _mm256_loadu_si256(r.mask.as_ptr().add(x) as *const __m256i);
            let v = _mm256_or_si256(_mm256_and_si256(m, a), _mm256_andnot_si256(m, s));
            _mm256_storeu_si256(dst.as_mut_ptr().add(x) as *mut __m256i, v);
            x += 32;
        }
    }
    merge_row(r, dst, x);
}

#[cfg(test)]
mod tests {
    use crate::kernels::{Kernels, Metric, SimdLevel};
    use crate::plane::frame::Plane;
    use crate::test_util::XorShift;

    fn merge(level: SimdLevel, src: &Plane, alt: &Plane, mask: &Plane) -> Plane {
        let mut dst = Plane::new(src.width(), src.height(), level.alignment()).unwrap();
        Kernels::for_level(level, Metric::Zero)
            .unwrap()
            .merge(&mut dst.view_mut(), src.view(), alt.view(), mask.view())
            .unwrap();
        dst
    }

    #[test]
    fn mask_selects_alt_where_set() {
        let src = Plane::from_packed(4, 1, &[1, 2, 3, 4]).unwrap();
        let alt = Plane::from_packed(4, 1, &[9, 8, 7, 6]).unwrap();
        let mask = Plane::from_packed(4, 1, &[0, 0xFF, 0, 0xFF]).unwrap();
        for level in SimdLevel::available() {
            assert_eq!(merge(level, &src, &alt, &mask).view().to_vec(), vec![1, 8, 3, 6]);
        }
    }

    #[test]
    fn merging_a_plane_with_itself_is_a_no_op() {
        let mut rng = XorShift::new(0x1DE);
        for level in SimdLevel::available() {
            let src = rng.plane(53, 7);
            let mask = rng.plane(53, 7);
            let out = merge(level, &src, &src, &mask);
            assert_eq!(out.view().to_vec(), src.view().to_vec(), "{level:?}");
        }
    }

    #[test]
    fn vector_levels_match_scalar() {
        let mut rng = XorShift::new(0x3E26E);
        for (w, h) in [(1, 1), (15, 2), (16, 2), (31, 3), (32, 3), (81, 6)] {
            let src = rng.plane(w, h);
            let alt = rng.plane(w, h);
            let mask = rng.mask(w, h);
            let expected = merge(SimdLevel::Scalar, &src, &alt, &mask);
            for level in SimdLevel::available() {
                assert_eq!(
                    merge(level, &src, &alt, &mask).view().to_vec(),
                    expected.view().to_vec(),
                    "{level:?} {w}x{h}"
                );
            }
        }
    }
}
