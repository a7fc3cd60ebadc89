//! Temporal motion mask: threshold the absolute difference against the previous frame,
//! then OR each row with its vertical neighbours.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use crate::foundation::math::clamp_row;
use crate::plane::view::{PlaneMut, PlaneRef};

fn run(
    tmp: &mut PlaneMut<'_>,
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    prev: PlaneRef<'_>,
    mut diff_row: impl FnMut(&[u8], &[u8], &mut [u8]),
    mut or3_row: impl FnMut(&[u8], &[u8], &[u8], &mut [u8]),
) {
    let h = src.height();
    for y in 0..h {
        diff_row(src.row(y), prev.row(y), tmp.row_mut(y));
    }
    let tmp = tmp.view();
    for y in 0..h {
        let yi = y as isize;
        or3_row(
            tmp.row(clamp_row(yi - 1, h)),
            tmp.row(y),
            tmp.row(clamp_row(yi + 1, h)),
            dst.row_mut(y),
        );
    }
}

#[inline(always)]
fn diff_row(src: &[u8], prev: &[u8], tmp: &mut [u8], mthresh: u8) {
    for ((t, &s), &p) in tmp.iter_mut().zip(src).zip(prev) {
        *t = if s.abs_diff(p) > mthresh { 0xFF } else { 0 };
    }
}

#[inline(always)]
fn or3_row(t0: &[u8], t1: &[u8], t2: &[u8], dst: &mut [u8]) {
    for (x, out) in dst.iter_mut().enumerate() {
        *out = t0[x] | t1[x] | t2[x];
    }
}

pub(super) fn motion_scalar(
    tmp: &mut PlaneMut<'_>,
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    prev: PlaneRef<'_>,
    mthresh: u8,
) {
    run(
        tmp,
        dst,
        src,
        prev,
        |s, p, t| diff_row(s, p, t, mthresh),
        or3_row,
    );
}

#[cfg(target_arch = "x86_64")]
pub(super) fn motion_sse2(
    tmp: &mut PlaneMut<'_>,
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    prev: PlaneRef<'_>,
    mthresh: u8,
) {
    // SAFETY: SSE2 is part of the x86_64 baseline.
    run(
        tmp,
        dst,
        src,
        prev,
        |s, p, t| unsafe { diff_row_sse2(s, p, t, mthresh) },
        |t0, t1, t2, d| unsafe { or3_row_sse2(t0, t1, t2, d) },
    );
}

#[cfg(target_arch = "x86_64")]
pub(super) fn motion_avx2(
    tmp: &mut PlaneMut<'_>,
    dst: &mut PlaneMut<'_>,
    src: PlaneRef<'_>,
    prev: PlaneRef<'_>,
    mthresh: u8,
) {
    // SAFETY: only installed by `Kernels::for_level` after AVX2 was detected.
    run(
        tmp,
        dst,
        src,
        prev,
        |s, p, t| unsafe { diff_row_avx2(s, p, t, mthresh) },
        |t0, t1, t2, d| unsafe { or3_row_avx2(t0, t1, t2, d) },
    );
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn diff_row_sse2(src: &[u8], prev: &[u8], tmp: &mut [u8], mthresh: u8) {
    let width = tmp.len();
    let mut x = 0usize;
    unsafe {
        let mth = _mm_set1_epi8(mthresh as i8);
        let zero = _mm_setzero_si128();
        let all = _mm_cmpeq_epi8(zero, zero);
        while x + 16 <= width {
            let s = _mm_loadu_si128(src.as_ptr().add(x) as *const __m128i);
            let p = _mm_loadu_si128(prev.as_ptr().add(x) as *const __m128i);
            let diff = _mm_or_si128(_mm_subs_epu8(s, p), _mm_subs_epu8(p, s));
            let gt = _mm_xor_si128(_mm_cmpeq_epi8(_mm_subs_epu8(diff, mth), zero), all);
            _mm_storeu_si128(tmp.as_mut_ptr().add(x) as *mut __m128i, gt);
            x += 16;
        }
    }
    if x < width {
        diff_row(&src[x..], &prev[x..], &mut tmp[x..], mthresh);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn or3_row_sse2(t0: &[u8], t1: &[u8], t2: &[u8], dst: &mut [u8]) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        while x + 16 <= width {
            let v = _mm_or_si128(
                _mm_or_si128(
                    _mm_loadu_si128(t0.as_ptr().add(x) as *const __m128i),
                    _mm_loadu_si128(t1.as_ptr().add(x) as *const __m128i),
                ),
                _mm_loadu_si128(t2.as_ptr().add(x) as *const __m128i),
            );
            _mm_storeu_si128(dst.as_mut_ptr().add(x) as *mut __m128i, v);
            x += 16;
        }
    }
    if x < width {
        or3_row(&t0[x..], &t1[x..], &t2[x..], &mut dst[x..]);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn diff_row_avx2(src: &[u8], prev: &[u8], tmp: &mut [u8], mthresh: u8) {
    let width = tmp.len();
    let mut x = 0usize;
    unsafe {
        let mth = _mm256_set1_epi8(mthresh as i8);
        let zero = _mm256_setzero_si256();
        let all = _mm256_cmpeq_epi8(zero, zero);
        while x + 32 <= width {
            let s = _mm256_loadu_si256(src.as_ptr().add(x) as *const __m256i);
            let p = _mm256_loadu_si256(prev.as_ptr().add(x) as *const __m256i);
            let diff = _mm256_or_si256(_mm256_subs_epu8(s, p), _mm256_subs_epu8(p, s));
            let gt = _mm256_xor_si256(
                _mm256_cmpeq_epi8(_mm256_subs_epu8(diff, mth), zero),
                all,
            );
            _mm256_storeu_si256(tmp.as_mut_ptr().add(x) as *mut __m256i, gt);
            x += 32;
        }
    }
    if x < width {
        diff_row(&src[x..], &prev[x..], &mut tmp[x..], mthresh);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn or3_row_avx2(t0: &[u8], t1: &[u8], t2: &[u8], dst: &mut [u8]) {
    let width = dst.len();
    let mut x = 0usize;
    unsafe {
        while x + 32 <= width {
            let v = _mm256_or_si256(
                _mm256_or_si256(
                    _mm256_loadu_si256(t0.as_ptr().add(x) as *const __m256i),
                    _mm256_loadu_si256(t1.as_ptr().add(x) as *const __m256i),
                ),
                _mm256_loadu_si256(t2.as_ptr().add(x) as *const __m256i),
            );
            _mm256_storeu_si256(dst.as_mut_ptr().add(x) as *mut __m256i, v);
            x += 32;
        }
    }
    if x < width {
        or3_row(&t0[x..], &t1[x..], &t2[x..], &mut dst[x..]);
    }
}
