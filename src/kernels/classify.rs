//! Block-sum classification of a luma mask.
//!
//! The mask is tiled into `block_width x block_height` blocks (partial blocks on the right
//! and bottom are ignored). The plane counts as combed once any block holds more than `mi`
//! set pixels. A pixel counts when its low bit is set.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use crate::foundation::error::CombMaskResult;
use crate::plane::view::PlaneRef;
use crate::scratch::{ScratchAllocator, ScratchLease};

const GROUP: usize = 8;
const SUMS_ALIGN: usize = 32;

pub(super) fn classify_scalar(
    mask: PlaneRef<'_>,
    mi: u32,
    block_width: usize,
    block_height: usize,
    _allocator: &dyn ScratchAllocator,
) -> CombMaskResult<bool> {
    let width = mask.width() / block_width * block_width;
    let height = mask.height() / block_height * block_height;
    for by in (0..height).step_by(block_height) {
        for bx in (0..width).step_by(block_width) {
            let count: u32 = (by..by + block_height)
                .map(|y| {
                    mask.row(y)[bx..bx + block_width]
                        .iter()
                        .map(|&p| u32::from(p & 1))
                        .sum::<u32>()
                })
                .sum();
            if count > mi {
                tracing::trace!(bx, by, count, mi, "combed block");
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Per-8x8 counts for every 8-column group of eight rows, stored as little-endian `u64`s.
fn group_sums_scalar(rows: &[&[u8]; GROUP], out: &mut [u8], from_group: usize) {
    for g in from_group..out.len() / 8 {
        let cols = g * GROUP..(g + 1) * GROUP;
        let count: u64 = rows
            .iter()
            .map(|r| r[cols.clone()].iter().map(|&p| u64::from(p & 1)).sum::<u64>())
            .sum();
        out[g * 8..g * 8 + 8].copy_from_slice(&count.to_le_bytes());
    }
}

fn read_sum(sums: &[u8], index: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&sums[index * 8..index * 8 + 8]);
    u64::from_le_bytes(b)
}

/// Band-at-a-time classifier: fill the 8x8 group counts for one band of `block_height`
/// rows, then reduce them per block.
fn classify_banded(
    mask: PlaneRef<'_>,
    mi: u32,
    block_width: usize,
    block_height: usize,
    allocator: &dyn ScratchAllocator,
    mut group_sums: impl FnMut(&[&[u8]; GROUP], &mut [u8]),
) -> CombMaskResult<bool> {
    let width = mask.width() / block_width * block_width;
    let height = mask.height() / block_height * block_height;
    if width == 0 || height == 0 {
        return Ok(false);
    }

    let groups = width / GROUP;
    let step_x = block_width / GROUP;
    let step_y = block_height / GROUP;
    let band_bytes = groups * 8;

    let mut lease = ScratchLease::new(allocator, band_bytes * step_y, SUMS_ALIGN)?;
    let sums = lease.buffer_mut()?.as_mut_slice();

    for band in (0..height).step_by(block_height) {
        for j in 0..step_y {
            let y0 = band + j * GROUP;
            let rows: [&[u8]; GROUP] = std::array::from_fn(|i| &mask.row(y0 + i)[..width]);
            group_sums(&rows, &mut sums[j * band_bytes..(j + 1) * band_bytes]);
        }

        for gx in (0..groups).step_by(step_x) {
            let count: u64 = (0..step_y)
                .flat_map(|j| (gx..gx + step_x).map(move |g| j * groups + g))
                .map(|i| read_sum(sums, i))
                .sum();
            if count > u64::from(mi) {
                tracing::trace!(bx = gx * GROUP, by = band, count, mi, "combed block");
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(target_arch = "x86_64")]
pub(super) fn classify_sse2(
    mask: PlaneRef<'_>,
    mi: u32,
    block_width: usize,
    block_height: usize,
    allocator: &dyn ScratchAllocator,
) -> CombMaskResult<bool> {
    // SAFETY: SSE2 is part of the x86_64 baseline.
    classify_banded(mask, mi, block_width, block_height, allocator, |rows, out| unsafe {
        group_sums_sse2(rows, out)
    })
}

#[cfg(target_arch = "x86_64")]
pub(super) fn classify_avx2(
    mask: PlaneRef<'_>,
    mi: u32,
    block_width: usize,
    block_height: usize,
    allocator: &dyn ScratchAllocator,
) -> CombMaskResult<bool> {
    // SAFETY: only installed by `Kernels::for_level` after AVX2 was detected.
    classify_banded(mask, mi, block_width, block_height, allocator, |rows, out| unsafe {
        group_sums_avx2(rows, out)
    })
}

// Column x maps to byte x of `out`: each 8-column group owns one u64 slot, and
// `sad_epu8` against zero yields exactly one u64 per 8 input bytes.

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn group_sums_sse2(rows: &[&[u8]; GROUP], out: &mut [u8]) {
    let width = rows[0].len();
    let mut x = 0usize;
    unsafe {
        let ones = _mm_set1_epi8(1);
        let zero = _mm_setzero_si128();
        while x + 16 <= width {
            let mut sum = zero;
            for r in rows {
                let v = _mm_loadu_si128(r.as_ptr().add(x) as *const __m128i);
                sum = _mm_add_epi8(sum, _mm_and_si128(v, ones));
            }
            _mm_storeu_si128(
                out.as_mut_ptr().add(x) as *mut __m128i,
                _mm_sad_epu8(sum, zero),
            );
            x += 16;
        }
    }
    group_sums_scalar(rows, out, x / GROUP);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn group_sums_avx2(rows: &[&[u8]; GROUP], out: &mut [u8]) {
    let width = rows[0].len();
    let mut x = 0usize;
    unsafe {
        let ones = _mm256_set1_epi8(1);
        let zero = _mm256_setzero_si256();
        while x + 32 <= width {
            let mut sum = zero;
            for r in rows {
                let v = _mm256_loadu_si256(r.as_ptr().add(x) as *const __m256i);
                sum = _mm256_add_epi8(sum, _mm256_and_si256(v, ones));
            }
            _mm256_storeu_si256(
                out.as_mut_ptr().add(x) as *mut __m256i,
                _mm256_sad_epu8(sum, zero),
            );
            x += 32;
        }
    }
    group_sums_scalar(rows, out, x / GROUP);
}

#[cfg(test)]
mod tests {
    use crate::foundation::error::CombMaskError;
    use crate::kernels::{Kernels, Metric, SimdLevel};
    use crate::plane::frame::Plane;
    use crate::scratch::{HeapAllocator, PoolOpts, PooledAllocator};
    use crate::test_util::XorShift;

    fn is_combed(level: SimdLevel, mask: &Plane, mi: u32, bw: usize, bh: usize) -> bool {
        Kernels::for_level(level, Metric::Zero)
            .unwrap()
            .is_combed(mask.view(), mi, bw, bh, &HeapAllocator)
            .unwrap()
    }

    /// Mask with `count` set pixels inside block `(bx, by)` and nothing elsewhere.
    fn one_block(w: usize, h: usize, bw: usize, bh: usize, bx: usize, by: usize, count: usize) -> Plane {
        Plane::from_fn(w, h, |x, y| {
            let inside = x / bw == bx && y / bh == by;
            let idx = (y % bh) * bw + x % bw;
            if inside && idx < count { 0xFF } else { 0 }
        })
        .unwrap()
    }

    #[test]
    fn strictly_more_than_mi_is_combed() {
        for level in SimdLevel::available() {
            for (bw, bh) in [(8, 8), (16, 8), (8, 32), (32, 16)] {
                let mi = 20;
                let over = one_block(96, 64, bw, bh, 1, 1, mi as usize + 1);
                let at = one_block(96, 64, bw, bh, 1, 1, mi as usize);
                assert!(is_combed(level, &over, mi, bw, bh), "{level:?} {bw}x{bh}");
                assert!(!is_combed(level, &at, mi, bw, bh), "{level:?} {bw}x{bh}");
            }
        }
    }

    #[test]
    fn every_block_at_mi_is_not_combed() {
        let (bw, bh, mi) = (8usize, 8usize, 8u32);
        // Exactly one set pixel per row of every block.
        let mask = Plane::from_fn(64, 32, |x, _| if x % bw == 3 { 0xFF } else { 0 }).unwrap();
        for level in SimdLevel::available() {
            assert!(!is_combed(level, &mask, mi, bw, bh), "{level:?}");
            assert!(is_combed(level, &mask, mi - 1, bw, bh), "{level:?}");
        }
    }

    #[test]
    fn partial_edge_blocks_are_ignored() {
        // 20x20 with 16x16 blocks: only the top-left block is scanned.
        let mask = Plane::from_fn(20, 20, |x, y| if x >= 16 || y >= 16 { 0xFF } else { 0 }).unwrap();
        for level in SimdLevel::available() {
            assert!(!is_combed(level, &mask, 0, 16, 16), "{level:?}");
        }
        let small = Plane::filled(7, 7, 0xFF).unwrap();
        assert!(!is_combed(SimdLevel::Scalar, &small, 0, 8, 8));
    }

    #[test]
    fn only_low_bit_counts() {
        let mask = Plane::filled(8, 8, 0xFE).unwrap();
        for level in SimdLevel::available() {
            assert!(!is_combed(level, &mask, 0, 8, 8), "{level:?}");
        }
    }

    #[test]
    fn unsupported_block_size_is_a_precondition_violation() {
        let mask = Plane::filled(64, 64, 0).unwrap();
        let k = Kernels::for_level(SimdLevel::Scalar, Metric::Zero).unwrap();
        let err = k.is_combed(mask.view(), 0, 12, 8, &HeapAllocator).unwrap_err();
        assert!(matches!(err, CombMaskError::Precondition(_)));
    }

    #[test]
    fn vector_classifier_leases_and_returns_scratch() {
        let pool = PooledAllocator::new(PoolOpts::default());
        let mask = Plane::filled(64, 32, 0).unwrap();
        for level in SimdLevel::available() {
            let k = Kernels::for_level(level, Metric::Zero).unwrap();
            assert!(!k.is_combed(mask.view(), 0, 16, 16, &pool).unwrap());
        }
        assert_eq!(pool.stats().retained_buffers, usize::from(SimdLevel::available().len() > 1));
    }

    #[test]
    fn vector_levels_match_scalar() {
        let mut rng = XorShift::new(0xB10C);
        for (w, h) in [(8, 8), (24, 16), (40, 40), (72, 33), (129, 64)] {
            for density in [1u32, 4, 16, 64] {
                let mask = rng.sparse_mask(w, h, density);
                for (bw, bh) in [(8, 8), (16, 16), (32, 32), (8, 16), (32, 8)] {
                    for mi in [0u32, 1, 8, 40, 128] {
                        let expected = is_combed(SimdLevel::Scalar, &mask, mi, bw, bh);
                        for level in SimdLevel::available() {
                            assert_eq!(
                                is_combed(level, &mask, mi, bw, bh),
                                expected,
                                "{level:?} {w}x{h} density={density} block={bw}x{bh} mi={mi}"
                            );
                        }
                    }
                }
            }
        }
    }
}
