use crate::foundation::core::FormatInfo;
use crate::plane::frame::{Frame, Plane};
use crate::plane::view::PlaneRef;

/// Small deterministic generator for test planes.
pub(crate) struct XorShift(u64);

impl XorShift {
    pub(crate) fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub(crate) fn byte(&mut self) -> u8 {
        (self.next_u64() >> 56) as u8
    }

    /// Uniformly random samples.
    pub(crate) fn plane(&mut self, w: usize, h: usize) -> Plane {
        Plane::from_fn(w, h, |_, _| self.byte()).unwrap()
    }

    /// Binary mask with about half the pixels set.
    pub(crate) fn mask(&mut self, w: usize, h: usize) -> Plane {
        self.sparse_mask(w, h, 2)
    }

    /// Binary mask with roughly one pixel in `one_in` set.
    pub(crate) fn sparse_mask(&mut self, w: usize, h: usize, one_in: u32) -> Plane {
        Plane::from_fn(w, h, |_, _| {
            if self.next_u64() % u64::from(one_in) == 0 { 0xFF } else { 0 }
        })
        .unwrap()
    }

    pub(crate) fn frame(&mut self, format: FormatInfo) -> Frame {
        let planes = format
            .planes()
            .iter()
            .map(|&k| {
                let (w, h) = format.plane_dimensions(k);
                self.plane(w, h)
            })
            .collect();
        Frame::from_planes(format, planes).unwrap()
    }
}

pub(crate) fn assert_binary(p: PlaneRef<'_>) {
    for (y, row) in p.rows().enumerate() {
        assert!(row.iter().all(|&v| v == 0 || v == 0xFF), "non-binary sample in row {y}");
    }
}
