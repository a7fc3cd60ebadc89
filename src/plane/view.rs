use crate::foundation::error::{CombMaskError, CombMaskResult};

fn check_geometry(len: usize, width: usize, height: usize, pitch: usize) -> CombMaskResult<()> {
    if pitch < width {
        return Err(CombMaskError::precondition(format!(
            "plane pitch {pitch} is smaller than its width {width}"
        )));
    }
    if height == 0 {
        return Ok(());
    }
    let required = pitch
        .checked_mul(height - 1)
        .and_then(|v| v.checked_add(width))
        .ok_or_else(|| CombMaskError::precondition("plane geometry overflows usize"))?;
    if len < required {
        return Err(CombMaskError::precondition(format!(
            "plane of {width}x{height} with pitch {pitch} needs {required} bytes, got {len}"
        )));
    }
    Ok(())
}

/// Read-only window over one plane: `height` rows of `width` samples, `pitch` bytes apart.
#[derive(Clone, Copy, Debug)]
pub struct PlaneRef<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    pitch: usize,
}

impl<'a> PlaneRef<'a> {
    /// Create a view, checking that every row lies inside `data`.
    pub fn new(data: &'a [u8], width: usize, height: usize, pitch: usize) -> CombMaskResult<Self> {
        check_geometry(data.len(), width, height, pitch)?;
        Ok(Self {
            data,
            width,
            height,
            pitch,
        })
    }

    /// View over storage whose geometry the caller already owns and has checked.
    pub(crate) fn from_checked(data: &'a [u8], width: usize, height: usize, pitch: usize) -> Self {
        debug_assert!(check_geometry(data.len(), width, height, pitch).is_ok());
        Self {
            data,
            width,
            height,
            pitch,
        }
    }

    /// Samples per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Distance in bytes between the starts of consecutive rows.
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// The `width` samples of row `y`.
    ///
    /// Panics when `y >= height`.
    #[inline]
    pub fn row(&self, y: usize) -> &'a [u8] {
        assert!(y < self.height, "row {y} out of range for height {}", self.height);
        let start = y * self.pitch;
        &self.data[start..start + self.width]
    }

    /// Iterate rows top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }

    /// Copy of the visible samples with no padding, row-major.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width * self.height);
        for row in self.rows() {
            out.extend_from_slice(row);
        }
        out
    }
}

/// Exclusively borrowed, writable window over one plane.
#[derive(Debug)]
pub struct PlaneMut<'a> {
    data: &'a mut [u8],
    width: usize,
    height: usize,
    pitch: usize,
}

impl<'a> PlaneMut<'a> {
    /// Create a writable view, checking that every row lies inside `data`.
    pub fn new(
        data: &'a mut [u8],
        width: usize,
        height: usize,
        pitch: usize,
    ) -> CombMaskResult<Self> {
        check_geometry(data.len(), width, height, pitch)?;
        Ok(Self {
            data,
            width,
            height,
            pitch,
        })
    }

    pub(crate) fn from_checked(
        data: &'a mut [u8],
        width: usize,
        height: usize,
        pitch: usize,
    ) -> Self {
        debug_assert!(check_geometry(data.len(), width, height, pitch).is_ok());
        Self {
            data,
            width,
            height,
            pitch,
        }
    }

    /// Samples per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Distance in bytes between the starts of consecutive rows.
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// The `width` samples of row `y`.
    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        assert!(y < self.height, "row {y} out of range for height {}", self.height);
        let start = y * self.pitch;
        &self.data[start..start + self.width]
    }

    /// The `width` samples of row `y`, writable.
    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        assert!(y < self.height, "row {y} out of range for height {}", self.height);
        let start = y * self.pitch;
        &mut self.data[start..start + self.width]
    }

    /// Reborrow as a read-only view.
    pub fn view(&self) -> PlaneRef<'_> {
        PlaneRef {
            data: &*self.data,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
        }
    }

    /// Reborrow with a shorter lifetime.
    pub fn reborrow(&mut self) -> PlaneMut<'_> {
        PlaneMut {
            data: &mut *self.data,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
        }
    }

    /// Set every visible sample to `value`.
    pub fn fill(&mut self, value: u8) {
        for y in 0..self.height {
            self.row_mut(y).fill(value);
        }
    }

    /// Copy the visible samples of `src`, which must have the same width and height.
    pub fn copy_from(&mut self, src: PlaneRef<'_>) -> CombMaskResult<()> {
        if src.width() != self.width || src.height() != self.height {
            return Err(CombMaskError::precondition(format!(
                "cannot copy a {}x{} plane into a {}x{} plane",
                src.width(),
                src.height(),
                self.width,
                self.height
            )));
        }
        for y in 0..self.height {
            self.row_mut(y).copy_from_slice(src.row(y));
        }
        Ok(())
    }
}

/// Fail unless both planes have the same visible dimensions.
pub(crate) fn ensure_same_size(
    what: &str,
    a: (usize, usize),
    b: (usize, usize),
) -> CombMaskResult<()> {
    if a != b {
        return Err(CombMaskError::precondition(format!(
            "{what}: plane sizes differ ({}x{} vs {}x{})",
            a.0, a.1, b.0, b.1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_skip_padding() {
        let data: Vec<u8> = (0..12).collect();
        let v = PlaneRef::new(&data, 3, 3, 4).unwrap();
        assert_eq!(v.row(0), &[0, 1, 2]);
        assert_eq!(v.row(2), &[8, 9, 10]);
        assert_eq!(v.to_vec(), vec![0, 1, 2, 4, 5, 6, 8, 9, 10]);
    }

    #[test]
    fn last_row_does_not_need_full_pitch() {
        let data = vec![0u8; 4 + 3];
        assert!(PlaneRef::new(&data, 3, 2, 4).is_ok());
        assert!(PlaneRef::new(&data[..6], 3, 2, 4).is_err());
    }

    #[test]
    fn pitch_smaller_than_width_is_rejected() {
        let data = vec![0u8; 64];
        let err = PlaneRef::new(&data, 8, 2, 4).unwrap_err();
        assert!(err.to_string().contains("pitch 4"));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn row_past_height_panics() {
        let data = vec![0u8; 8];
        let v = PlaneRef::new(&data, 4, 2, 4).unwrap();
        let _ = v.row(2);
    }

    #[test]
    fn fill_and_copy_leave_padding_untouched() {
        let mut data = vec![7u8; 8];
        {
            let mut m = PlaneMut::new(&mut data, 3, 2, 4).unwrap();
            m.fill(1);
        }
        assert_eq!(data, vec![1, 1, 1, 7, 1, 1, 1, 7]);

        let src = vec![5u8; 6];
        let src = PlaneRef::new(&src, 3, 2, 3).unwrap();
        let mut m = PlaneMut::new(&mut data, 3, 2, 4).unwrap();
        m.copy_from(src).unwrap();
        assert_eq!(m.view().to_vec(), vec![5; 6]);
        assert_eq!(data[3], 7);
    }

    #[test]
    fn copy_rejects_mismatched_sizes() {
        let src = vec![0u8; 4];
        let src = PlaneRef::new(&src, 2, 2, 2).unwrap();
        let mut dst = vec![0u8; 9];
        let mut m = PlaneMut::new(&mut dst, 3, 3, 3).unwrap();
        assert!(m.copy_from(src).is_err());
    }
}
