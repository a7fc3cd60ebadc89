use std::sync::Arc;

use crate::foundation::core::{FormatInfo, PlaneKind};
use crate::foundation::error::{CombMaskError, CombMaskResult};
use crate::foundation::math::align_up;
use crate::plane::aligned::AlignedBytes;
use crate::plane::view::{PlaneMut, PlaneRef};

/// Row alignment used for frames allocated by this crate. Wide enough for 256-bit loads.
pub const FRAME_ALIGN: usize = 32;

/// Owned 8-bit sample plane with aligned, pitch-padded rows.
#[derive(Debug)]
pub struct Plane {
    bytes: AlignedBytes,
    width: usize,
    height: usize,
    pitch: usize,
}

impl Plane {
    /// Zero-filled plane whose pitch is `width` rounded up to `align`.
    pub fn new(width: usize, height: usize, align: usize) -> CombMaskResult<Self> {
        let pitch = align_up(width.max(1), align.max(1))
            .ok_or_else(|| CombMaskError::allocation(width, align))?;
        let len = pitch
            .checked_mul(height)
            .ok_or_else(|| CombMaskError::allocation(usize::MAX, align))?;
        Ok(Self {
            bytes: AlignedBytes::zeroed(len, align.max(1))?,
            width,
            height,
            pitch,
        })
    }

    /// Plane with every visible sample set to `value`.
    pub fn filled(width: usize, height: usize, value: u8) -> CombMaskResult<Self> {
        let mut plane = Self::new(width, height, FRAME_ALIGN)?;
        plane.view_mut().fill(value);
        Ok(plane)
    }

    /// Plane whose sample at `(x, y)` is `f(x, y)`.
    pub fn from_fn(
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> u8,
    ) -> CombMaskResult<Self> {
        let mut plane = Self::new(width, height, FRAME_ALIGN)?;
        let mut view = plane.view_mut();
        for y in 0..height {
            for (x, v) in view.row_mut(y).iter_mut().enumerate() {
                *v = f(x, y);
            }
        }
        Ok(plane)
    }

    /// Plane copied from tightly packed row-major samples.
    pub fn from_packed(width: usize, height: usize, samples: &[u8]) -> CombMaskResult<Self> {
        let src = PlaneRef::new(samples, width, height, width)?;
        let mut plane = Self::new(width, height, FRAME_ALIGN)?;
        plane.view_mut().copy_from(src)?;
        Ok(plane)
    }

    /// Samples per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row stride in bytes.
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Alignment of the first row.
    pub fn align(&self) -> usize {
        self.bytes.align()
    }

    /// Read-only view of the plane.
    pub fn view(&self) -> PlaneRef<'_> {
        PlaneRef::from_checked(self.bytes.as_slice(), self.width, self.height, self.pitch)
    }

    /// Writable view of the plane.
    pub fn view_mut(&mut self) -> PlaneMut<'_> {
        PlaneMut::from_checked(
            self.bytes.as_mut_slice(),
            self.width,
            self.height,
            self.pitch,
        )
    }

    /// Deep copy into freshly allocated storage.
    pub fn try_clone(&self) -> CombMaskResult<Self> {
        Ok(Self {
            bytes: self.bytes.try_clone()?,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
        })
    }
}

/// A decoded planar frame: one plane per [`PlaneKind`] present in its format.
///
/// Frames are published as `Arc<Frame>` and never mutated afterwards.
#[derive(Debug)]
pub struct Frame {
    format: FormatInfo,
    planes: Vec<Plane>,
}

impl Frame {
    /// Zero-filled frame with the geometry of `format`.
    pub fn new_blank(format: FormatInfo, align: usize) -> CombMaskResult<Self> {
        let mut planes = Vec::with_capacity(format.plane_count());
        for &kind in format.planes() {
            let (w, h) = format.plane_dimensions(kind);
            planes.push(Plane::new(w, h, align)?);
        }
        Ok(Self { format, planes })
    }

    /// Assemble a frame from planes in Y, U, V order.
    pub fn from_planes(format: FormatInfo, planes: Vec<Plane>) -> CombMaskResult<Self> {
        if planes.len() != format.plane_count() {
            return Err(CombMaskError::precondition(format!(
                "format {:?} needs {} planes, got {}",
                format.layout,
                format.plane_count(),
                planes.len()
            )));
        }
        for (&kind, plane) in format.planes().iter().zip(&planes) {
            let expected = format.plane_dimensions(kind);
            if (plane.width(), plane.height()) != expected {
                return Err(CombMaskError::precondition(format!(
                    "plane {kind:?} is {}x{}, format expects {}x{}",
                    plane.width(),
                    plane.height(),
                    expected.0,
                    expected.1
                )));
            }
        }
        Ok(Self { format, planes })
    }

    /// Geometry and layout.
    pub fn format(&self) -> FormatInfo {
        self.format
    }

    /// Read-only view of plane `kind`.
    pub fn plane(&self, kind: PlaneKind) -> CombMaskResult<PlaneRef<'_>> {
        self.planes
            .get(kind.index())
            .map(Plane::view)
            .ok_or_else(|| missing_plane(self.format, kind))
    }

    /// Writable view of plane `kind`; only reachable before the frame is shared.
    pub fn plane_mut(&mut self, kind: PlaneKind) -> CombMaskResult<PlaneMut<'_>> {
        let format = self.format;
        self.planes
            .get_mut(kind.index())
            .map(Plane::view_mut)
            .ok_or_else(|| missing_plane(format, kind))
    }

    /// Publish the frame.
    pub fn into_shared(self) -> Arc<Frame> {
        Arc::new(self)
    }
}

fn missing_plane(format: FormatInfo, kind: PlaneKind) -> CombMaskError {
    CombMaskError::precondition(format!(
        "plane {kind:?} is not present in {:?}",
        format.layout
    ))
}
