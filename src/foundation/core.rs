use serde::{Deserialize, Serialize};

use crate::foundation::error::{CombMaskError, CombMaskResult};

/// Absolute 0-based frame index within a clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameIndex(pub u64);

impl FrameIndex {
    /// The previous frame, clamped at frame 0.
    pub fn prev_clamped(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

/// One color plane of a planar frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaneKind {
    /// Luma.
    Y,
    /// First chroma plane.
    U,
    /// Second chroma plane.
    V,
}

impl PlaneKind {
    /// Planes in storage order.
    pub const ALL: [PlaneKind; 3] = [PlaneKind::Y, PlaneKind::U, PlaneKind::V];

    /// Storage index of this plane inside a frame.
    pub fn index(self) -> usize {
        match self {
            PlaneKind::Y => 0,
            PlaneKind::U => 1,
            PlaneKind::V => 2,
        }
    }

    /// `true` for U and V.
    pub fn is_chroma(self) -> bool {
        !matches!(self, PlaneKind::Y)
    }
}

/// Sample layout of a clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Luma only (Y8).
    Gray,
    /// 4:2:0 planar YUV.
    Yuv420,
    /// 4:2:2 planar YUV.
    Yuv422,
    /// 4:1:1 planar YUV.
    Yuv411,
    /// 4:4:4 planar YUV.
    Yuv444,
    /// Packed samples (YUY2, RGB32, ...). Never accepted by the filters.
    Interleaved {
        /// Bytes per packed pixel.
        bytes_per_pixel: u8,
    },
}

impl PixelLayout {
    /// Horizontal and vertical chroma subsampling shifts.
    pub fn chroma_shift(self) -> (u32, u32) {
        match self {
            PixelLayout::Yuv420 => (1, 1),
            PixelLayout::Yuv422 => (1, 0),
            PixelLayout::Yuv411 => (2, 0),
            PixelLayout::Gray | PixelLayout::Yuv444 | PixelLayout::Interleaved { .. } => (0, 0),
        }
    }
}

/// Geometry and layout of every frame produced by a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatInfo {
    /// Luma width in pixels.
    pub width: u32,
    /// Luma height in pixels.
    pub height: u32,
    /// Sample layout.
    pub layout: PixelLayout,
}

impl FormatInfo {
    /// Create a format, rejecting empty dimensions.
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> CombMaskResult<Self> {
        if width == 0 || height == 0 {
            return Err(CombMaskError::configuration(format!(
                "frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
        })
    }

    /// `true` unless the layout is packed.
    pub fn is_planar(&self) -> bool {
        !matches!(self.layout, PixelLayout::Interleaved { .. })
    }

    /// Number of planes (1 for gray and packed layouts, 3 otherwise).
    pub fn plane_count(&self) -> usize {
        match self.layout {
            PixelLayout::Gray | PixelLayout::Interleaved { .. } => 1,
            _ => 3,
        }
    }

    /// Planes present in this format, in storage order.
    pub fn planes(&self) -> &'static [PlaneKind] {
        &PlaneKind::ALL[..self.plane_count()]
    }

    /// Width and height of one plane in samples.
    ///
    /// Chroma dimensions round up so odd luma sizes keep their last column and row.
    pub fn plane_dimensions(&self, kind: PlaneKind) -> (usize, usize) {
        let (w, h) = (self.width as usize, self.height as usize);
        if let PixelLayout::Interleaved { bytes_per_pixel } = self.layout {
            return (w * usize::from(bytes_per_pixel), h);
        }
        if !kind.is_chroma() {
            return (w, h);
        }
        let (sx, sy) = self.layout.chroma_shift();
        (ceil_shift(w, sx), ceil_shift(h, sy))
    }

    /// `true` when both formats share layout and dimensions.
    pub fn matches(&self, other: &FormatInfo) -> bool {
        self.layout == other.layout && self.width == other.width && self.height == other.height
    }
}

fn ceil_shift(v: usize, shift: u32) -> usize {
    (v + (1 << shift) - 1) >> shift
}
