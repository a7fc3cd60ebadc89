use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::filter::FrameSource;
use crate::foundation::core::{FormatInfo, FrameIndex};
use crate::foundation::error::{CombMaskError, CombMaskResult};
use crate::plane::frame::Frame;

/// In-memory clip over already decoded frames.
///
/// Indices past the end return the last frame, the way a host clip clamps them.
#[derive(Debug)]
pub struct ClipSource {
    format: FormatInfo,
    frames: Vec<Arc<Frame>>,
    fetches: AtomicU64,
}

impl ClipSource {
    /// Clip over `frames`, all of which must have `format`.
    pub fn new(format: FormatInfo, frames: Vec<Arc<Frame>>) -> CombMaskResult<Self> {
        if frames.is_empty() {
            return Err(CombMaskError::configuration("clip has no frames"));
        }
        if let Some((i, f)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| !f.format().matches(&format))
        {
            return Err(CombMaskError::configuration(format!(
                "frame {i} has format {:?}, clip expects {:?}",
                f.format(),
                format
            )));
        }
        Ok(Self {
            format,
            frames,
            fetches: AtomicU64::new(0),
        })
    }

    /// Clip built from owned frames.
    pub fn from_frames(format: FormatInfo, frames: Vec<Frame>) -> CombMaskResult<Self> {
        Self::new(format, frames.into_iter().map(Arc::new).collect())
    }

    /// Number of frames.
    pub fn len(&self) -> u64 {
        self.frames.len() as u64
    }

    /// Always `false`; a clip holds at least one frame.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of `get_frame` calls served so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl FrameSource for ClipSource {
    fn format(&self) -> FormatInfo {
        self.format
    }

    fn get_frame(&self, n: FrameIndex) -> CombMaskResult<Arc<Frame>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let last = self.frames.len() - 1;
        let i = usize::try_from(n.0).map_or(last, |i| i.min(last));
        Ok(Arc::clone(&self.frames[i]))
    }
}
