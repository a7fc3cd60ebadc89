//! Frame-level filters and the source capability they pull from.

pub(crate) mod comb_mask;
pub(crate) mod is_combed;
pub(crate) mod masked_merge;
pub(crate) mod source;

use std::sync::Arc;

use crate::foundation::core::{FormatInfo, FrameIndex};
use crate::foundation::error::{CombMaskError, CombMaskResult};
use crate::plane::frame::Frame;

/// Anything that can hand out decoded frames on demand.
///
/// `get_frame` may block (decode, I/O). Hosts may call it for different indices from several
/// threads at once; implementations decide whether that is safe for them.
pub trait FrameSource: Send + Sync {
    /// Geometry and layout shared by every frame.
    fn format(&self) -> FormatInfo;

    /// Frame `n`.
    fn get_frame(&self, n: FrameIndex) -> CombMaskResult<Arc<Frame>>;
}

impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    fn format(&self) -> FormatInfo {
        (**self).format()
    }

    fn get_frame(&self, n: FrameIndex) -> CombMaskResult<Arc<Frame>> {
        (**self).get_frame(n)
    }
}

pub(crate) fn require_planar(filter: &str, format: FormatInfo) -> CombMaskResult<()> {
    if !format.is_planar() {
        return Err(CombMaskError::configuration(format!(
            "{filter}: planar format only, got {:?}",
            format.layout
        )));
    }
    Ok(())
}

pub(crate) fn parse_opts<T: serde::de::DeserializeOwned>(what: &str, s: &str) -> CombMaskResult<T> {
    serde_json::from_str(s)
        .map_err(|e| CombMaskError::configuration(format!("invalid {what} options: {e}")))
}
