/// Result alias used across the crate.
pub type CombMaskResult<T> = Result<T, CombMaskError>;

/// Failures surfaced by filter construction and `get_frame` calls.
///
/// Every variant aborts the call that produced it; nothing is retried and no partial frame is
/// ever returned.
#[derive(thiserror::Error, Debug)]
pub enum CombMaskError {
    /// Invalid options, non-planar input or mismatched clips. Raised before any frame is
    /// processed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A scratch buffer could not be obtained.
    #[error("allocation failure: {bytes} bytes aligned to {align}")]
    Allocation {
        /// Requested size in bytes.
        bytes: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A caller broke a contract that cannot be clamped into something valid.
    #[error("precondition violation: {0}")]
    Precondition(String),

    /// Failure reported by an upstream frame source.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CombMaskError {
    /// Build a [`CombMaskError::Configuration`].
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Build a [`CombMaskError::Allocation`].
    pub fn allocation(bytes: usize, align: usize) -> Self {
        Self::Allocation { bytes, align }
    }

    /// Build a [`CombMaskError::Precondition`].
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }
}
