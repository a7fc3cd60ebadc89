//! Minimal pull-based host: fetch a range of frames from a [`FrameSource`], optionally on a
//! dedicated rayon pool.

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use rayon::prelude::*;

use crate::filter::FrameSource;
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{CombMaskError, CombMaskResult};
use crate::plane::frame::Frame;

/// How [`pull_frames`] schedules its requests.
#[derive(Clone, Debug, Default)]
pub struct PullThreading {
    /// Request frames concurrently on a dedicated thread pool.
    pub parallel: bool,
    /// Worker threads for the pool. `None` uses rayon defaults.
    pub threads: Option<usize>,
}

/// Summary of one [`pull_frames`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PullStats {
    /// Frames returned.
    pub frames_total: u64,
    /// Frames that share storage with the preceding frame, i.e. the source handed out the
    /// same frame twice in a row (a repeated or clamped index).
    pub frames_aliased: u64,
    /// Wall time of the whole pull.
    pub elapsed: Duration,
}

/// Pull `range` from `source` and return the frames in index order.
///
/// The first failing frame aborts the run and its error is returned.
#[tracing::instrument(skip_all, fields(start = range.start.0, end = range.end.0))]
pub fn pull_frames(
    source: Arc<dyn FrameSource>,
    range: Range<FrameIndex>,
    threading: &PullThreading,
) -> CombMaskResult<(Vec<Arc<Frame>>, PullStats)> {
    let started = Instant::now();
    let indices: Vec<FrameIndex> = (range.start.0..range.end.0).map(FrameIndex).collect();

    let results: Vec<CombMaskResult<Arc<Frame>>> = if threading.parallel {
        let pool = build_thread_pool(threading.threads)?;
        pool.install(|| indices.par_iter().map(|&n| source.get_frame(n)).collect())
    } else {
        indices.iter().map(|&n| source.get_frame(n)).collect()
    };

    let frames = results.into_iter().collect::<CombMaskResult<Vec<_>>>()?;
    let frames_aliased = frames
        .windows(2)
        .filter(|w| Arc::ptr_eq(&w[0], &w[1]))
        .count() as u64;
    let stats = PullStats {
        frames_total: frames.len() as u64,
        frames_aliased,
        elapsed: started.elapsed(),
    };
    tracing::debug!(frames = stats.frames_total, elapsed = ?stats.elapsed, "pull finished");
    Ok((frames, stats))
}

fn build_thread_pool(threads: Option<usize>) -> CombMaskResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(CombMaskError::configuration(
            "pull threading 'threads' must be >= 1 when set",
        ));
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .context("failed to build rayon thread pool")
        .map_err(CombMaskError::from)
}
