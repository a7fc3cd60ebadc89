use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use combmask::{
    ClipSource, CombMaskError, CombMaskFilter, CombMaskOpts, CombMaskResult, EvalContext,
    FormatInfo, Frame, FrameIndex, FrameSource, IsCombed, IsCombedOpts, MaskedMergeFilter,
    MaskedMergeOpts, Metric, PixelLayout, Plane, PlaneKind, ScratchAllocator, ScratchBuffer,
    ScratchMode, SimdLevel, SimdRequest,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn request_for(level: SimdLevel) -> SimdRequest {
    match level {
        SimdLevel::Scalar => SimdRequest::Scalar,
        SimdLevel::Vector128 => SimdRequest::Vector128,
        SimdLevel::Vector256 => SimdRequest::Vector256,
    }
}

/// Every plane of a `w`x`h` frame filled by `f(kind, x, y)`.
fn frame(
    layout: PixelLayout,
    w: u32,
    h: u32,
    mut f: impl FnMut(PlaneKind, usize, usize) -> u8,
) -> Frame {
    let fmt = FormatInfo::new(w, h, layout).unwrap();
    let planes = fmt
        .planes()
        .iter()
        .map(|&kind| {
            let (pw, ph) = fmt.plane_dimensions(kind);
            Plane::from_fn(pw, ph, |x, y| f(kind, x, y)).unwrap()
        })
        .collect();
    Frame::from_planes(fmt, planes).unwrap()
}

fn flat(layout: PixelLayout, w: u32, h: u32, v: u8) -> Frame {
    frame(layout, w, h, |_, _, _| v)
}

fn interlaced(layout: PixelLayout, w: u32, h: u32) -> Frame {
    frame(layout, w, h, |_, _, y| if y % 2 == 0 { 0 } else { 255 })
}

fn clip(frames: Vec<Frame>) -> Arc<ClipSource> {
    let fmt = frames[0].format();
    Arc::new(ClipSource::from_frames(fmt, frames).unwrap())
}

fn samples(f: &Frame, kind: PlaneKind) -> Vec<u8> {
    f.plane(kind).unwrap().to_vec()
}

#[test]
fn uniform_field_never_combs() {
    init_tracing();
    let src = clip(vec![flat(PixelLayout::Yuv420, 37, 19, 128)]);
    for level in SimdLevel::available() {
        for metric in [Metric::Zero, Metric::One] {
            for cthresh in [0, 1, 6, 255] {
                let filter = CombMaskFilter::new(
                    src.clone(),
                    CombMaskOpts {
                        cthresh: Some(cthresh),
                        mthresh: 0,
                        metric,
                        simd: request_for(level),
                        ..CombMaskOpts::default()
                    },
                )
                .unwrap();
                let out = filter.get_frame(FrameIndex(0)).unwrap();
                for kind in PlaneKind::ALL {
                    assert!(
                        samples(&out, kind).iter().all(|&v| v == 0),
                        "{level:?} {metric:?} cthresh={cthresh} {kind:?}"
                    );
                }
            }
        }
    }
}

#[test]
fn alternating_rows_comb_everywhere() {
    init_tracing();
    let src = clip(vec![interlaced(PixelLayout::Yuv444, 40, 12)]);
    for level in SimdLevel::available() {
        for expand in [false, true] {
            let filter = CombMaskFilter::new(
                src.clone(),
                CombMaskOpts {
                    cthresh: Some(6),
                    mthresh: 0,
                    expand,
                    simd: request_for(level),
                    ..CombMaskOpts::default()
                },
            )
            .unwrap();
            let out = filter.get_frame(FrameIndex(0)).unwrap();
            for kind in PlaneKind::ALL {
                assert!(
                    samples(&out, kind).iter().all(|&v| v == 0xFF),
                    "{level:?} expand={expand} {kind:?}"
                );
            }
        }
    }
}

#[test]
fn without_motion_the_mask_is_the_raw_comb_mask() {
    init_tracing();
    let fmt = FormatInfo::new(29, 11, PixelLayout::Gray).unwrap();
    let mut seed = 0x2545_F491u32;
    let noisy = frame(PixelLayout::Gray, 29, 11, |_, _, _| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        seed as u8
    });
    let src = clip(vec![flat(PixelLayout::Gray, 29, 11, 0), noisy]);

    let filter = CombMaskFilter::new(
        src.clone(),
        CombMaskOpts {
            mthresh: 0,
            expand: false,
            ..CombMaskOpts::default()
        },
    )
    .unwrap();
    let before = src.fetch_count();
    let out = filter.get_frame(FrameIndex(1)).unwrap();
    assert_eq!(src.fetch_count() - before, 1, "previous frame must not be pulled");

    let input = src.get_frame(FrameIndex(1)).unwrap();
    let mut expected = Frame::new_blank(fmt, 32).unwrap();
    filter
        .kernels()
        .comb(
            &mut expected.plane_mut(PlaneKind::Y).unwrap(),
            input.plane(PlaneKind::Y).unwrap(),
            6,
        )
        .unwrap();
    assert_eq!(
        samples(&out, PlaneKind::Y),
        samples(&expected, PlaneKind::Y)
    );
}

#[test]
fn zero_mi_always_fetches_alt_and_merges() {
    init_tracing();
    let base = clip(vec![flat(PixelLayout::Yuv420, 16, 16, 10)]);
    let alt = clip(vec![flat(PixelLayout::Yuv420, 16, 16, 200)]);
    let mask = clip(vec![frame(PixelLayout::Yuv420, 16, 16, |_, x, _| {
        if x == 0 { 0xFF } else { 0 }
    })]);
    let merge = MaskedMergeFilter::new(
        base.clone(),
        alt.clone(),
        mask,
        MaskedMergeOpts {
            mi: 0,
            ..MaskedMergeOpts::default()
        },
    )
    .unwrap();

    let out = merge.get_frame(FrameIndex(0)).unwrap();
    assert_eq!(alt.fetch_count(), 1);
    assert!(!Arc::ptr_eq(&out, &base.get_frame(FrameIndex(0)).unwrap()));
    for kind in PlaneKind::ALL {
        let p = out.plane(kind).unwrap();
        for y in 0..p.height() {
            assert_eq!(p.row(y)[0], 200, "{kind:?} row {y}");
            assert!(p.row(y)[1..].iter().all(|&v| v == 10), "{kind:?} row {y}");
        }
    }
}

#[test]
fn comb_mask_drives_masked_merge() {
    init_tracing();
    let (w, h) = (32, 32);
    let clean = || flat(PixelLayout::Yuv420, w, h, 90);
    let base = clip(vec![clean(), interlaced(PixelLayout::Yuv420, w, h), clean()]);
    let alt = clip(vec![flat(PixelLayout::Yuv420, w, h, 77)]);

    let mask = Arc::new(
        CombMaskFilter::new(
            base.clone(),
            CombMaskOpts {
                mthresh: 0,
                ..CombMaskOpts::default()
            },
        )
        .unwrap(),
    );
    let merge = MaskedMergeFilter::new(
        base.clone(),
        alt.clone(),
        mask,
        MaskedMergeOpts {
            mi: 40,
            chroma: false,
            ..MaskedMergeOpts::default()
        },
    )
    .unwrap();

    let first = merge.get_frame(FrameIndex(0)).unwrap();
    assert!(Arc::ptr_eq(&first, &base.get_frame(FrameIndex(0)).unwrap()));
    assert_eq!(alt.fetch_count(), 0);

    let combed = merge.get_frame(FrameIndex(1)).unwrap();
    assert_eq!(alt.fetch_count(), 1);
    assert!(samples(&combed, PlaneKind::Y).iter().all(|&v| v == 77));
    let base_u = samples(&base.get_frame(FrameIndex(1)).unwrap(), PlaneKind::U);
    assert_eq!(samples(&combed, PlaneKind::U), base_u);
}

#[test]
fn is_combed_answers_per_frame() {
    init_tracing();
    let src = clip(vec![
        flat(PixelLayout::Yuv420, 32, 32, 50),
        interlaced(PixelLayout::Yuv420, 32, 32),
    ]);
    let check = IsCombed::new(src, IsCombedOpts::default()).unwrap();
    assert!(!check.evaluate(&EvalContext::at(FrameIndex(0))).unwrap());
    assert!(check.evaluate(&EvalContext::at(FrameIndex(1))).unwrap());

    let err = check.evaluate(&EvalContext::default()).unwrap_err();
    assert!(matches!(err, CombMaskError::Precondition(_)));
}

#[test]
fn mismatched_clips_are_rejected_at_construction() {
    let a = clip(vec![flat(PixelLayout::Yuv420, 16, 16, 0)]);
    let b = clip(vec![flat(PixelLayout::Yuv444, 16, 16, 0)]);
    let c = clip(vec![flat(PixelLayout::Yuv420, 16, 8, 0)]);

    let err = MaskedMergeFilter::new(a.clone(), b, a.clone(), MaskedMergeOpts::default())
        .unwrap_err();
    assert!(err.to_string().contains("colorspaces"), "{err}");
    let err = MaskedMergeFilter::new(a.clone(), a, c, MaskedMergeOpts::default()).unwrap_err();
    assert!(err.to_string().contains("resolutions"), "{err}");
}

struct FailingSource {
    format: FormatInfo,
}

impl FrameSource for FailingSource {
    fn format(&self) -> FormatInfo {
        self.format
    }

    fn get_frame(&self, n: FrameIndex) -> CombMaskResult<Arc<Frame>> {
        Err(anyhow::anyhow!("decoder lost frame {}", n.0).into())
    }
}

#[test]
fn upstream_failures_propagate_unchanged() {
    init_tracing();
    let format = FormatInfo::new(16, 16, PixelLayout::Gray).unwrap();
    let filter =
        CombMaskFilter::new(Arc::new(FailingSource { format }), CombMaskOpts::default()).unwrap();
    let err = filter.get_frame(FrameIndex(3)).unwrap_err();
    assert!(matches!(err, CombMaskError::Other(_)));
    assert_eq!(err.to_string(), "decoder lost frame 3");
}

#[derive(Default)]
struct CountingAllocator {
    live: AtomicUsize,
    allocations: AtomicUsize,
}

impl ScratchAllocator for CountingAllocator {
    fn allocate(&self, size: usize, align: usize) -> CombMaskResult<ScratchBuffer> {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.allocations.fetch_add(1, Ordering::SeqCst);
        ScratchBuffer::zeroed(size, align)
    }

    fn free(&self, buffer: ScratchBuffer) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        drop(buffer);
    }
}

#[test]
fn per_call_scratch_is_released_after_every_frame() {
    init_tracing();
    let src = clip(vec![
        interlaced(PixelLayout::Yuv420, 24, 8),
        flat(PixelLayout::Yuv420, 24, 8, 3),
    ]);
    let alloc = Arc::new(CountingAllocator::default());
    let filter =
        CombMaskFilter::with_allocator(src, CombMaskOpts::default(), alloc.clone()).unwrap();
    for n in 0..4 {
        filter.get_frame(FrameIndex(n)).unwrap();
        assert_eq!(alloc.live.load(Ordering::SeqCst), 0);
    }
    assert_eq!(alloc.allocations.load(Ordering::SeqCst), 4);
}

#[test]
fn shared_scratch_is_allocated_once() {
    init_tracing();
    let src = clip(vec![interlaced(PixelLayout::Gray, 24, 8)]);
    let alloc = Arc::new(CountingAllocator::default());
    let filter = CombMaskFilter::with_allocator(
        src,
        CombMaskOpts {
            scratch: ScratchMode::Shared,
            ..CombMaskOpts::default()
        },
        alloc.clone(),
    )
    .unwrap();
    for n in 0..3 {
        filter.get_frame(FrameIndex(n)).unwrap();
    }
    assert_eq!(alloc.allocations.load(Ordering::SeqCst), 1);
    assert_eq!(alloc.live.load(Ordering::SeqCst), 1);
    drop(filter);
    assert_eq!(alloc.live.load(Ordering::SeqCst), 0);
}

#[test]
fn options_parse_from_json() {
    let comb = CombMaskOpts::from_json_str(r#"{"cthresh": 12, "expand": false}"#).unwrap();
    assert_eq!(comb.effective_cthresh(), 12);
    assert!(!comb.expand);
    assert_eq!(comb.mthresh, 9);

    let merge = MaskedMergeOpts::from_json_str(r#"{"mi": 0, "block_width": 32}"#).unwrap();
    assert_eq!((merge.mi, merge.block_width, merge.block_height), (0, 32, 8));

    let check = IsCombedOpts::from_json_str(r#"{"simd": "c", "metric": 1}"#).unwrap();
    assert_eq!(check.simd, SimdRequest::Scalar);
    assert_eq!(check.metric, Metric::One);

    let err = MaskedMergeOpts::from_json_str(r#"{"blockx": 8}"#).unwrap_err();
    assert!(matches!(err, CombMaskError::Configuration(_)));
}

#[test]
fn invalid_block_sizes_are_configuration_errors() {
    let src = clip(vec![flat(PixelLayout::Gray, 16, 16, 0)]);
    let err = IsCombed::new(
        src,
        IsCombedOpts {
            block_width: 12,
            ..IsCombedOpts::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, CombMaskError::Configuration(_)));
}
