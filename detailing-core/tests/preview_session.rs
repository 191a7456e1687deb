//! End-to-end session flow against a synthetic frame source: mock detection,
//! pointer selection and dragging, update reporting, capture, teardown.
//! No camera and no wall clock anywhere.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use detailing_core::camera::{FrameSource, RgbFrame};
use detailing_core::compositor::SurfaceSize;
use detailing_core::detector::TimedMockDetector;
use detailing_core::interaction::Viewport;
use detailing_core::overlay::{AnchorMode, Overlay, TransformUpdate};
use detailing_core::session::{FeedStatus, PreviewSession};
use detailing_core::Result;
use image::RgbaImage;

/// 1000x800 mid-gray frames, with close calls counted.
struct SyntheticSource {
    closed: Arc<AtomicU32>,
    seq: u64,
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<RgbFrame> {
        self.seq += 1;
        let mut frame = RgbFrame::filled(1000, 800, [90, 90, 90]);
        frame.seq = self.seq;
        Ok(frame)
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn rgba(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(w, h, image::Rgba(px))
}

#[test]
fn full_preview_flow() {
    let closed = Arc::new(AtomicU32::new(0));
    let mut session = PreviewSession::new(
        Box::new(TimedMockDetector::with_defaults()),
        SurfaceSize::MatchSource,
    );
    session.attach_source(Box::new(SyntheticSource {
        closed: closed.clone(),
        seq: 0,
    }));
    assert_eq!(session.status(), FeedStatus::Live);

    let wrap = Overlay::new(
        1,
        "Glossy Wrap",
        rgba(40, 40, [255, 0, 0, 255]),
        AnchorMode::RegionRelative,
    );
    let mut badge = Overlay::new(
        2,
        "badge",
        rgba(60, 30, [0, 0, 255, 255]),
        AnchorMode::Absolute,
    );
    badge.set_position(900.0, 150.0);
    session.set_overlays(vec![wrap, badge]);

    let updates: Arc<Mutex<Vec<(u64, TransformUpdate)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    session.set_on_update(Box::new(move |id, update| {
        sink.lock().unwrap().push((id, *update));
    }));

    // The surface is displayed 1:1 in this test.
    let viewport = Viewport {
        width: 1000.0,
        height: 800.0,
    };

    // Before the mock's delay elapses there is no region, so the
    // region-anchored wrap is suppressed: a press at the frame center finds
    // nothing and clears selection.
    session.render_at(Duration::from_secs(1)).unwrap();
    assert_eq!(session.detection_region(), None);
    assert_eq!(session.pointer_down(viewport, 500.0, 400.0), None);

    // After the delay the region is locked and the wrap anchors to its
    // center, (500, 400) on this surface.
    session.render_at(Duration::from_secs(2)).unwrap();
    assert!(session.detection_region().is_some());
    assert_eq!(session.pointer_down(viewport, 500.0, 400.0), Some(1));
    assert_eq!(session.selected(), Some(1));

    // Drag far past the region's top-left corner: the normalized position
    // clamps to (0, 0) and the change is reported upward.
    session.pointer_move(viewport, 50.0, 50.0);
    session.pointer_up();
    assert_eq!(
        *updates.lock().unwrap(),
        vec![(1, TransformUpdate::position(0.0, 0.0))]
    );
    let wrap = &session.overlays()[0];
    assert_eq!(wrap.position(), Some((0.0, 0.0)));

    // Selecting the absolute badge deselects the wrap; dragging it moves by
    // exactly the surface-space delta.
    session.render_at(Duration::from_secs(3)).unwrap();
    assert_eq!(session.pointer_down(viewport, 900.0, 150.0), Some(2));
    session.pointer_move(viewport, 910.0, 145.0);
    session.pointer_up();
    let badge = &session.overlays()[1];
    assert_eq!(badge.position(), Some((910.0, 145.0)));

    // Slider-style updates go through the same channel, clamped.
    session.apply_update(2, TransformUpdate {
        scale: Some(5.0),
        ..TransformUpdate::default()
    });
    assert_eq!(session.overlays()[1].scale(), 2.0);
    assert_eq!(updates.lock().unwrap().len(), 3);

    // Capture excludes the selection chrome but reflects the composition.
    let dir = std::env::temp_dir().join(format!("detailing-session-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = session.capture_still(&dir).unwrap();
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("ar-preview-badge-"));
    let exported = image::open(&path).unwrap().into_rgb8();
    assert_eq!((exported.width(), exported.height()), (1000, 800));
    std::fs::remove_dir_all(&dir).ok();

    // Teardown stops the stream exactly once, selection included.
    session.teardown();
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(session.status(), FeedStatus::Idle);
    assert_eq!(session.selected(), None);
    drop(session);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn run_loop_survives_a_source_error_and_still_tears_down() {
    struct FlakySource {
        closed: Arc<AtomicU32>,
        frames: u32,
    }

    impl FrameSource for FlakySource {
        fn next_frame(&mut self) -> Result<RgbFrame> {
            self.frames += 1;
            if self.frames > 2 {
                anyhow::bail!("device unplugged");
            }
            Ok(RgbFrame::filled(320, 240, [10, 10, 10]))
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    let closed = Arc::new(AtomicU32::new(0));
    let mut session = PreviewSession::new(
        Box::new(TimedMockDetector::with_defaults()),
        SurfaceSize::MatchSource,
    );
    session.attach_source(Box::new(FlakySource {
        closed: closed.clone(),
        frames: 0,
    }));

    let cancel = std::sync::atomic::AtomicBool::new(false);
    let mut sizes = Vec::new();
    session
        .run(&cancel, |surface| {
            sizes.push((surface.width, surface.height));
            sizes.len() < 5
        })
        .unwrap();

    // Two live frames, then placeholder frames at the fallback size — the
    // loop degrades instead of dying, and the source is closed exactly once.
    assert_eq!(sizes.len(), 5);
    assert_eq!(sizes[0], (320, 240));
    assert_eq!(sizes[4], (1280, 720));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
