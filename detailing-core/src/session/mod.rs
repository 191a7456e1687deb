//! session — wiring for one preview surface
//!
//! `PreviewSession` owns the working copy of the overlay list and connects a
//! frame source, a detector, the compositor, and the interaction state into
//! a per-frame loop. The caller supplies the authoritative overlay list and
//! receives transform changes back through the update callback.
//!
//! Everything runs on one thread: pointer handlers mutate plain state that
//! the next `tick` reads. The camera stream is the only external resource —
//! acquired in `initialize`, released in `teardown` on every exit path
//! (including errors and `Drop`) so a live camera indicator is never leaked.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::camera::{CameraConstraints, CameraFeed, FrameSource, RgbFrame};
use crate::capture;
use crate::compositor::{OverlayCompositor, RenderOptions, SurfaceSize};
use crate::detector::{Region, VehicleDetector};
use crate::interaction::{InteractionState, Viewport};
use crate::overlay::{Overlay, TransformUpdate};

/// Placeholder fill shown while no feed is available.
const PLACEHOLDER_RGB: [u8; 3] = [24, 24, 27];

/// Whether the session currently has a live feed. Camera problems are a
/// *status*, not an error — the session keeps rendering placeholder frames
/// and accepting configuration in the degraded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// No source attached yet (or torn down).
    Idle,
    /// Streaming frames.
    Live,
    /// Camera denied, absent, or broken mid-stream.
    Unavailable,
}

type UpdateCallback = Box<dyn FnMut(u64, &TransformUpdate)>;

pub struct PreviewSession {
    source: Option<Box<dyn FrameSource>>,
    status: FeedStatus,
    detector: Box<dyn VehicleDetector>,
    compositor: OverlayCompositor,
    interaction: InteractionState,
    overlays: Vec<Overlay>,
    region: Option<Region>,
    started: Instant,
    fallback_dims: (u32, u32),
    surface_dims: (u32, u32),
    last_frame: Option<RgbFrame>,
    on_update: Option<UpdateCallback>,
    torn_down: bool,
}

impl PreviewSession {
    pub fn new(detector: Box<dyn VehicleDetector>, size: SurfaceSize) -> Self {
        let fallback = CameraConstraints::default();
        Self {
            source: None,
            status: FeedStatus::Idle,
            detector,
            compositor: OverlayCompositor::new(size),
            interaction: InteractionState::new(),
            overlays: Vec::new(),
            region: None,
            started: Instant::now(),
            fallback_dims: (fallback.ideal_width, fallback.ideal_height),
            surface_dims: (fallback.ideal_width, fallback.ideal_height),
            last_frame: None,
            on_update: None,
            torn_down: false,
        }
    }

    // ── Feed lifecycle ───────────────────────────────────────────────────────

    /// Request a camera and begin streaming. Never propagates the failure:
    /// a denied or absent camera leaves the session in the `Unavailable`
    /// state, rendering placeholder frames.
    pub fn initialize(&mut self, constraints: CameraConstraints) {
        self.fallback_dims = (constraints.ideal_width, constraints.ideal_height);
        match CameraFeed::open(constraints) {
            Ok(feed) => self.attach_source(Box::new(feed)),
            Err(e) => {
                warn!("camera unavailable: {e:#}");
                self.status = FeedStatus::Unavailable;
            }
        }
    }

    /// Attach an already-open source (still image, test double, …).
    ///
    /// If `teardown` already ran — the caller navigated away while the open
    /// was in flight — the source is closed immediately instead of attached.
    pub fn attach_source(&mut self, mut source: Box<dyn FrameSource>) {
        if self.torn_down {
            source.close();
            return;
        }
        self.close_source();
        self.source = Some(source);
        self.status = FeedStatus::Live;
        self.started = Instant::now();
        self.detector.reset();
        self.region = None;
    }

    pub fn status(&self) -> FeedStatus {
        self.status
    }

    /// The detection region reported by the last poll, if any.
    pub fn detection_region(&self) -> Option<Region> {
        self.region
    }

    fn close_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }

    /// Stop the feed and clear interaction state. Idempotent; also invoked
    /// from `Drop` so no exit path leaves the camera running.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.close_source();
        self.interaction.reset();
        self.overlays.clear();
        self.region = None;
        self.last_frame = None;
        self.status = FeedStatus::Idle;
    }

    // ── Overlay working copy ─────────────────────────────────────────────────

    /// Replace the working overlay list (the caller remains authoritative).
    pub fn set_overlays(&mut self, overlays: Vec<Overlay>) {
        self.interaction.deselect();
        self.overlays = overlays;
    }

    pub fn add_overlay(&mut self, overlay: Overlay) {
        self.overlays.push(overlay);
    }

    pub fn remove_overlay(&mut self, id: u64) {
        self.overlays.retain(|o| o.id != id);
        if self.interaction.selected() == Some(id) {
            self.interaction.deselect();
        }
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn selected(&self) -> Option<u64> {
        self.interaction.selected()
    }

    /// Register the parent-supplied update channel. Every transform change —
    /// drag or slider — is reported as `(overlay_id, partial_transform)`.
    pub fn set_on_update(&mut self, callback: UpdateCallback) {
        self.on_update = Some(callback);
    }

    /// Apply a partial transform (slider input or an upstream echo) to the
    /// working copy and report it through the update channel.
    pub fn apply_update(&mut self, id: u64, update: TransformUpdate) {
        if let Some(overlay) = self.overlays.iter_mut().find(|o| o.id == id) {
            overlay.apply(&update);
        }
        if let Some(cb) = self.on_update.as_mut() {
            cb(id, &update);
        }
    }

    // ── Pointer events (display coordinates) ─────────────────────────────────

    pub fn pointer_down(&mut self, viewport: Viewport, px: f32, py: f32) -> Option<u64> {
        let (w, h) = self.surface_dims;
        self.interaction
            .pointer_down(&self.overlays, self.region.as_ref(), w, h, viewport, px, py)
    }

    pub fn pointer_move(&mut self, viewport: Viewport, px: f32, py: f32) {
        let (w, h) = self.surface_dims;
        let mut updates = Vec::new();
        self.interaction.pointer_move(
            &self.overlays,
            self.region.as_ref(),
            w,
            h,
            viewport,
            px,
            py,
            |id, update| updates.push((id, update)),
        );
        for (id, update) in updates {
            self.apply_update(id, update);
        }
    }

    pub fn pointer_up(&mut self) {
        self.interaction.pointer_up();
    }

    /// Pointer left the surface — same contract as release.
    pub fn pointer_leave(&mut self) {
        self.interaction.pointer_up();
    }

    // ── Rendering ────────────────────────────────────────────────────────────

    /// Render one frame using the session's own clock.
    pub fn tick(&mut self) -> Result<&RgbFrame> {
        let elapsed = self.started.elapsed();
        self.render_at(elapsed)
    }

    /// Render one frame at an explicit elapsed time (deterministic in tests).
    pub fn render_at(&mut self, elapsed: Duration) -> Result<&RgbFrame> {
        let mut frame = None;
        let mut feed_broke = false;
        if let Some(source) = self.source.as_mut() {
            match source.next_frame() {
                Ok(f) => frame = Some(f),
                Err(e) => {
                    warn!("frame read failed, degrading to placeholder: {e:#}");
                    feed_broke = true;
                }
            }
        }
        if feed_broke {
            self.close_source();
            self.status = FeedStatus::Unavailable;
        }
        let frame = frame.unwrap_or_else(|| {
            RgbFrame::filled(self.fallback_dims.0, self.fallback_dims.1, PLACEHOLDER_RGB)
        });

        self.region = self.detector.poll(&frame, elapsed);

        let opts = RenderOptions {
            overlays: &self.overlays,
            region: self.region,
            selected: self.interaction.selected(),
        };
        let surface = self.compositor.render(&frame, &opts)?;
        self.surface_dims = (surface.width, surface.height);
        self.last_frame = Some(frame);
        Ok(surface)
    }

    /// Drive the render loop until `cancel` is set or `on_frame` returns
    /// `false`. Teardown is guaranteed on every exit path, errors included.
    pub fn run(
        &mut self,
        cancel: &AtomicBool,
        mut on_frame: impl FnMut(&RgbFrame) -> bool,
    ) -> Result<()> {
        let result = (|| -> Result<()> {
            while !cancel.load(Ordering::Relaxed) {
                let surface = self.tick()?;
                if !on_frame(surface) {
                    break;
                }
            }
            Ok(())
        })();
        self.teardown();
        result
    }

    // ── Capture ──────────────────────────────────────────────────────────────

    /// Export the current composition as a PNG into `dir`.
    ///
    /// The still is re-rendered from the most recent raw frame with the
    /// selection chrome disabled — the export is the composition, not the
    /// editing state.
    pub fn capture_still(&mut self, dir: &Path) -> Result<PathBuf> {
        let frame = self
            .last_frame
            .as_ref()
            .context("no frame rendered yet — nothing to capture")?;

        let label = self
            .interaction
            .selected()
            .and_then(|id| self.overlays.iter().find(|o| o.id == id))
            .or_else(|| self.overlays.first())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "studio".to_string());

        let opts = RenderOptions {
            overlays: &self.overlays,
            region: self.region,
            selected: None,
        };
        let surface = self.compositor.render(frame, &opts)?;
        let path = capture::export_still(surface, dir, &label)?;
        info!(path = %path.display(), "composition captured");
        Ok(path)
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
