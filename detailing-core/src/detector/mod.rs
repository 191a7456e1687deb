//! detector — the pluggable vehicle-detection capability
//!
//! The compositor only needs "is there a region to anchor to, and where".
//! That question is answered by a [`VehicleDetector`], with two shipped
//! variants: one that never detects and one that fabricates a lock after a
//! fixed delay. A model-backed detector can implement the same trait without
//! the compositor changing.
//!
//! Elapsed time is passed in by the caller instead of read from the wall
//! clock, so the timed variant is fully deterministic under test.

use std::time::Duration;
use tracing::info;

use crate::camera::RgbFrame;

/// Axis-aligned bounding region, normalized to [0,1] of frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    /// Convert to `(x, y, width, height)` in surface pixels.
    pub fn to_pixels(&self, surface_w: u32, surface_h: u32) -> (f32, f32, f32, f32) {
        (
            self.x * surface_w as f32,
            self.y * surface_h as f32,
            self.width * surface_w as f32,
            self.height * surface_h as f32,
        )
    }

    /// Normalize an absolute surface point into region coordinates, clamped
    /// to [0,1] on each axis — positions never leave the region.
    pub fn normalize_clamped(
        &self,
        px: f32,
        py: f32,
        surface_w: u32,
        surface_h: u32,
    ) -> (f32, f32) {
        let (rx, ry, rw, rh) = self.to_pixels(surface_w, surface_h);
        (
            ((px - rx) / rw).clamp(0.0, 1.0),
            ((py - ry) / rh).clamp(0.0, 1.0),
        )
    }
}

/// The fixed geometry the mock reports, centered and covering 60 % × 50 % of
/// the frame.
pub const DEFAULT_MOCK_REGION: Region = Region {
    x: 0.2,
    y: 0.25,
    width: 0.6,
    height: 0.5,
};

/// How long the mock waits before announcing a lock.
pub const DEFAULT_MOCK_DELAY: Duration = Duration::from_secs(2);

/// One detection poll per rendered frame. `elapsed` is time since the
/// session started, as measured by the caller.
pub trait VehicleDetector {
    fn poll(&mut self, frame: &RgbFrame, elapsed: Duration) -> Option<Region>;

    /// Forget any acquired lock (stream restart).
    fn reset(&mut self) {}
}

/// Never detects. Absolute-anchored overlays render freely; region-relative
/// overlays stay suppressed.
pub struct NullDetector;

impl VehicleDetector for NullDetector {
    fn poll(&mut self, _frame: &RgbFrame, _elapsed: Duration) -> Option<Region> {
        None
    }
}

/// Emits one fixed region once `elapsed` passes the configured delay, then
/// stays detected until reset.
pub struct TimedMockDetector {
    delay: Duration,
    region: Region,
    locked: bool,
}

impl TimedMockDetector {
    pub fn new(delay: Duration, region: Region) -> Self {
        Self {
            delay,
            region,
            locked: false,
        }
    }

    /// The studio default: 2 s delay, centered 60 % × 50 % region.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MOCK_DELAY, DEFAULT_MOCK_REGION)
    }
}

impl VehicleDetector for TimedMockDetector {
    fn poll(&mut self, _frame: &RgbFrame, elapsed: Duration) -> Option<Region> {
        if !self.locked && elapsed >= self.delay {
            self.locked = true;
            info!(after_ms = elapsed.as_millis() as u64, "vehicle lock acquired");
        }
        self.locked.then_some(self.region)
    }

    fn reset(&mut self) {
        self.locked = false;
    }
}
