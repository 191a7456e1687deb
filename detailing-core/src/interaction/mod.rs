//! interaction — pointer mapping, selection, and dragging
//!
//! Pointer events arrive in display coordinates (the CSS-scaled view of the
//! surface) and must be mapped into surface pixel space before any hit test
//! or drag math. The display and the backing store rarely agree 1:1 — high
//! DPI and responsive layouts both break that assumption.
//!
//! Selection is a single optional id: selecting one overlay deselects any
//! other, and all drag math is a no-op without a selection. Position changes
//! are reported as [`TransformUpdate`] records through a caller callback —
//! this module never owns the overlay list.

use tracing::debug;

use crate::detector::Region;
use crate::overlay::{AnchorMode, Overlay, TransformUpdate};

/// The displayed size of the surface, in display (CSS) pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// Map a pointer position from display space into surface pixel space.
    pub fn to_surface(
        &self,
        surface_w: u32,
        surface_h: u32,
        px: f32,
        py: f32,
    ) -> (f32, f32) {
        let scale_x = surface_w as f32 / self.width;
        let scale_y = surface_h as f32 / self.height;
        (px * scale_x, py * scale_y)
    }
}

/// Test overlays in reverse z-order (topmost drawn last, so tested first)
/// against their axis-aligned bounds at the current transform. The box test
/// ignores rotation.
pub fn hit_test(
    overlays: &[Overlay],
    region: Option<&Region>,
    surface_w: u32,
    surface_h: u32,
    sx: f32,
    sy: f32,
) -> Option<u64> {
    for overlay in overlays.iter().rev() {
        let Some((cx, cy)) = overlay.resolve_center(region, surface_w, surface_h) else {
            continue;
        };
        let (hw, hh) = overlay.half_extent();
        if sx >= cx - hw && sx <= cx + hw && sy >= cy - hh && sy <= cy + hh {
            return Some(overlay.id);
        }
    }
    None
}

struct DragAnchor {
    last_x: f32,
    last_y: f32,
}

/// Selection + drag state for one interaction surface.
#[derive(Default)]
pub struct InteractionState {
    selected: Option<u64>,
    drag: Option<DragAnchor>,
}

impl InteractionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently selected overlay id, if any. Never more than one.
    pub fn selected(&self) -> Option<u64> {
        self.selected
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Drop the selection (e.g. the selected overlay was removed).
    pub fn deselect(&mut self) {
        self.selected = None;
        self.drag = None;
    }

    /// Clear all interaction state (teardown).
    pub fn reset(&mut self) {
        self.deselect();
    }

    /// Pointer pressed at display coordinates. Hits select (replacing any
    /// previous selection) and begin a drag; misses deselect.
    pub fn pointer_down(
        &mut self,
        overlays: &[Overlay],
        region: Option<&Region>,
        surface_w: u32,
        surface_h: u32,
        viewport: Viewport,
        px: f32,
        py: f32,
    ) -> Option<u64> {
        let (sx, sy) = viewport.to_surface(surface_w, surface_h, px, py);
        match hit_test(overlays, region, surface_w, surface_h, sx, sy) {
            Some(id) => {
                debug!(overlay = id, "overlay selected");
                self.selected = Some(id);
                self.drag = Some(DragAnchor {
                    last_x: sx,
                    last_y: sy,
                });
            }
            None => self.deselect(),
        }
        self.selected
    }

    /// Pointer moved. While a drag is active, the surface-space delta from
    /// the previous sample moves the selected overlay; region-relative
    /// positions are re-normalized against the region and clamped to [0,1].
    pub fn pointer_move(
        &mut self,
        overlays: &[Overlay],
        region: Option<&Region>,
        surface_w: u32,
        surface_h: u32,
        viewport: Viewport,
        px: f32,
        py: f32,
        mut on_update: impl FnMut(u64, TransformUpdate),
    ) {
        let Some(selected) = self.selected else {
            return;
        };
        let Some(drag) = self.drag.as_mut() else {
            return;
        };

        let (sx, sy) = viewport.to_surface(surface_w, surface_h, px, py);
        let (dx, dy) = (sx - drag.last_x, sy - drag.last_y);
        drag.last_x = sx;
        drag.last_y = sy;

        let Some(overlay) = overlays.iter().find(|o| o.id == selected) else {
            return;
        };
        let Some((cx, cy)) = overlay.resolve_center(region, surface_w, surface_h) else {
            return;
        };

        let update = match overlay.anchor {
            AnchorMode::Absolute => TransformUpdate::position(cx + dx, cy + dy),
            AnchorMode::RegionRelative => {
                let Some(region) = region else { return };
                let (nx, ny) = region.normalize_clamped(cx + dx, cy + dy, surface_w, surface_h);
                TransformUpdate::position(nx, ny)
            }
        };
        on_update(selected, update);
    }

    /// Pointer released or left the surface: the drag ends, selection stays.
    pub fn pointer_up(&mut self) {
        self.drag = None;
    }
}
