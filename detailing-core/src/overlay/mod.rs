//! overlay — the transformable raster overlay model
//!
//! An overlay is a decoded RGBA image plus a transform (position, scale,
//! rotation, opacity) and an anchor mode. Transform parameters are only
//! mutated through the clamped setters or [`Overlay::apply`] — the compositor
//! reads overlays immutably, so nothing self-mutates during rendering.

use anyhow::{Context, Result};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::detector::Region;

/// Transform clamp ranges, matching the studio's slider bounds.
pub const MIN_SCALE: f32 = 0.1;
pub const MAX_SCALE: f32 = 2.0;

/// How an overlay's position is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorMode {
    /// Position is in absolute surface pixels.
    #[default]
    Absolute,
    /// Position is normalized [0,1] within the active detection region;
    /// without a region the overlay does not render.
    RegionRelative,
}

/// A partial transform change, reported upward through the update channel and
/// applied to the working copy. `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransformUpdate {
    pub position: Option<(f32, f32)>,
    pub scale: Option<f32>,
    pub rotation: Option<f32>,
    pub opacity: Option<f32>,
}

impl TransformUpdate {
    pub fn position(x: f32, y: f32) -> Self {
        Self {
            position: Some((x, y)),
            ..Self::default()
        }
    }
}

/// A transformable raster overlay. The image is owned and immutable after
/// load; everything else is user-adjustable state.
pub struct Overlay {
    pub id: u64,
    pub name: String,
    image: RgbaImage,
    pub anchor: AnchorMode,
    /// `None` = centered (surface center for absolute anchors, region center
    /// for region-relative ones).
    position: Option<(f32, f32)>,
    scale: f32,
    rotation_deg: f32,
    opacity: f32,
}

impl Overlay {
    pub fn new(id: u64, name: impl Into<String>, image: RgbaImage, anchor: AnchorMode) -> Self {
        Self {
            id,
            name: name.into(),
            image,
            anchor,
            position: None,
            scale: 1.0,
            rotation_deg: 0.0,
            opacity: 1.0,
        }
    }

    /// Decode an overlay asset from disk. PNG is recommended for alpha; any
    /// format the decoder understands is accepted and converted to RGBA.
    pub fn from_path(
        id: u64,
        name: impl Into<String>,
        path: &Path,
        anchor: AnchorMode,
    ) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to load overlay asset: {}", path.display()))?
            .into_rgba8();
        Ok(Self::new(id, name, image, anchor))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn position(&self) -> Option<(f32, f32)> {
        self.position
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn rotation_deg(&self) -> f32 {
        self.rotation_deg
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_position(&mut self, x: f32, y: f32) {
        self.position = Some((x, y));
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale.clamp(MIN_SCALE, MAX_SCALE);
    }

    pub fn set_rotation(&mut self, degrees: f32) {
        self.rotation_deg = degrees.rem_euclid(360.0);
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    /// Apply a partial update through the clamped setters.
    pub fn apply(&mut self, update: &TransformUpdate) {
        if let Some((x, y)) = update.position {
            self.set_position(x, y);
        }
        if let Some(s) = update.scale {
            self.set_scale(s);
        }
        if let Some(r) = update.rotation {
            self.set_rotation(r);
        }
        if let Some(o) = update.opacity {
            self.set_opacity(o);
        }
    }

    /// Half of the rendered footprint on each axis: `image_size × scale / 2`.
    pub fn half_extent(&self) -> (f32, f32) {
        (
            self.image.width() as f32 * self.scale / 2.0,
            self.image.height() as f32 * self.scale / 2.0,
        )
    }

    /// Resolve the overlay's center in surface pixels.
    ///
    /// Returns `None` when the overlay is region-relative and no region is
    /// active — the overlay is suppressed for that frame.
    pub fn resolve_center(
        &self,
        region: Option<&Region>,
        surface_w: u32,
        surface_h: u32,
    ) -> Option<(f32, f32)> {
        match self.anchor {
            AnchorMode::Absolute => {
                let (x, y) = self
                    .position
                    .unwrap_or((surface_w as f32 / 2.0, surface_h as f32 / 2.0));
                Some((x, y))
            }
            AnchorMode::RegionRelative => {
                let region = region?;
                let (rx, ry, rw, rh) = region.to_pixels(surface_w, surface_h);
                let (nx, ny) = self.position.unwrap_or((0.5, 0.5));
                Some((rx + nx * rw, ry + ny * rh))
            }
        }
    }
}

// ── Asset loading ────────────────────────────────────────────────────────────

/// Everything needed to load one overlay into a working list.
#[derive(Debug, Clone)]
pub struct OverlayAsset {
    pub name: String,
    pub path: PathBuf,
    pub anchor: AnchorMode,
    pub position: Option<(f32, f32)>,
    pub scale: f32,
    pub rotation: f32,
    pub opacity: f32,
}

impl OverlayAsset {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            anchor: AnchorMode::Absolute,
            position: None,
            scale: 1.0,
            rotation: 0.0,
            opacity: 1.0,
        }
    }
}

/// Load a list of overlay assets, assigning ids in order.
///
/// A broken or missing asset is logged and skipped — one bad URL must not
/// take the whole preview down.
pub fn load_overlays(assets: &[OverlayAsset]) -> Vec<Overlay> {
    let mut overlays = Vec::with_capacity(assets.len());
    for (i, asset) in assets.iter().enumerate() {
        match Overlay::from_path(i as u64, asset.name.clone(), &asset.path, asset.anchor) {
            Ok(mut overlay) => {
                if let Some((x, y)) = asset.position {
                    overlay.set_position(x, y);
                }
                overlay.set_scale(asset.scale);
                overlay.set_rotation(asset.rotation);
                overlay.set_opacity(asset.opacity);
                overlays.push(overlay);
            }
            Err(e) => {
                warn!(overlay = %asset.name, "skipping overlay: {e:#}");
            }
        }
    }
    overlays
}
