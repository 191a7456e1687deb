//! compositor — per-frame video + overlay rendering
//!
//! Given the current video frame and a caller-supplied ordered overlay list,
//! produce the composited surface: video scaled to the surface's backing
//! pixels, then each overlay drawn with translate → rotate → scale applied
//! around its anchor point, alpha-blended with `pixel_alpha × opacity`.
//!
//! Each overlay's transform is computed from scratch, so state never leaks
//! from one overlay to the next. Surface dimensions are re-read from the
//! incoming frame every render — camera resolution can change mid-stream.

use anyhow::{Context, Result};
use fast_image_resize as fr;
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use nalgebra::{Matrix2, Vector2};
use rayon::prelude::*;

use crate::camera::RgbFrame;
use crate::detector::Region;
use crate::overlay::Overlay;

/// Detection-box stroke color.
const DETECTION_COLOR: [u8; 3] = [34, 197, 94];
/// Guide and selection chrome color.
const ACCENT_COLOR: [u8; 3] = [252, 211, 77];
/// Side length of a selection corner handle, in surface pixels.
const HANDLE_SIZE: i32 = 10;
/// Crosshair arm length, in surface pixels.
const CROSSHAIR_ARM: f32 = 30.0;
/// Detection-box stroke width (nested 1-px rectangles).
const BOX_STROKE: i32 = 3;

/// How the surface's backing pixel dimensions are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceSize {
    /// Track the video source's native resolution, re-read every frame.
    #[default]
    MatchSource,
    /// Fixed dimensions; the video frame is scaled to fit exactly.
    Fixed(u32, u32),
}

/// Per-render inputs. The compositor never owns the overlay list — it renders
/// whatever the caller supplies, in order (later entries draw on top).
pub struct RenderOptions<'a> {
    pub overlays: &'a [Overlay],
    pub region: Option<Region>,
    /// Overlay to decorate with the selection border and handles, if any.
    /// Captures pass `None` so exported stills exclude the editing chrome.
    pub selected: Option<u64>,
}

/// Reusable rendering context to avoid per-frame allocations.
pub struct OverlayCompositor {
    size: SurfaceSize,
    resizer: fr::Resizer,
    surface: RgbFrame,
}

impl OverlayCompositor {
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            size,
            resizer: fr::Resizer::new(),
            surface: RgbFrame {
                data: Vec::new(),
                width: 0,
                height: 0,
                seq: 0,
            },
        }
    }

    pub fn surface(&self) -> &RgbFrame {
        &self.surface
    }

    /// Composite one frame. Returns the finished surface.
    pub fn render(&mut self, frame: &RgbFrame, opts: &RenderOptions<'_>) -> Result<&RgbFrame> {
        let (tw, th) = match self.size {
            SurfaceSize::MatchSource => (frame.width, frame.height),
            SurfaceSize::Fixed(w, h) => (w, h),
        };
        self.blit_video(frame, tw, th)?;

        if let Some(region) = opts.region {
            draw_detection_box(&mut self.surface, &region);
        }

        // Overlays, in caller order; region-relative ones without an active
        // region are suppressed and trigger the centering guide instead.
        let mut suppressed = false;
        for overlay in opts.overlays {
            match overlay.resolve_center(opts.region.as_ref(), tw, th) {
                Some((cx, cy)) => composite_overlay(&mut self.surface, overlay, cx, cy),
                None => suppressed = true,
            }
        }
        if suppressed {
            draw_crosshair(&mut self.surface);
        }

        if let Some(selected) = opts.selected {
            let hit = opts
                .overlays
                .iter()
                .find(|o| o.id == selected)
                .and_then(|o| {
                    o.resolve_center(opts.region.as_ref(), tw, th)
                        .map(|c| (o, c))
                });
            if let Some((overlay, center)) = hit {
                draw_selection(&mut self.surface, overlay, center);
            }
        }

        Ok(&self.surface)
    }

    /// Scale (or copy) the video frame into the surface buffer.
    fn blit_video(&mut self, frame: &RgbFrame, tw: u32, th: u32) -> Result<()> {
        let out_len = (tw * th * 3) as usize;
        if self.surface.data.len() != out_len {
            self.surface.data.resize(out_len, 0);
        }
        self.surface.width = tw;
        self.surface.height = th;
        self.surface.seq = frame.seq;

        if (frame.width, frame.height) == (tw, th) {
            self.surface.data.copy_from_slice(&frame.data);
            return Ok(());
        }

        let src =
            fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
                .context("failed to create surface blit source")?;

        let mut dst = fr::images::Image::from_vec_u8(
            tw,
            th,
            std::mem::take(&mut self.surface.data),
            fr::PixelType::U8x3,
        )
        .context("failed to create surface blit destination")?;

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::CatmullRom));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .context("surface blit scale failed")?;

        self.surface.data = dst.into_vec();
        Ok(())
    }
}

// ── Overlay compositing ──────────────────────────────────────────────────────

/// Draw one overlay centered at `(cx, cy)` with its current transform.
///
/// Implemented as an inverse mapping: every destination pixel inside the
/// rotated footprint's bounding box is pulled back into image space
/// (un-rotate, un-scale) and bilinearly sampled.
fn composite_overlay(surface: &mut RgbFrame, overlay: &Overlay, cx: f32, cy: f32) {
    let img = overlay.image();
    let (iw, ih) = (img.width(), img.height());
    let scale = overlay.scale();
    let opacity = overlay.opacity();
    if iw == 0 || ih == 0 || opacity <= 0.0 {
        return;
    }

    let (hw, hh) = overlay.half_extent();
    let theta = overlay.rotation_deg().to_radians();
    let (sin, cos) = theta.sin_cos();
    let rot = Matrix2::new(cos, -sin, sin, cos);
    let inv = rot.transpose();

    // Destination bounding box from the four rotated corners.
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for (ex, ey) in [(-hw, -hh), (hw, -hh), (-hw, hh), (hw, hh)] {
        let c = rot * Vector2::new(ex, ey);
        min_x = min_x.min(c.x);
        min_y = min_y.min(c.y);
        max_x = max_x.max(c.x);
        max_y = max_y.max(c.y);
    }

    let x0 = ((min_x + cx).floor().max(0.0)) as u32;
    let y0 = ((min_y + cy).floor().max(0.0)) as u32;
    let x1 = (((max_x + cx).ceil()).min(surface.width as f32)) as u32;
    let y1 = (((max_y + cy).ceil()).min(surface.height as f32)) as u32;
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let stride = (surface.width * 3) as usize;
    let raw = img.as_raw();
    let (iw_f, ih_f) = (iw as f32, ih as f32);

    surface.data[y0 as usize * stride..y1 as usize * stride]
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(row_idx, row)| {
            let dy = (y0 + row_idx as u32) as f32 + 0.5 - cy;
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - cx;
                let local = inv * Vector2::new(dx, dy);
                let u = local.x / scale + iw_f / 2.0 - 0.5;
                let v = local.y / scale + ih_f / 2.0 - 0.5;
                // Accept the pixel while its center lies inside the scaled
                // footprint; clamp so edge samples stay on the border texel.
                if u < -0.5 || u >= iw_f - 0.5 || v < -0.5 || v >= ih_f - 0.5 {
                    continue;
                }
                let rgba = sample_bilinear(
                    raw,
                    iw,
                    ih,
                    u.clamp(0.0, iw_f - 1.0),
                    v.clamp(0.0, ih_f - 1.0),
                );
                let alpha = rgba[3] / 255.0 * opacity;
                if alpha <= 0.0 {
                    continue;
                }
                let o = (x as usize) * 3;
                for c in 0..3 {
                    let dst = row[o + c] as f32;
                    row[o + c] = (dst * (1.0 - alpha) + rgba[c] * alpha).round() as u8;
                }
            }
        });
}

/// Bilinear RGBA sample at a fractional coordinate, neighbors edge-clamped.
fn sample_bilinear(raw: &[u8], width: u32, height: u32, u: f32, v: f32) -> [f32; 4] {
    let u0 = u.floor();
    let v0 = v.floor();
    let fu = u - u0;
    let fv = v - v0;

    let x0 = u0 as u32;
    let y0 = v0 as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let idx = |x: u32, y: u32| ((y * width + x) * 4) as usize;
    let (p00, p10, p01, p11) = (idx(x0, y0), idx(x1, y0), idx(x0, y1), idx(x1, y1));

    let mut out = [0f32; 4];
    for c in 0..4 {
        let top = raw[p00 + c] as f32 * (1.0 - fu) + raw[p10 + c] as f32 * fu;
        let bottom = raw[p01 + c] as f32 * (1.0 - fu) + raw[p11 + c] as f32 * fu;
        out[c] = top * (1.0 - fv) + bottom * fv;
    }
    out
}

// ── Decorations ──────────────────────────────────────────────────────────────

/// Run imageproc drawing over the surface buffer without cloning it.
fn with_canvas<F: FnOnce(&mut RgbImage)>(frame: &mut RgbFrame, f: F) {
    let mut img: RgbImage =
        ImageBuffer::from_raw(frame.width, frame.height, std::mem::take(&mut frame.data))
            .expect("valid frame dimensions");
    f(&mut img);
    frame.data = img.into_raw();
}

fn draw_detection_box(frame: &mut RgbFrame, region: &Region) {
    let (rx, ry, rw, rh) = region.to_pixels(frame.width, frame.height);
    with_canvas(frame, |img| {
        for inset in 0..BOX_STROKE {
            let w = rw as i32 - 2 * inset;
            let h = rh as i32 - 2 * inset;
            if w < 1 || h < 1 {
                break;
            }
            let rect = Rect::at(rx as i32 + inset, ry as i32 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(img, rect, Rgb(DETECTION_COLOR));
        }
    });
}

/// Centering guide shown while a region-anchored overlay has nothing to
/// anchor to.
fn draw_crosshair(frame: &mut RgbFrame) {
    let cx = frame.width as f32 / 2.0;
    let cy = frame.height as f32 / 2.0;
    with_canvas(frame, |img| {
        draw_line_segment_mut(
            img,
            (cx - CROSSHAIR_ARM, cy),
            (cx + CROSSHAIR_ARM, cy),
            Rgb(ACCENT_COLOR),
        );
        draw_line_segment_mut(
            img,
            (cx, cy - CROSSHAIR_ARM),
            (cx, cy + CROSSHAIR_ARM),
            Rgb(ACCENT_COLOR),
        );
    });
}

/// Selection border plus four corner handles, drawn on the unrotated bounds
/// (the same rectangle hit-testing uses).
fn draw_selection(frame: &mut RgbFrame, overlay: &Overlay, center: (f32, f32)) {
    let (hw, hh) = overlay.half_extent();
    let x = (center.0 - hw) as i32;
    let y = (center.1 - hh) as i32;
    let w = (hw * 2.0).max(1.0) as u32;
    let h = (hh * 2.0).max(1.0) as u32;
    with_canvas(frame, |img| {
        draw_hollow_rect_mut(img, Rect::at(x, y).of_size(w, h), Rgb(ACCENT_COLOR));
        for (corner_x, corner_y) in [
            (x, y),
            (x + w as i32, y),
            (x, y + h as i32),
            (x + w as i32, y + h as i32),
        ] {
            let handle = Rect::at(corner_x - HANDLE_SIZE / 2, corner_y - HANDLE_SIZE / 2)
                .of_size(HANDLE_SIZE as u32, HANDLE_SIZE as u32);
            draw_filled_rect_mut(img, handle, Rgb(ACCENT_COLOR));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DEFAULT_MOCK_REGION;
    use crate::overlay::AnchorMode;
    use image::RgbaImage;

    fn opaque_overlay(id: u64, w: u32, h: u32, rgb: [u8; 3]) -> Overlay {
        let image = RgbaImage::from_pixel(w, h, image::Rgba([rgb[0], rgb[1], rgb[2], 255]));
        Overlay::new(id, format!("overlay-{id}"), image, AnchorMode::Absolute)
    }

    /// Bounding box of all pixels matching `pred`, as (x, y, w, h).
    fn footprint(frame: &RgbFrame, pred: impl Fn([u8; 3]) -> bool) -> Option<(u32, u32, u32, u32)> {
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
        let mut any = false;
        for y in 0..frame.height {
            for x in 0..frame.width {
                if pred(frame.pixel(x, y)) {
                    any = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        any.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }

    fn render_once(overlays: &[Overlay], region: Option<Region>) -> RgbFrame {
        let mut compositor = OverlayCompositor::new(SurfaceSize::MatchSource);
        let frame = RgbFrame::filled(1280, 720, [0, 0, 0]);
        let opts = RenderOptions {
            overlays,
            region,
            selected: None,
        };
        let surface = compositor.render(&frame, &opts).unwrap();
        RgbFrame {
            data: surface.data.clone(),
            width: surface.width,
            height: surface.height,
            seq: surface.seq,
        }
    }

    #[test]
    fn footprint_is_exactly_image_size_times_scale() {
        let mut overlay = opaque_overlay(1, 200, 100, [255, 255, 255]);
        overlay.set_position(640.0, 360.0);

        let surface = render_once(std::slice::from_ref(&overlay), None);
        assert_eq!(
            footprint(&surface, |p| p == [255, 255, 255]),
            Some((540, 310, 200, 100))
        );

        overlay.set_scale(0.5);
        let surface = render_once(std::slice::from_ref(&overlay), None);
        assert_eq!(
            footprint(&surface, |p| p == [255, 255, 255]),
            Some((590, 335, 100, 50))
        );
    }

    #[test]
    fn rotation_by_quarter_turn_swaps_footprint_axes() {
        let mut overlay = opaque_overlay(1, 200, 100, [255, 255, 255]);
        overlay.set_position(640.0, 360.0);
        overlay.set_rotation(90.0);

        let surface = render_once(std::slice::from_ref(&overlay), None);
        let (_, _, w, h) = footprint(&surface, |p| p != [0, 0, 0]).unwrap();
        assert_eq!((w, h), (100, 200));
    }

    #[test]
    fn transforms_do_not_leak_between_overlays() {
        let mut rotated = opaque_overlay(1, 80, 40, [255, 0, 0]);
        rotated.set_position(300.0, 360.0);
        rotated.set_rotation(45.0);
        let mut plain = opaque_overlay(2, 60, 30, [0, 0, 255]);
        plain.set_position(1000.0, 360.0);

        let surface = render_once(&[rotated, plain], None);
        // The second overlay must render axis-aligned at its own anchor.
        assert_eq!(
            footprint(&surface, |p| p == [0, 0, 255]),
            Some((970, 345, 60, 30))
        );
    }

    #[test]
    fn opacity_blends_linearly_over_the_frame() {
        let mut overlay = opaque_overlay(1, 50, 50, [255, 0, 0]);
        overlay.set_position(640.0, 360.0);
        overlay.set_opacity(0.5);

        let surface = render_once(std::slice::from_ref(&overlay), None);
        let [r, g, b] = surface.pixel(640, 360);
        assert!((127..=128).contains(&r), "r = {r}");
        assert_eq!((g, b), (0, 0));
    }

    #[test]
    fn transparent_pixels_leave_the_video_untouched() {
        let image = RgbaImage::from_pixel(50, 50, image::Rgba([255, 255, 255, 0]));
        let mut overlay = Overlay::new(1, "ghost", image, AnchorMode::Absolute);
        overlay.set_position(640.0, 360.0);

        let surface = render_once(std::slice::from_ref(&overlay), None);
        assert_eq!(surface.pixel(640, 360), [0, 0, 0]);
    }

    #[test]
    fn region_relative_overlay_waits_for_detection() {
        let image = RgbaImage::from_pixel(40, 40, image::Rgba([255, 0, 0, 255]));
        let overlay = Overlay::new(1, "wrap", image, AnchorMode::RegionRelative);

        // No region: overlay suppressed, centering guide drawn instead.
        let surface = render_once(std::slice::from_ref(&overlay), None);
        assert_eq!(footprint(&surface, |p| p == [255, 0, 0]), None);
        assert_eq!(surface.pixel(640, 360), ACCENT_COLOR);

        // Region active: overlay renders at the region center, no guide.
        let surface = render_once(std::slice::from_ref(&overlay), Some(DEFAULT_MOCK_REGION));
        assert!(footprint(&surface, |p| p == [255, 0, 0]).is_some());
        assert_ne!(surface.pixel(640, 300), ACCENT_COLOR);
    }

    #[test]
    fn fixed_surface_scales_the_video_frame() {
        let mut compositor = OverlayCompositor::new(SurfaceSize::Fixed(64, 64));
        let frame = RgbFrame::filled(128, 96, [200, 10, 10]);
        let opts = RenderOptions {
            overlays: &[],
            region: None,
            selected: None,
        };
        let surface = compositor.render(&frame, &opts).unwrap();
        assert_eq!((surface.width, surface.height), (64, 64));
        assert_eq!(surface.pixel(32, 32), [200, 10, 10]);
    }

    #[test]
    fn selection_chrome_only_for_the_selected_overlay() {
        let mut overlay = opaque_overlay(7, 40, 40, [0, 255, 0]);
        overlay.set_position(640.0, 360.0);
        let overlays = [overlay];
        let frame = RgbFrame::filled(1280, 720, [0, 0, 0]);

        let mut compositor = OverlayCompositor::new(SurfaceSize::MatchSource);
        let surface = compositor
            .render(
                &frame,
                &RenderOptions {
                    overlays: &overlays,
                    region: None,
                    selected: Some(7),
                },
            )
            .unwrap();
        // Corner handle at the top-left of the bounds.
        assert_eq!(surface.pixel(620, 340), ACCENT_COLOR);

        let surface = compositor
            .render(
                &frame,
                &RenderOptions {
                    overlays: &overlays,
                    region: None,
                    selected: None,
                },
            )
            .unwrap();
        assert_ne!(surface.pixel(620, 340), ACCENT_COLOR);
    }
}
