//! camera — frame acquisition
//!
//! Owns the `RgbFrame` type that flows through the whole pipeline, the
//! `FrameSource` seam the compositor pulls from, and the two concrete
//! sources: a nokhwa-backed webcam feed and a still-image replay source for
//! offline composition and tests.
//!
//! The design intentionally keeps the source generic (a trait object) so the
//! preview session can run against a live camera, a file, or a synthetic test
//! pattern without changing any downstream code.

use anyhow::{Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{query, Camera};
use std::path::Path;
use tracing::{debug, info, warn};

/// Frame rate requested from the device; the render loop is paced by the
/// caller, so this is a negotiation hint rather than a contract.
const REQUESTED_FPS: u32 = 30;

/// A single frame in RGB24 format, along with a monotonically increasing
/// sequence number assigned by the source.
pub struct RgbFrame {
    pub data: Vec<u8>, // packed RGB24, row-major
    pub width: u32,
    pub height: u32,
    pub seq: u64,
}

impl RgbFrame {
    /// Allocate a frame filled with a solid color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = vec![0u8; (width * height * 3) as usize];
        for px in data.chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
            seq: 0,
        }
    }

    /// Read one pixel. Callers must stay in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * self.width + x) * 3) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Which physical camera the caller would prefer, mirroring the usual
/// front/rear distinction on phones and laptops with multiple devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    /// Front-facing / selfie camera.
    #[default]
    User,
    /// Rear / world-facing camera.
    Environment,
    /// First device that opens.
    Any,
}

/// Resolution and facing preferences for [`CameraFeed::open`]. These are
/// *ideals*: the device negotiates the closest format it supports.
#[derive(Debug, Clone, Copy)]
pub struct CameraConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: FacingMode,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            facing: FacingMode::User,
        }
    }
}

/// A capture device visible to the backend.
#[derive(Debug, Clone)]
pub struct CameraDescriptor {
    pub index: u32,
    pub name: String,
}

/// Enumerate capture devices on the default backend.
pub fn list_devices() -> Result<Vec<CameraDescriptor>> {
    let devices = query(ApiBackend::Auto).context("failed to enumerate capture devices")?;
    Ok(devices
        .iter()
        .enumerate()
        .map(|(i, info)| CameraDescriptor {
            index: match info.index() {
                CameraIndex::Index(n) => *n,
                CameraIndex::String(_) => i as u32,
            },
            name: info.human_name(),
        })
        .collect())
}

/// Anything that can hand the session one frame at a time.
///
/// `close` must be idempotent — the session calls it on every exit path,
/// including error branches and `Drop`.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RgbFrame>;
    fn close(&mut self);
}

// ── Webcam feed ──────────────────────────────────────────────────────────────

/// A live webcam feed. The stream is started in [`open`](CameraFeed::open)
/// and stopped by [`close`](FrameSource::close) or `Drop`, whichever comes
/// first, so an abandoned feed never leaves the camera indicator lit.
pub struct CameraFeed {
    camera: Camera,
    seq: u64,
    open: bool,
}

impl CameraFeed {
    /// Open the device best matching `constraints` and start streaming.
    ///
    /// Facing preference is resolved by a device-name heuristic; when nothing
    /// matches, the first enumerated device is used. Failure here is returned
    /// to the caller — the session converts it into an `Unavailable` status
    /// rather than letting it escape.
    pub fn open(constraints: CameraConstraints) -> Result<Self> {
        let index = pick_device(constraints.facing)?;

        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(constraints.ideal_width, constraints.ideal_height),
                FrameFormat::MJPEG,
                REQUESTED_FPS,
            ),
        ));

        let mut camera = Camera::new(index, requested).context("failed to open capture device")?;
        camera
            .open_stream()
            .context("failed to start camera stream")?;

        let resolution = camera.resolution();
        info!(
            width = resolution.width(),
            height = resolution.height(),
            "camera stream started"
        );

        Ok(Self {
            camera,
            seq: 0,
            open: true,
        })
    }
}

impl FrameSource for CameraFeed {
    fn next_frame(&mut self) -> Result<RgbFrame> {
        let buffer = self.camera.frame().context("failed to read camera frame")?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .context("failed to decode camera frame to RGB")?;

        let width = decoded.width();
        let height = decoded.height();
        self.seq += 1;
        Ok(RgbFrame {
            data: decoded.into_raw(),
            width,
            height,
            seq: self.seq,
        })
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.camera.stop_stream() {
            warn!("failed to stop camera stream: {e}");
        } else {
            debug!("camera stream stopped");
        }
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.close();
    }
}

/// Map the facing preference onto an enumerated device.
fn pick_device(facing: FacingMode) -> Result<CameraIndex> {
    let devices = query(ApiBackend::Auto).context("failed to enumerate capture devices")?;
    let first = devices
        .first()
        .context("no capture device present")?
        .index()
        .clone();

    let keywords: &[&str] = match facing {
        FacingMode::User => &["front", "user", "facetime", "integrated"],
        FacingMode::Environment => &["back", "rear", "environment", "world"],
        FacingMode::Any => return Ok(first),
    };

    for info in &devices {
        let name = info.human_name().to_lowercase();
        if keywords.iter().any(|k| name.contains(k)) {
            debug!(device = %info.human_name(), "facing preference matched");
            return Ok(info.index().clone());
        }
    }

    debug!("no device matched facing preference; using first device");
    Ok(first)
}

// ── Still-image source ───────────────────────────────────────────────────────

/// Replays one decoded image as an endless stream of identical frames.
/// Stands in for the camera in offline composition and in tests.
pub struct StillImageSource {
    data: Vec<u8>,
    width: u32,
    height: u32,
    seq: u64,
}

impl StillImageSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let img = image::open(path.as_ref())
            .with_context(|| {
                format!(
                    "failed to open background image: {}",
                    path.as_ref().display()
                )
            })?
            .into_rgb8();
        let (width, height) = (img.width(), img.height());
        Ok(Self {
            data: img.into_raw(),
            width,
            height,
            seq: 0,
        })
    }

    pub fn from_frame(frame: &RgbFrame) -> Self {
        Self {
            data: frame.data.clone(),
            width: frame.width,
            height: frame.height,
            seq: 0,
        }
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Result<RgbFrame> {
        self.seq += 1;
        Ok(RgbFrame {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            seq: self.seq,
        })
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filled_frame_has_uniform_pixels() {
        let frame = RgbFrame::filled(4, 3, [10, 20, 30]);
        assert_eq!(frame.data.len(), 4 * 3 * 3);
        assert_eq!(frame.pixel(0, 0), [10, 20, 30]);
        assert_eq!(frame.pixel(3, 2), [10, 20, 30]);
    }

    #[test]
    fn still_source_replays_with_increasing_seq() {
        let base = RgbFrame::filled(8, 8, [1, 2, 3]);
        let mut source = StillImageSource::from_frame(&base);
        let a = source.next_frame().unwrap();
        let b = source.next_frame().unwrap();
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(a.data, base.data);
    }
}
