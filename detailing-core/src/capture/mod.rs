//! capture — still-image export

use anyhow::{Context, Result};
use image::{ImageBuffer, RgbImage};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::camera::RgbFrame;

/// Serialize a composited frame to `dir` as a PNG named
/// `ar-preview-<slug>-<epoch_millis>.png`.
///
/// Failure is surfaced to the caller (one-shot notification territory) and
/// is retryable by calling again; it never takes the render loop down.
pub fn export_still(frame: &RgbFrame, dir: &Path, label: &str) -> Result<PathBuf> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the epoch")?
        .as_millis();
    let path = dir.join(format!("ar-preview-{}-{millis}.png", slug(label)));
    write_png(frame, &path)?;
    info!(path = %path.display(), "still exported");
    Ok(path)
}

/// Encode a frame as PNG at an exact path.
pub fn write_png(frame: &RgbFrame, path: &Path) -> Result<()> {
    let img: RgbImage = ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
        .context("surface buffer does not match its dimensions")?;
    img.save(path)
        .with_context(|| format!("failed to export still image: {}", path.display()))
}

/// Lowercase, alphanumerics kept, everything else collapsed to single dashes.
fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut dash = true; // suppress a leading dash
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("capture");
    }
    out
}
