use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use detailing_core::{
    camera::{self, CameraConstraints, FacingMode, StillImageSource},
    capture,
    compositor::SurfaceSize,
    detector::{NullDetector, TimedMockDetector, VehicleDetector, DEFAULT_MOCK_REGION},
    overlay::{load_overlays, AnchorMode, OverlayAsset},
    session::{FeedStatus, PreviewSession},
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "detail-studio",
    version,
    about = "AR detailing preview: composite transformable overlays onto a live camera feed",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FacingArg {
    User,
    Environment,
    Any,
}

impl From<FacingArg> for FacingMode {
    fn from(value: FacingArg) -> Self {
        match value {
            FacingArg::User => FacingMode::User,
            FacingArg::Environment => FacingMode::Environment,
            FacingArg::Any => FacingMode::Any,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the capture devices visible to the backend.
    Devices,

    /// Composite overlays onto a background image and write a PNG.
    Compose {
        /// Background image standing in for the camera frame
        #[arg(short, long)]
        background: PathBuf,

        /// Overlay image (PNG recommended for transparency)
        #[arg(long, conflicts_with = "layout")]
        overlay: Option<PathBuf>,

        /// Overlay layout file (JSON) describing multiple overlays
        #[arg(long)]
        layout: Option<PathBuf>,

        /// Overlay center, in surface pixels (absolute) or [0,1] (region-relative)
        #[arg(long, num_args = 2, value_names = ["X", "Y"])]
        position: Option<Vec<f32>>,

        #[arg(long, default_value_t = 1.0)]
        scale: f32,

        /// Rotation in degrees
        #[arg(long, default_value_t = 0.0)]
        rotation: f32,

        #[arg(long, default_value_t = 1.0)]
        opacity: f32,

        /// Anchor the overlay inside the simulated detection region
        #[arg(long)]
        region_relative: bool,

        /// Output image path
        #[arg(short, long, default_value = "composed.png")]
        output: PathBuf,
    },

    /// Run a live camera preview loop, optionally capturing a still.
    Preview {
        #[arg(long, default_value_t = 1280)]
        width: u32,

        #[arg(long, default_value_t = 720)]
        height: u32,

        #[arg(long, value_enum, default_value = "user")]
        facing: FacingArg,

        /// Overlay layout file (JSON)
        #[arg(long)]
        layout: Option<PathBuf>,

        /// Number of frames to render before exiting
        #[arg(long, default_value_t = 300)]
        frames: u64,

        /// Simulate vehicle detection (2 s delay, fixed region)
        #[arg(long)]
        mock_detection: bool,

        /// Capture a still on the final frame into this directory
        #[arg(long)]
        capture_dir: Option<PathBuf>,
    },
}

// ── Layout file DTOs ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LayoutFile {
    overlays: Vec<LayoutOverlay>,
}

#[derive(Debug, Deserialize)]
struct LayoutOverlay {
    name: Option<String>,
    image: PathBuf,
    #[serde(default)]
    region_relative: bool,
    position: Option<[f32; 2]>,
    #[serde(default = "default_scale")]
    scale: f32,
    #[serde(default)]
    rotation: f32,
    #[serde(default = "default_opacity")]
    opacity: f32,
}

fn default_scale() -> f32 {
    1.0
}

fn default_opacity() -> f32 {
    1.0
}

fn read_layout(path: &PathBuf) -> Result<Vec<OverlayAsset>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read layout file: {}", path.display()))?;
    let layout: LayoutFile = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse layout file: {}", path.display()))?;

    Ok(layout
        .overlays
        .into_iter()
        .map(|entry| {
            let name = entry.name.unwrap_or_else(|| {
                entry
                    .image
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "overlay".to_string())
            });
            let mut asset = OverlayAsset::new(name, entry.image);
            asset.anchor = if entry.region_relative {
                AnchorMode::RegionRelative
            } else {
                AnchorMode::Absolute
            };
            asset.position = entry.position.map(|[x, y]| (x, y));
            asset.scale = entry.scale;
            asset.rotation = entry.rotation;
            asset.opacity = entry.opacity;
            asset
        })
        .collect())
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => cmd_devices(),
        Commands::Compose {
            background,
            overlay,
            layout,
            position,
            scale,
            rotation,
            opacity,
            region_relative,
            output,
        } => cmd_compose(
            background,
            overlay,
            layout,
            position,
            scale,
            rotation,
            opacity,
            region_relative,
            output,
        ),
        Commands::Preview {
            width,
            height,
            facing,
            layout,
            frames,
            mock_detection,
            capture_dir,
        } => cmd_preview(
            width,
            height,
            facing.into(),
            layout,
            frames,
            mock_detection,
            capture_dir,
        ),
    }
}

// ── Device listing ────────────────────────────────────────────────────────────

fn cmd_devices() -> Result<()> {
    let devices = camera::list_devices()?;
    if devices.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }
    for device in devices {
        println!("[{}] {}", device.index, device.name);
    }
    Ok(())
}

// ── Offline composition ───────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn cmd_compose(
    background: PathBuf,
    overlay: Option<PathBuf>,
    layout: Option<PathBuf>,
    position: Option<Vec<f32>>,
    scale: f32,
    rotation: f32,
    opacity: f32,
    region_relative: bool,
    output: PathBuf,
) -> Result<()> {
    let assets = match (&layout, &overlay) {
        (Some(path), _) => read_layout(path)?,
        (None, Some(path)) => {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "overlay".to_string());
            let mut asset = OverlayAsset::new(name, path.clone());
            asset.anchor = if region_relative {
                AnchorMode::RegionRelative
            } else {
                AnchorMode::Absolute
            };
            asset.position = position.as_deref().map(|p| (p[0], p[1]));
            asset.scale = scale;
            asset.rotation = rotation;
            asset.opacity = opacity;
            vec![asset]
        }
        (None, None) => anyhow::bail!("pass either --overlay or --layout"),
    };

    let overlays = load_overlays(&assets);
    anyhow::ensure!(!overlays.is_empty(), "no overlay asset could be loaded");

    // Region-relative composition needs a region; lock the mock immediately.
    let needs_region = overlays
        .iter()
        .any(|o| o.anchor == AnchorMode::RegionRelative);
    let detector: Box<dyn VehicleDetector> = if needs_region {
        Box::new(TimedMockDetector::new(Duration::ZERO, DEFAULT_MOCK_REGION))
    } else {
        Box::new(NullDetector)
    };

    let mut session = PreviewSession::new(detector, SurfaceSize::MatchSource);
    session.attach_source(Box::new(StillImageSource::open(&background)?));
    session.set_overlays(overlays);

    let surface = session.render_at(Duration::ZERO)?;
    capture::write_png(surface, &output)?;
    session.teardown();

    info!(output = %output.display(), "composition written");
    Ok(())
}

// ── Live preview ──────────────────────────────────────────────────────────────

fn cmd_preview(
    width: u32,
    height: u32,
    facing: FacingMode,
    layout: Option<PathBuf>,
    frames: u64,
    mock_detection: bool,
    capture_dir: Option<PathBuf>,
) -> Result<()> {
    let overlays = match &layout {
        Some(path) => load_overlays(&read_layout(path)?),
        None => Vec::new(),
    };

    let detector: Box<dyn VehicleDetector> = if mock_detection {
        Box::new(TimedMockDetector::with_defaults())
    } else {
        Box::new(NullDetector)
    };

    let mut session = PreviewSession::new(detector, SurfaceSize::MatchSource);
    session.initialize(CameraConstraints {
        ideal_width: width,
        ideal_height: height,
        facing,
    });
    if session.status() == FeedStatus::Unavailable {
        info!("no camera — rendering placeholder frames");
    }
    session.set_overlays(overlays);

    let pb = ProgressBar::new(frames);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{bar:40}] {pos}/{len}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message("Rendering preview…");

    let cancel = AtomicBool::new(false);
    let mut rendered = 0u64;
    let capture_dir_ref = capture_dir.as_deref();
    let mut captured = None;

    session.run(&cancel, |surface| {
        rendered += 1;
        pb.inc(1);
        if rendered >= frames {
            if let Some(dir) = capture_dir_ref {
                match capture::export_still(surface, dir, "preview") {
                    Ok(path) => captured = Some(path),
                    Err(e) => tracing::warn!("capture failed (retryable): {e:#}"),
                }
            }
            return false;
        }
        true
    })?;

    pb.finish_with_message("Done.");
    if let Some(path) = captured {
        println!("Captured {}", path.display());
    }
    Ok(())
}
