pub mod camera;
pub mod capture;
pub mod compositor;
pub mod detector;
pub mod interaction;
pub mod overlay;
pub mod session;

// Re-export the error type so callers only need `detailing_core::Error`
pub use anyhow::Error;
pub use anyhow::Result;
