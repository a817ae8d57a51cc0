//! Screen capture abstraction
//!
//! The capture worker only sees [`Capturer`], so sessions can be recorded
//! from X11 or, in tests, from a synthetic source.

use crate::capture::frame::{Frame, FrameStats};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot open display {display}: {reason}")]
    Connect { display: String, reason: String },

    #[error("X11 request failed: {0}")]
    X11(String),

    #[error("unusable frame: {0}")]
    BadFrame(String),

    #[error("cannot encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<x11rb::errors::ConnectionError> for CaptureError {
    fn from(e: x11rb::errors::ConnectionError) -> Self {
        CaptureError::X11(e.to_string())
    }
}

impl From<x11rb::errors::ReplyError> for CaptureError {
    fn from(e: x11rb::errors::ReplyError) -> Self {
        CaptureError::X11(e.to_string())
    }
}

/// Trait for screen capture implementations
pub trait Capturer: Send {
    /// Capture a single frame
    fn capture(&mut self) -> Result<Frame, CaptureError>;

    /// Get capture statistics
    fn stats(&self) -> FrameStats;

    /// Screen size in pixels
    fn dimensions(&self) -> (u32, u32);
}

/// Opens a fresh capturer for each recording session
pub type CapturerFactory = Arc<dyn Fn() -> Result<Box<dyn Capturer>, CaptureError> + Send + Sync>;

/// Factory for the X11 display `display`
pub fn x11_factory(display: String) -> CapturerFactory {
    Arc::new(move || {
        let capturer = super::X11Capturer::connect(&display)?;
        Ok(Box::new(capturer) as Box<dyn Capturer>)
    })
}
