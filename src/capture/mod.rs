//! X11 Screen capture
//!
//! Periodic screenshots for recording sessions.

mod capturer;
mod x11;

pub mod frame;
pub mod worker;

pub use capturer::{x11_factory, CaptureError, Capturer, CapturerFactory};
pub use frame::{Frame, FrameStats};
pub use worker::{run_capture_loop, CaptureJob, StopLatch};
pub use x11::X11Capturer;
