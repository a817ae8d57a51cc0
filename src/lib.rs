//! recvnc - VNC session recorder
//!
//! An intercepting RFB proxy that logs viewer input alongside periodic screen
//! captures, and an offline serializer that aligns a recorded session onto a
//! fixed time grid.

pub mod args;
pub mod capture;
pub mod config;
pub mod event;
pub mod proxy;
pub mod recorder;
pub mod rfb;
pub mod runtime_settings;
pub mod schedule;
pub mod serialize;
pub mod timeline;
pub mod web;
pub mod writer;

// Re-exports
pub use config::Config;
pub use event::{Event, EventKind, EventPayload};
pub use proxy::{ProxyOptions, ReconnectDebounce, VncProxy};
pub use recorder::{Recorder, RecorderHooks, StartOptions, StopReason};
pub use serialize::{serialize, SerializeOptions, SerializeSummary};
pub use timeline::{IntervalSet, ClickClassifier};
pub use writer::EventWriter;
