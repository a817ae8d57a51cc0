//! Shared state for the control surface

use crate::config::Config;
use crate::recorder::Recorder;
use crate::runtime_settings::RuntimeSettings;
use crate::serialize::SerializeOptions;
use crate::writer::EventWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the HTTP handlers act on
#[derive(Clone)]
pub struct SharedState {
    /// Configuration
    pub config: Arc<Config>,

    /// Recording sessions
    pub recorder: Arc<Recorder>,

    /// Session event log (task events are appended directly)
    pub writer: Arc<EventWriter>,

    /// Settings changed through `/reload`
    pub runtime_settings: Arc<RuntimeSettings>,

    /// Server start time
    pub start_time: Instant,
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("config", &self.config)
            .field("recording", &self.recorder.is_recording())
            .finish()
    }
}

impl SharedState {
    pub fn new(
        config: Config,
        recorder: Arc<Recorder>,
        writer: Arc<EventWriter>,
        runtime_settings: Arc<RuntimeSettings>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            recorder,
            writer,
            runtime_settings,
            start_time: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn records_dir(&self) -> &Path {
        self.recorder.records_dir()
    }

    /// Where `/convert?name=` writes a session
    pub fn converted_path(&self, name: &str) -> PathBuf {
        self.config.serializer.converted_dir.join(name)
    }

    pub fn serialize_options(&self) -> SerializeOptions {
        SerializeOptions::from(&self.config.serializer)
    }
}
