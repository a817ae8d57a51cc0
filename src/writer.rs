//! Append-only session event log
//!
//! A single [`EventWriter`] lives for the whole process and is shared by the
//! proxy's shadow decoders (network driven) and the capture worker (timer
//! driven). Every append goes through one mutex, and the timestamp is taken
//! while holding it, so log order equals wall-clock arrival order.

use crate::event::{ControlArgs, EventKind, LogRecord};
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the event log inside a session directory
pub const EVENT_LOG_NAME: &str = "events.txt";

/// Current wall-clock time as fractional unix seconds
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("a recording is already running into {0}")]
    AlreadyRunning(PathBuf),

    #[error("event log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Values known before a recording starts, emitted with the next `start`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingDefaults {
    values: BTreeMap<String, Value>,
}

impl PendingDefaults {
    pub fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn to_object(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

struct Sink {
    path: PathBuf,
    file: File,
}

impl Sink {
    fn open(path: &Path) -> Result<Self, WriterError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| WriterError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn append(&mut self, record: &LogRecord) -> Result<(), WriterError> {
        let mut line = record.to_line();
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|source| WriterError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[derive(Default)]
struct WriterState {
    running: bool,
    sink: Option<Sink>,
    pending_defaults: PendingDefaults,
}

/// Session event log writer
#[derive(Default)]
pub struct EventWriter {
    state: Mutex<WriterState>,
}

impl std::fmt::Debug for EventWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventWriter")
            .field("running", &state.running)
            .field("sink_path", &state.sink.as_ref().map(|s| &s.path))
            .finish()
    }
}

impl EventWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn sink_path(&self) -> Option<PathBuf> {
        self.state.lock().sink.as_ref().map(|s| s.path.clone())
    }

    /// Stash a value for the payload of the next `start`
    pub fn set_default(&self, name: &str, value: Value) {
        self.state.lock().pending_defaults.set(name, value);
    }

    pub fn pending_defaults(&self) -> PendingDefaults {
        self.state.lock().pending_defaults.clone()
    }

    /// Open `path` and write a `start` event carrying all pending defaults
    pub fn start(&self, path: &Path) -> Result<(), WriterError> {
        let mut state = self.state.lock();
        if state.running {
            let current = state
                .sink
                .as_ref()
                .map(|s| s.path.clone())
                .unwrap_or_default();
            return Err(WriterError::AlreadyRunning(current));
        }

        let mut sink = Sink::open(path)?;
        let payload = Value::Object(state.pending_defaults.to_object());
        sink.append(&LogRecord::new(unix_time(), EventKind::Start, vec![payload]))?;
        state.sink = Some(sink);
        state.running = true;
        debug!("Event log started at {:?}", path);
        Ok(())
    }

    /// Write a `stop` event and close the sink. Returns false if nothing was running.
    pub fn stop(&self, reason: Option<ControlArgs>) -> Result<bool, WriterError> {
        let mut state = self.state.lock();
        if !state.running {
            return Ok(false);
        }
        state.running = false;
        let payload = Value::Object(reason.unwrap_or_default().to_object());
        let result = match state.sink.as_mut() {
            Some(sink) => sink.append(&LogRecord::new(unix_time(), EventKind::Stop, vec![payload])),
            None => Ok(()),
        };
        state.sink = None;
        result.map(|_| true)
    }

    /// Append an event if a recording is running; otherwise drop it.
    /// Returns whether the event was written.
    pub fn record(&self, kind: EventKind, args: Vec<Value>) -> Result<bool, WriterError> {
        let mut state = self.state.lock();
        Self::append_locked(&mut state, kind, args)
    }

    /// Append an event if running, and remember its arguments as the pending
    /// default `name` either way so a later session starts with it.
    pub fn record_or_stash(
        &self,
        kind: EventKind,
        name: &str,
        args: Vec<Value>,
    ) -> Result<bool, WriterError> {
        let mut state = self.state.lock();
        state
            .pending_defaults
            .set(name, Value::Array(args.clone()));
        Self::append_locked(&mut state, kind, args)
    }

    fn append_locked(
        state: &mut WriterState,
        kind: EventKind,
        args: Vec<Value>,
    ) -> Result<bool, WriterError> {
        if !state.running {
            return Ok(false);
        }
        match state.sink.as_mut() {
            Some(sink) => {
                sink.append(&LogRecord::new(unix_time(), kind, args))?;
                Ok(true)
            }
            None => {
                warn!("Writer running without a sink, dropping {} event", kind);
                Ok(false)
            }
        }
    }
}
