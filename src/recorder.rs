//! Recording sessions
//!
//! A session is one directory under the records root holding `events.txt`
//! and the screenshots. At most one session runs at a time. It ends on a
//! manual stop, when its optional duration elapses, when the viewer is lost,
//! or when capture fails; in every case exactly one `stop` event is written.

use crate::capture::{run_capture_loop, CaptureJob, CapturerFactory, StopLatch};
use crate::event::ControlArgs;
use crate::proxy::SessionHooks;
use crate::runtime_settings::RuntimeSettings;
use crate::schedule::{Scheduler, Ticket};
use crate::writer::{EventWriter, EVENT_LOG_NAME};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Session directory name used when the caller gives none
pub fn default_prefix() -> String {
    chrono::Local::now().format("rec-%Y-%m-%dT%H%M%S").to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("a recording is already running in {0:?}")]
    AlreadyRunning(PathBuf),

    #[error("invalid session name {0:?}")]
    InvalidPrefix(String),

    #[error("invalid {name}: {value}")]
    InvalidDuration { name: &'static str, value: f64 },

    #[error("cannot create session directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Manual,
    AutoStop,
    ConnectionLost,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Manual => "manual",
            StopReason::AutoStop => "auto_stop",
            StopReason::ConnectionLost => "connection_lost",
        }
    }
}

/// Called once when a session's duration elapses
pub type AfterAutoStop = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct StartOptions {
    /// Seconds between screenshots; the live setting when absent
    pub interval: Option<f64>,
    /// Stop automatically after this many seconds
    pub duration: Option<f64>,
    /// Session directory name
    pub prefix: Option<String>,
    pub after_auto_stop: Option<AfterAutoStop>,
}

struct ActiveSession {
    dir: PathBuf,
    auto_stop: Option<Ticket>,
    /// Set by the worker once the `stop` event is written
    done: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        !self.done.load(Ordering::Acquire)
    }
}

pub struct Recorder {
    records_dir: PathBuf,
    writer: Arc<EventWriter>,
    settings: Arc<RuntimeSettings>,
    capturers: CapturerFactory,
    scheduler: Scheduler,
    runtime: Handle,
    latch: Arc<StopLatch>,
    stop_reason: Arc<Mutex<Option<StopReason>>>,
    session: Mutex<Option<ActiveSession>>,
}

impl Recorder {
    /// Must be called inside a tokio runtime
    pub fn new(
        records_dir: PathBuf,
        writer: Arc<EventWriter>,
        settings: Arc<RuntimeSettings>,
        capturers: CapturerFactory,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            records_dir,
            writer,
            settings,
            capturers,
            scheduler,
            runtime: Handle::current(),
            latch: Arc::new(StopLatch::new()),
            stop_reason: Arc::new(Mutex::new(None)),
            session: Mutex::new(None),
        }
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().as_ref().map_or(false, ActiveSession::is_running)
    }

    /// Directory of the running session
    pub fn current_session(&self) -> Option<PathBuf> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| s.is_running())
            .map(|s| s.dir.clone())
    }

    /// Start a session. Rejected while another one is still running.
    pub fn start(&self, options: StartOptions) -> Result<PathBuf, RecorderError> {
        let prefix = options.prefix.unwrap_or_else(default_prefix);
        validate_session_name(&prefix)?;
        let interval = options.interval.unwrap_or_else(|| self.settings.screenshot_interval());
        let interval = positive_duration("interval", interval)?;
        let duration = options
            .duration
            .map(|d| positive_duration("duration", d))
            .transpose()?;

        let mut slot = self.session.lock();
        if let Some(active) = slot.as_ref().filter(|s| s.is_running()) {
            return Err(RecorderError::AlreadyRunning(active.dir.clone()));
        }

        let dir = self.records_dir.join(&prefix);
        std::fs::create_dir_all(&dir).map_err(|source| RecorderError::Io {
            path: dir.clone(),
            source,
        })?;

        self.latch.clear();
        *self.stop_reason.lock() = None;

        let auto_stop = duration.map(|duration| {
            let latch = self.latch.clone();
            let reason = self.stop_reason.clone();
            let after = options.after_auto_stop;
            self.scheduler.schedule(duration, move || {
                reason.lock().get_or_insert(StopReason::AutoStop);
                latch.set();
                info!("Recording stopped after {:?}", duration);
                if let Some(after) = after {
                    after();
                }
            })
        });

        let job = CaptureJob {
            session_dir: dir.clone(),
            interval,
            jpeg_quality: self.settings.jpeg_quality(),
        };
        let done = Arc::new(AtomicBool::new(false));
        let worker = {
            let done = done.clone();
            let writer = self.writer.clone();
            let capturers = self.capturers.clone();
            let latch = self.latch.clone();
            let reason = self.stop_reason.clone();
            let auto_stop = auto_stop.clone();
            self.runtime.spawn_blocking(move || {
                record_session(&writer, &capturers, &job, &latch, &reason);
                if let Some(ticket) = auto_stop {
                    ticket.cancel();
                }
                done.store(true, Ordering::Release);
            })
        };

        info!(
            "Recording into {:?} every {:?}{}",
            dir,
            interval,
            duration.map(|d| format!(" for {:?}", d)).unwrap_or_default()
        );
        *slot = Some(ActiveSession {
            dir: dir.clone(),
            auto_stop,
            done,
            worker: Some(worker),
        });
        Ok(dir)
    }

    /// Ask the running session to stop. Returns false if none was running.
    pub fn stop(&self, reason: StopReason) -> bool {
        let slot = self.session.lock();
        let Some(active) = slot.as_ref() else {
            return false;
        };
        if let Some(ticket) = &active.auto_stop {
            ticket.cancel();
        }
        let running = active.is_running();
        if running {
            self.stop_reason.lock().get_or_insert(reason);
            info!("Stopping recording in {:?} ({})", active.dir, reason.as_str());
        }
        self.latch.set();
        running
    }

    /// Wait for the current session's worker to finish
    pub async fn join(&self) {
        let worker = self.session.lock().as_mut().and_then(|s| s.worker.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Capture worker panicked: {}", e);
            }
        }
    }
}

/// Body of the blocking capture worker
fn record_session(
    writer: &EventWriter,
    capturers: &CapturerFactory,
    job: &CaptureJob,
    latch: &StopLatch,
    reason: &Mutex<Option<StopReason>>,
) {
    let log_path = job.session_dir.join(EVENT_LOG_NAME);
    if let Err(e) = writer.start(&log_path) {
        error!("Cannot start event log: {}", e);
        latch.set();
        return;
    }

    let outcome = capturers().and_then(|mut capturer| run_capture_loop(capturer.as_mut(), job, latch));
    latch.set();

    let reason = *reason.lock();
    let stop_args = match outcome {
        Ok(_) => reason.map(|r| ControlArgs {
            reason: Some(r.as_str().to_string()),
            ..Default::default()
        }),
        Err(e) => {
            error!("Capture failed in {:?}: {}", job.session_dir, e);
            Some(ControlArgs {
                reason: Some("capture_error".to_string()),
                detail: Some(Value::from(e.to_string())),
                ..Default::default()
            })
        }
    };
    match writer.stop(stop_args) {
        Ok(true) => {}
        Ok(false) => warn!("Event log for {:?} was already stopped", job.session_dir),
        Err(e) => error!("Cannot finish event log: {}", e),
    }
}

/// Session names become a single directory under the records root
pub fn validate_session_name(prefix: &str) -> Result<(), RecorderError> {
    let ok = !prefix.is_empty()
        && !prefix.starts_with('.')
        && !prefix.contains(|c| c == '/' || c == '\\');
    if ok {
        Ok(())
    } else {
        Err(RecorderError::InvalidPrefix(prefix.to_string()))
    }
}

fn positive_duration(name: &'static str, seconds: f64) -> Result<Duration, RecorderError> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(Duration::from_secs_f64(seconds))
    } else {
        Err(RecorderError::InvalidDuration { name, value: seconds })
    }
}

/// Ends the session when the viewer is gone for good
pub struct RecorderHooks {
    recorder: Arc<Recorder>,
}

impl RecorderHooks {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self { recorder }
    }
}

impl SessionHooks for RecorderHooks {
    fn connection_made(&self, host: &str) {
        if let Some(dir) = self.recorder.current_session() {
            info!("Viewer {} joined recording {:?}", host, dir);
        }
    }

    fn connection_lost(&self, host: &str) {
        if self.recorder.stop(StopReason::ConnectionLost) {
            info!("Viewer {} lost, recording stopped", host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::worker::testing::FakeCapturer;
    use crate::capture::{Capturer, CaptureError};
    use crate::config::Config;
    use crate::event::{parse_log, EventKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(dir: &Path, fail_after: Option<u64>) -> Arc<Recorder> {
        let factory: CapturerFactory = Arc::new(move || {
            let mut capturer = FakeCapturer::new(4, 4);
            capturer.fail_after = fail_after;
            Ok(Box::new(capturer) as Box<dyn Capturer>)
        });
        Arc::new(Recorder::new(
            dir.to_path_buf(),
            Arc::new(EventWriter::new()),
            Arc::new(RuntimeSettings::new(&Config::default())),
            factory,
            Scheduler::new(),
        ))
    }

    fn stop_events(dir: &Path) -> Vec<Value> {
        let text = std::fs::read_to_string(dir.join(EVENT_LOG_NAME)).unwrap();
        parse_log(&text)
            .unwrap()
            .into_iter()
            .filter(|r| r.event == EventKind::Stop)
            .map(|r| r.args[0].clone())
            .collect()
    }

    #[tokio::test]
    async fn second_start_is_rejected_until_stopped() {
        let root = tempfile::tempdir().unwrap();
        let recorder = recorder(root.path(), None);
        let dir = recorder
            .start(StartOptions {
                interval: Some(0.02),
                prefix: Some("one".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            recorder.start(StartOptions::default()),
            Err(RecorderError::AlreadyRunning(_))
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(recorder.stop(StopReason::Manual));
        recorder.join().await;
        assert!(!recorder.is_recording());

        let stops = stop_events(&dir);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0]["reason"], "manual");
        assert!(std::fs::read_dir(&dir).unwrap().count() > 1);

        recorder
            .start(StartOptions {
                prefix: Some("two".into()),
                ..Default::default()
            })
            .unwrap();
        recorder.stop(StopReason::Manual);
        recorder.join().await;
    }

    #[tokio::test]
    async fn duration_stops_and_runs_hook_once() {
        let root = tempfile::tempdir().unwrap();
        let recorder = recorder(root.path(), None);
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = hook_calls.clone();
        let dir = recorder
            .start(StartOptions {
                interval: Some(0.02),
                duration: Some(0.1),
                prefix: Some("timed".into()),
                after_auto_stop: Some(Box::new(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                })),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        recorder.join().await;
        assert!(!recorder.stop(StopReason::Manual));
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);

        let stops = stop_events(&dir);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0]["reason"], "auto_stop");
    }

    #[tokio::test]
    async fn manual_stop_cancels_auto_stop() {
        let root = tempfile::tempdir().unwrap();
        let recorder = recorder(root.path(), None);
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = hook_calls.clone();
        recorder
            .start(StartOptions {
                interval: Some(0.02),
                duration: Some(0.15),
                prefix: Some("cut".into()),
                after_auto_stop: Some(Box::new(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                })),
            })
            .unwrap();
        recorder.stop(StopReason::Manual);
        recorder.join().await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn capture_error_is_the_stop_reason() {
        let root = tempfile::tempdir().unwrap();
        let recorder = recorder(root.path(), Some(1));
        let dir = recorder
            .start(StartOptions {
                interval: Some(0.01),
                prefix: Some("broken".into()),
                ..Default::default()
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        recorder.join().await;

        let stops = stop_events(&dir);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0]["reason"], "capture_error");
        assert!(stops[0]["detail"].as_str().unwrap().contains("display went away"));
    }

    #[tokio::test]
    async fn factory_failure_still_writes_one_stop() {
        let root = tempfile::tempdir().unwrap();
        let factory: CapturerFactory = Arc::new(|| {
            Err(CaptureError::Connect {
                display: ":9".into(),
                reason: "no such display".into(),
            })
        });
        let recorder = Recorder::new(
            root.path().to_path_buf(),
            Arc::new(EventWriter::new()),
            Arc::new(RuntimeSettings::new(&Config::default())),
            factory,
            Scheduler::new(),
        );
        let dir = recorder
            .start(StartOptions {
                prefix: Some("nodisplay".into()),
                ..Default::default()
            })
            .unwrap();
        recorder.join().await;
        assert_eq!(stop_events(&dir)[0]["reason"], "capture_error");
    }

    #[test]
    fn prefixes_cannot_escape_records_dir() {
        assert!(validate_session_name("rec-2022").is_ok());
        assert!(validate_session_name("../etc").is_err());
        assert!(validate_session_name(".hidden").is_err());
        assert!(validate_session_name("").is_err());
        assert!(default_prefix().starts_with("rec-"));
    }
}
