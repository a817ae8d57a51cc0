//! Periodic screenshot loop
//!
//! Runs on a blocking thread. Each iteration waits on the stop latch for the
//! rest of the interval, so a stop request interrupts the wait immediately and
//! a slow grab shortens the next wait instead of drifting.

use super::{CaptureError, Capturer};
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Set/clear event a capture loop waits on. Starts set (idle).
pub struct StopLatch {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Default for StopLatch {
    fn default() -> Self {
        Self {
            set: Mutex::new(true),
            cond: Condvar::new(),
        }
    }
}

impl StopLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.set.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Block up to `timeout` for the latch; returns whether it is set
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        if *set {
            return true;
        }
        let deadline = Instant::now() + timeout;
        while !*set {
            if self.cond.wait_until(&mut set, deadline).timed_out() {
                break;
            }
        }
        *set
    }
}

/// One recording session's capture parameters
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub session_dir: PathBuf,
    pub interval: Duration,
    pub jpeg_quality: u8,
}

/// Capture until the latch is set. Returns the number of screenshots saved.
pub fn run_capture_loop(
    capturer: &mut dyn Capturer,
    job: &CaptureJob,
    latch: &StopLatch,
) -> Result<u64, CaptureError> {
    let mut elapsed = Duration::ZERO;
    let mut saved = 0u64;

    while !latch.wait_timeout(job.interval.saturating_sub(elapsed)) {
        let started = Instant::now();
        let frame = capturer.capture()?;
        let path = job.session_dir.join(frame.file_name());
        frame.save_jpeg(&path, job.jpeg_quality)?;
        saved += 1;
        elapsed = started.elapsed();
        if elapsed > job.interval {
            debug!("Screenshot {} took {:?}, longer than the interval", saved, elapsed);
        }
    }

    let stats = capturer.stats();
    info!(
        "Saved {} screenshots to {:?} (avg grab {} us)",
        saved,
        job.session_dir,
        stats.average_capture_time_us()
    );
    Ok(saved)
}


#[cfg(test)]
mod tests {
    use super::testing::FakeCapturer;
    use super::*;
    use std::sync::Arc;

    #[test]
    fn latch_starts_set_and_wakes_waiters() {
        let latch = Arc::new(StopLatch::new());
        assert!(latch.is_set());
        latch.clear();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));

        let waiter = {
            let latch = latch.clone();
            std::thread::spawn(move || latch.wait_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        latch.set();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn loop_saves_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let latch = Arc::new(StopLatch::new());
        latch.clear();
        let job = CaptureJob {
            session_dir: dir.path().to_path_buf(),
            interval: Duration::from_millis(20),
            jpeg_quality: 75,
        };

        let stopper = {
            let latch = latch.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(150));
                latch.set();
            })
        };
        let mut capturer = FakeCapturer::new(4, 4);
        let saved = run_capture_loop(&mut capturer, &job, &latch).unwrap();
        stopper.join().unwrap();

        assert!(saved >= 2);
        let jpgs = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().map_or(false, |x| x == "jpg"))
            .count() as u64;
        assert_eq!(jpgs, saved);
    }

    #[test]
    fn capture_failure_ends_loop() {
        let dir = tempfile::tempdir().unwrap();
        let latch = StopLatch::new();
        latch.clear();
        let job = CaptureJob {
            session_dir: dir.path().to_path_buf(),
            interval: Duration::from_millis(5),
            jpeg_quality: 75,
        };
        let mut capturer = FakeCapturer::new(2, 2);
        capturer.fail_after = Some(2);
        assert!(matches!(
            run_capture_loop(&mut capturer, &job, &latch),
            Err(CaptureError::X11(_))
        ));
    }
}
