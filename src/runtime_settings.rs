//! Settings the control surface can change while the process runs.

use crate::config::Config;
use log::debug;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

pub struct RuntimeSettings {
    /// Stored as f64 bits
    screenshot_interval: AtomicU64,
    jpeg_quality: AtomicU8,
    report_cursor: AtomicBool,
}

impl RuntimeSettings {
    pub fn new(config: &Config) -> Self {
        Self {
            screenshot_interval: AtomicU64::new(config.capture.screenshot_interval.to_bits()),
            jpeg_quality: AtomicU8::new(config.capture.jpeg_quality.clamp(1, 100)),
            report_cursor: AtomicBool::new(config.proxy.report_cursor),
        }
    }

    /// Seconds between screenshots for new sessions
    pub fn screenshot_interval(&self) -> f64 {
        f64::from_bits(self.screenshot_interval.load(Ordering::Relaxed))
    }

    pub fn screenshot_period(&self) -> Duration {
        Duration::from_secs_f64(self.screenshot_interval())
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality.load(Ordering::Relaxed)
    }

    pub fn report_cursor(&self) -> bool {
        self.report_cursor.load(Ordering::Relaxed)
    }

    /// Ignored unless positive and finite
    pub fn set_screenshot_interval(&self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.screenshot_interval.store(seconds.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn set_jpeg_quality(&self, quality: u8) {
        self.jpeg_quality.store(quality.clamp(1, 100), Ordering::Relaxed);
    }

    pub fn set_report_cursor(&self, enabled: bool) {
        self.report_cursor.store(enabled, Ordering::Relaxed);
    }

    /// Apply a JSON object patch. Unknown keys are ignored; returns false if
    /// the text is not a JSON object.
    pub fn apply_settings_json(&self, json_str: &str) -> bool {
        let value: Value = match serde_json::from_str(json_str) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(other) => {
                debug!("Settings patch is not an object: {}", other);
                return false;
            }
            Err(err) => {
                debug!("Settings parse failed: {}", err);
                return false;
            }
        };

        if let Some(interval) = value.get("screenshot_interval").and_then(number_like) {
            self.set_screenshot_interval(interval);
        }

        if let Some(quality) = value.get("jpeg_quality").and_then(number_like) {
            self.set_jpeg_quality(quality.clamp(1.0, 100.0) as u8);
        }

        if let Some(enabled) = value.get("report_cursor").and_then(bool_like) {
            self.set_report_cursor(enabled);
        }

        true
    }
}

/// Numbers may arrive as JSON numbers or strings from query parameters
fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            match s.parse::<f64>() {
                Ok(f) => Some(f != 0.0),
                Err(_) => Some(s == "true" || s == "t"),
            }
        }
        _ => None,
    }
}
