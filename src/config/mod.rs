//! Configuration management for recvnc

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Recording proxy configuration
    pub proxy: ProxyConfig,

    /// Screen capture configuration
    pub capture: CaptureConfig,

    /// Offline conversion configuration
    #[serde(default)]
    pub serializer: SerializerConfig,

    /// HTTP control surface configuration
    pub http: HttpConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address for viewers
    pub listen_host: String,

    /// Public port viewers connect to
    pub listen_port: u16,

    /// VNC server host
    pub upstream_host: String,

    /// VNC server port
    pub upstream_port: u16,

    /// A reconnect from the same host within this window continues the session
    #[serde(default = "default_reconnect_tolerance_ms")]
    pub reconnect_tolerance_ms: u64,

    /// Record cursor shape updates
    #[serde(default = "default_report_cursor")]
    pub report_cursor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// X11 display to grab
    pub display: String,

    /// Seconds between screenshots
    pub screenshot_interval: f64,

    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Directory holding one sub-directory per recording session
    pub records_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializerConfig {
    /// Directory receiving converted sessions
    pub converted_dir: PathBuf,

    /// Grid step in seconds
    pub base_interval: f64,

    /// Longest press (seconds) still reported as a click
    #[serde(default = "default_click_window")]
    pub click_threshold: Option<f64>,

    /// Clicks closer than this (seconds) merge into double/triple clicks
    #[serde(default = "default_click_window")]
    pub unification_interval: Option<f64>,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            converted_dir: PathBuf::from("/files/converted"),
            base_interval: 0.1,
            click_threshold: default_click_window(),
            unification_interval: default_click_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// HTTP bind address
    pub host: String,

    /// HTTP port for the control surface
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig {
                listen_host: "0.0.0.0".to_string(),
                listen_port: 5902,
                upstream_host: "127.0.0.1".to_string(),
                upstream_port: 5900,
                reconnect_tolerance_ms: default_reconnect_tolerance_ms(),
                report_cursor: default_report_cursor(),
            },
            capture: CaptureConfig {
                display: ":1.0".to_string(),
                screenshot_interval: 0.1,
                jpeg_quality: default_jpeg_quality(),
                records_dir: PathBuf::from("/files/records"),
            },
            serializer: SerializerConfig::default(),
            http: HttpConfig {
                host: "0.0.0.0".to_string(),
                port: 8888,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.proxy.upstream_host.trim().is_empty() {
            return Err("Upstream host must not be empty".into());
        }

        if self.proxy.listen_port == self.http.port && self.proxy.listen_host == self.http.host {
            return Err("Proxy and HTTP control surface cannot share a port".into());
        }

        if !(self.capture.screenshot_interval.is_finite() && self.capture.screenshot_interval > 0.0) {
            return Err("Screenshot interval must be a positive number of seconds".into());
        }

        if self.capture.jpeg_quality == 0 || self.capture.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".into());
        }

        if !(self.serializer.base_interval.is_finite() && self.serializer.base_interval > 0.0) {
            return Err("Serializer base interval must be positive".into());
        }

        for (name, value) in [
            ("click_threshold", self.serializer.click_threshold),
            ("unification_interval", self.serializer.unification_interval),
        ] {
            if let Some(v) = value {
                if !(v.is_finite() && v >= 0.0) {
                    return Err(format!("Serializer {} must be non-negative", name).into());
                }
            }
        }

        Ok(())
    }

    pub fn reconnect_tolerance(&self) -> Duration {
        Duration::from_millis(self.proxy.reconnect_tolerance_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_interval() {
        let mut cfg = Config::default();
        cfg.capture.screenshot_interval = 0.0;
        assert!(cfg.validate().is_err());
        cfg.capture.screenshot_interval = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_quality() {
        let mut cfg = Config::default();
        cfg.capture.jpeg_quality = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_field_defaults() {
        let text = r#"
[proxy]
listen_host = "127.0.0.1"
listen_port = 6000
upstream_host = "vnc"
upstream_port = 5901

[capture]
display = ":0"
screenshot_interval = 0.25
records_dir = "/tmp/records"

[http]
host = "127.0.0.1"
port = 9000

[logging]
level = "debug"
"#;
        let cfg: Config = toml::from_str(text).unwrap();
        assert_eq!(cfg.proxy.reconnect_tolerance_ms, 1000);
        assert!(cfg.proxy.report_cursor);
        assert_eq!(cfg.capture.jpeg_quality, 90);
        assert_eq!(cfg.serializer.base_interval, 0.1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_serializer_table_keeps_click_windows() {
        let text = r#"
[proxy]
listen_host = "127.0.0.1"
listen_port = 6000
upstream_host = "vnc"
upstream_port = 5901

[capture]
display = ":0"
screenshot_interval = 0.25
records_dir = "/tmp/records"

[serializer]
converted_dir = "/tmp/converted"
base_interval = 0.2

[http]
host = "127.0.0.1"
port = 9000

[logging]
level = "info"
"#;
        let cfg: Config = toml::from_str(text).unwrap();
        assert_eq!(cfg.serializer.base_interval, 0.2);
        assert_eq!(cfg.serializer.click_threshold, Some(1.0 / 3.0));
        assert_eq!(cfg.serializer.unification_interval, Some(1.0 / 3.0));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.proxy.listen_port, 5902);
    }
}

fn default_reconnect_tolerance_ms() -> u64 {
    1000
}

fn default_report_cursor() -> bool {
    true
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_click_window() -> Option<f64> {
    Some(1.0 / 3.0)
}
