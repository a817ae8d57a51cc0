//! Captured screen frame

use super::CaptureError;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One screenshot
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Raw pixel data (RGB format)
    pub data: Vec<u8>,

    /// Unix time the image was read back from the display
    pub captured_at: f64,

    /// Frame sequence number within the capturer
    pub sequence: u64,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame({}x{}, {} bytes, seq={})",
            self.width,
            self.height,
            self.data.len(),
            self.sequence
        )
    }
}

impl Frame {
    /// Session file name, `<epoch>.jpg`
    pub fn file_name(&self) -> String {
        format!("{:.6}.jpg", self.captured_at)
    }

    /// Encode as JPEG at `path`
    pub fn save_jpeg(&self, path: &Path, quality: u8) -> Result<(), CaptureError> {
        let io_error = |source| CaptureError::Io {
            path: path.to_path_buf(),
            source,
        };
        let expected = self.width as usize * self.height as usize * 3;
        if self.data.len() != expected {
            return Err(CaptureError::BadFrame(format!(
                "{} holds {} bytes, expected {}",
                self, self.data.len(), expected
            )));
        }
        let file = File::create(path).map_err(io_error)?;
        let mut out = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&self.data, self.width, self.height, ColorType::Rgb8)
            .map_err(|source| CaptureError::Encode {
                path: path.to_path_buf(),
                source,
            })?;
        out.flush().map_err(io_error)
    }
}

/// Frame statistics for monitoring
#[derive(Debug, Default, Clone)]
pub struct FrameStats {
    /// Total frames captured
    pub total_frames: u64,

    /// Total bytes captured
    pub total_bytes: u64,

    /// Total capture time in microseconds
    pub total_capture_time_us: u64,

    /// Last capture time in microseconds
    pub last_capture_time_us: u64,
}

impl FrameStats {
    /// Record a frame capture
    pub fn record_capture(&mut self, bytes: usize, time_us: u64) {
        self.total_frames += 1;
        self.total_bytes += bytes as u64;
        self.last_capture_time_us = time_us;
        self.total_capture_time_us += time_us;
    }

    pub fn average_capture_time_us(&self) -> u64 {
        if self.total_frames == 0 {
            0
        } else {
            self.total_capture_time_us / self.total_frames
        }
    }
}
