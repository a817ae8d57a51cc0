//! X11 Screen capture
//!
//! Reads the root window with XGetImage and converts it to packed RGB.

use crate::capture::capturer::{CaptureError, Capturer};
use crate::capture::frame::{Frame, FrameStats};
use crate::writer::unix_time;
use log::debug;
use std::ffi::CString;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::xcb_ffi::XCBConnection;

/// Byte order constants
const BYTE_ORDER_LSB_FIRST: u8 = 0;

/// Screen capturer using X11
pub struct X11Capturer {
    /// XCB connection
    conn: XCBConnection,
    /// Root window
    root: Window,
    /// Screen width
    width: u32,
    /// Screen height
    height: u32,
    /// Depth
    depth: u8,
    /// Byte order (0 = LSB, 1 = MSB)
    byte_order: u8,
    /// Bytes per pixel
    bytes_per_pixel: usize,
    /// Bytes per line (stride)
    bytes_per_line: usize,
    sequence: u64,
    stats: FrameStats,
}

impl X11Capturer {
    /// Connect to `display` (e.g. `":1.0"`) and target its root window
    pub fn connect(display: &str) -> Result<Self, CaptureError> {
        let connect_error = |reason: String| CaptureError::Connect {
            display: display.to_string(),
            reason,
        };
        let display_cstr = CString::new(display).map_err(|e| connect_error(e.to_string()))?;
        let (conn, screen_num) = XCBConnection::connect(Some(display_cstr.as_c_str()))
            .map_err(|e| connect_error(e.to_string()))?;

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| connect_error(format!("no screen {}", screen_num)))?;
        let root = screen.root;
        let width = screen.width_in_pixels as u32;
        let height = screen.height_in_pixels as u32;
        let depth = screen.root_depth;
        let byte_order = u8::from(conn.setup().image_byte_order);
        let (bytes_per_pixel, bytes_per_line) = compute_format(&conn, width, depth);
        debug!(
            "Capturing {} at {}x{} depth {} ({} bytes/line)",
            display, width, height, depth, bytes_per_line
        );

        Ok(Self {
            conn,
            root,
            width,
            height,
            depth,
            byte_order,
            bytes_per_pixel,
            bytes_per_line,
            sequence: 0,
            stats: FrameStats::default(),
        })
    }

    /// Convert raw image data to RGB format
    fn convert_raw_to_rgb(&self, src: &[u8], height: u32) -> Result<Vec<u8>, CaptureError> {
        let mut dst = Vec::with_capacity((self.width * height * 3) as usize);
        let row_span = self.width as usize * self.bytes_per_pixel;

        match self.depth {
            24 | 32 => {
                for y in 0..height as usize {
                    let row = &src[y * self.bytes_per_line..y * self.bytes_per_line + row_span];
                    for px in row.chunks_exact(self.bytes_per_pixel) {
                        if self.byte_order == BYTE_ORDER_LSB_FIRST {
                            // BGRX
                            dst.extend_from_slice(&[px[2], px[1], px[0]]);
                        } else {
                            // XRGB
                            let o = self.bytes_per_pixel - 3;
                            dst.extend_from_slice(&[px[o], px[o + 1], px[o + 2]]);
                        }
                    }
                }
            }
            16 => {
                // 16-bit RGB565
                for y in 0..height as usize {
                    let row = &src[y * self.bytes_per_line..y * self.bytes_per_line + row_span];
                    for px in row.chunks_exact(2) {
                        let pixel = if self.byte_order == BYTE_ORDER_LSB_FIRST {
                            u16::from_le_bytes([px[0], px[1]])
                        } else {
                            u16::from_be_bytes([px[0], px[1]])
                        };
                        let r = ((pixel >> 11) & 0x1F) as u8;
                        let g = ((pixel >> 5) & 0x3F) as u8;
                        let b = (pixel & 0x1F) as u8;
                        dst.extend_from_slice(&[r << 3, g << 2, b << 3]);
                    }
                }
            }
            other => return Err(CaptureError::BadFrame(format!("unsupported depth {}", other))),
        }

        Ok(dst)
    }

    fn effective_height(&self, data_len: usize) -> u32 {
        let max_rows = data_len / self.bytes_per_line.max(1);
        let height = (max_rows.min(self.height as usize)) as u32;
        if height != self.height {
            debug!(
                "Truncated frame: expected {} rows, got {} rows",
                self.height, height
            );
        }
        height
    }
}

impl Capturer for X11Capturer {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let start = std::time::Instant::now();
        let image = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                self.root,
                0,
                0,
                self.width as u16,
                self.height as u16,
                u32::MAX,
            )?
            .reply()?;
        let captured_at = unix_time();

        let height = self.effective_height(image.data.len());
        let data = self.convert_raw_to_rgb(&image.data, height)?;

        let sequence = self.sequence;
        self.sequence += 1;
        self.stats
            .record_capture(data.len(), start.elapsed().as_micros() as u64);

        Ok(Frame {
            width: self.width,
            height,
            data,
            captured_at,
            sequence,
        })
    }

    fn stats(&self) -> FrameStats {
        self.stats.clone()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn compute_format(conn: &XCBConnection, width: u32, depth: u8) -> (usize, usize) {
    let mut bytes_per_pixel = 4usize;
    let mut bytes_per_line = width as usize * bytes_per_pixel;

    for format in &conn.setup().pixmap_formats {
        if format.depth == depth {
            let bpp = format.bits_per_pixel as usize;
            let pad = (format.scanline_pad as usize).max(8);
            bytes_per_pixel = (bpp / 8).max(1);
            let bits_per_line = width as usize * bpp;
            let padded_bits = ((bits_per_line + pad - 1) / pad) * pad;
            bytes_per_line = padded_bits / 8;
            return (bytes_per_pixel, bytes_per_line);
        }
    }

    (bytes_per_pixel, bytes_per_line)
}
