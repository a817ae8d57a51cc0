//! Cursor compositing
//!
//! Cursor bitmaps arrive in the event log as base64 RGBA plus a 1 bit per
//! pixel stencil (MSB first, rows padded to a byte). They are pasted onto
//! frames with the hotspot at the pointer position.

use crate::event::CursorShape;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{Rgb, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("cursor {what} is not valid base64: {source}")]
    Base64 {
        what: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("cursor {what} has {got} bytes, expected {expected}")]
    Size {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Decoded cursor. A zero width or height means no visible cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    pub offset_x: i32,
    pub offset_y: i32,
    pub width: u32,
    pub height: u32,
    rgba: Vec<u8>,
    mask: Vec<u8>,
}

impl CursorImage {
    pub fn hidden() -> Self {
        Self {
            offset_x: 0,
            offset_y: 0,
            width: 0,
            height: 0,
            rgba: Vec::new(),
            mask: Vec::new(),
        }
    }

    pub fn from_shape(shape: &CursorShape) -> Result<Self, CursorError> {
        if shape.width == 0 || shape.height == 0 {
            return Ok(Self {
                offset_x: shape.x,
                offset_y: shape.y,
                ..Self::hidden()
            });
        }

        let rgba = decode("bitmap", &shape.rgba_base64)?;
        let mask = decode("mask", &shape.mask_base64)?;
        let (w, h) = (shape.width as usize, shape.height as usize);
        check_len("bitmap", w * h * 4, rgba.len())?;
        check_len("mask", mask_stride(shape.width) * h, mask.len())?;

        Ok(Self {
            offset_x: shape.x,
            offset_y: shape.y,
            width: shape.width,
            height: shape.height,
            rgba,
            mask,
        })
    }

    pub fn is_hidden(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn mask_bit(&self, x: u32, y: u32) -> bool {
        let byte = self.mask[y as usize * mask_stride(self.width) + (x / 8) as usize];
        byte & (0x80 >> (x % 8)) != 0
    }

    /// Paste onto `frame` so the hotspot lands on `position`. Pixels outside
    /// the frame are clipped.
    pub fn draw(&self, frame: &mut RgbImage, position: (i32, i32)) {
        if self.is_hidden() {
            return;
        }
        let left = position.0 - self.offset_x;
        let top = position.1 - self.offset_y;
        let (fw, fh) = frame.dimensions();

        for cy in 0..self.height {
            let py = top + cy as i32;
            if py < 0 || py >= fh as i32 {
                continue;
            }
            for cx in 0..self.width {
                let px = left + cx as i32;
                if px < 0 || px >= fw as i32 || !self.mask_bit(cx, cy) {
                    continue;
                }
                let i = ((cy * self.width + cx) * 4) as usize;
                frame.put_pixel(
                    px as u32,
                    py as u32,
                    Rgb([self.rgba[i], self.rgba[i + 1], self.rgba[i + 2]]),
                );
            }
        }
    }
}

fn mask_stride(width: u32) -> usize {
    (width as usize + 7) / 8
}

fn decode(what: &'static str, text: &str) -> Result<Vec<u8>, CursorError> {
    STANDARD
        .decode(text.as_bytes())
        .map_err(|source| CursorError::Base64 { what, source })
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), CursorError> {
    if got < expected {
        return Err(CursorError::Size { what, expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(x: i32, y: i32, w: u32, h: u32, rgba: &[u8], mask: &[u8]) -> CursorShape {
        CursorShape {
            x,
            y,
            width: w,
            height: h,
            rgba_base64: STANDARD.encode(rgba),
            mask_base64: STANDARD.encode(mask),
        }
    }

    #[test]
    fn zero_sized_cursor_leaves_frame_untouched() {
        let cursor = CursorImage::from_shape(&shape(0, 0, 0, 5, &[], &[])).unwrap();
        assert!(cursor.is_hidden());
        let mut frame = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        let before = frame.clone();
        cursor.draw(&mut frame, (4, 4));
        assert_eq!(frame, before);
    }

    #[test]
    fn pastes_at_position_minus_hotspot_through_mask() {
        // 2x2 red cursor, bottom-right pixel masked out, hotspot (1, 1)
        let rgba = [255, 0, 0, 255].repeat(4);
        let mask = [0b1100_0000, 0b1000_0000];
        let cursor = CursorImage::from_shape(&shape(1, 1, 2, 2, &rgba, &mask)).unwrap();

        let mut frame = RgbImage::new(6, 6);
        cursor.draw(&mut frame, (3, 3));

        let red = Rgb([255, 0, 0]);
        let black = Rgb([0, 0, 0]);
        assert_eq!(*frame.get_pixel(2, 2), red);
        assert_eq!(*frame.get_pixel(3, 2), red);
        assert_eq!(*frame.get_pixel(2, 3), red);
        assert_eq!(*frame.get_pixel(3, 3), black);
        assert_eq!(*frame.get_pixel(1, 1), black);
        assert_eq!(*frame.get_pixel(4, 4), black);
    }

    #[test]
    fn clips_at_frame_edges() {
        let rgba = [0, 255, 0, 255].repeat(9);
        let mask = [0xE0, 0xE0, 0xE0];
        let cursor = CursorImage::from_shape(&shape(0, 0, 3, 3, &rgba, &mask)).unwrap();
        let mut frame = RgbImage::new(2, 2);
        cursor.draw(&mut frame, (1, -1));
        assert_eq!(*frame.get_pixel(1, 0), Rgb([0, 255, 0]));
        assert_eq!(*frame.get_pixel(1, 1), Rgb([0, 255, 0]));
        assert_eq!(*frame.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn short_bitmap_is_rejected() {
        let err = CursorImage::from_shape(&shape(0, 0, 2, 2, &[0; 8], &[0xC0, 0xC0])).unwrap_err();
        assert!(matches!(err, CursorError::Size { what: "bitmap", expected: 16, got: 8 }));
        let err = CursorImage::from_shape(&CursorShape {
            rgba_base64: "!!".into(),
            ..shape(0, 0, 1, 1, &[0; 4], &[0x80])
        })
        .unwrap_err();
        assert!(matches!(err, CursorError::Base64 { what: "bitmap", .. }));
    }
}
