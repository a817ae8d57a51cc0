//! Cursor pseudo-encodings → [`CursorShape`]
//!
//! Both encodings are normalised to the log's cursor form: a packed RGBA
//! bitmap (alpha always 255) and a 1-bit mask, MSB first, each row padded to
//! a whole byte. Zero-sized cursors mean "no visible cursor" and keep empty
//! bitmaps.

use super::PixelFormat;
use crate::event::CursorShape;
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Bytes in one mask row
pub fn mask_stride(width: u16) -> usize {
    (width as usize + 7) / 8
}

/// Payload length of a rich (`Cursor`, -239) rectangle
pub fn rich_cursor_len(width: u16, height: u16, pf: &PixelFormat) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h * pf.bytes_per_pixel() + mask_stride(width) * h
}

/// Payload length of an `XCursor` (-240) rectangle
pub fn x_cursor_len(width: u16, height: u16) -> usize {
    if width == 0 || height == 0 {
        return 0;
    }
    6 + 2 * mask_stride(width) * height as usize
}

pub fn empty_cursor(hot_x: u16, hot_y: u16) -> CursorShape {
    CursorShape {
        x: hot_x as i32,
        y: hot_y as i32,
        width: 0,
        height: 0,
        rgba_base64: String::new(),
        mask_base64: String::new(),
    }
}

/// Decode a rich cursor: pixels in the session pixel format, then the mask
pub fn decode_rich_cursor(
    hot_x: u16,
    hot_y: u16,
    width: u16,
    height: u16,
    pf: &PixelFormat,
    data: &[u8],
) -> CursorShape {
    if width == 0 || height == 0 {
        return empty_cursor(hot_x, hot_y);
    }
    let bpp = pf.bytes_per_pixel();
    let pixels = width as usize * height as usize;
    let (pixel_data, mask) = data.split_at((pixels * bpp).min(data.len()));

    let mut rgba = Vec::with_capacity(pixels * 4);
    for px in pixel_data.chunks_exact(bpp) {
        let [r, g, b] = pf.to_rgb(px);
        rgba.extend_from_slice(&[r, g, b, 255]);
    }

    shape(hot_x, hot_y, width, height, &rgba, mask)
}

/// Decode an X cursor: two RGB colours, a source bitmap picking between them, then the mask
pub fn decode_x_cursor(hot_x: u16, hot_y: u16, width: u16, height: u16, data: &[u8]) -> CursorShape {
    if width == 0 || height == 0 || data.len() < x_cursor_len(width, height) {
        return empty_cursor(hot_x, hot_y);
    }
    let fg = [data[0], data[1], data[2], 255];
    let bg = [data[3], data[4], data[5], 255];
    let stride = mask_stride(width);
    let bitmap_len = stride * height as usize;
    let source = &data[6..6 + bitmap_len];
    let mask = &data[6 + bitmap_len..6 + 2 * bitmap_len];

    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height as usize {
        for col in 0..width as usize {
            let byte = source[row * stride + col / 8];
            let set = byte & (0x80 >> (col % 8)) != 0;
            rgba.extend_from_slice(if set { &fg } else { &bg });
        }
    }

    shape(hot_x, hot_y, width, height, &rgba, mask)
}

fn shape(hot_x: u16, hot_y: u16, width: u16, height: u16, rgba: &[u8], mask: &[u8]) -> CursorShape {
    CursorShape {
        x: hot_x as i32,
        y: hot_y as i32,
        width: width as u32,
        height: height as u32,
        rgba_base64: STANDARD.encode(rgba),
        mask_base64: STANDARD.encode(mask),
    }
}
