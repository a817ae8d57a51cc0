//! Pixel format and pixel → RGB conversion

/// Wire size of a PIXEL_FORMAT structure
pub const PIXEL_FORMAT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl Default for PixelFormat {
    /// 32bpp true colour, the usual server default
    fn default() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_colour: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }
}

impl PixelFormat {
    /// Parse the 16-byte wire structure (3 trailing padding bytes ignored)
    pub fn parse(b: &[u8]) -> Option<Self> {
        if b.len() < PIXEL_FORMAT_LEN {
            return None;
        }
        Some(Self {
            bits_per_pixel: b[0],
            depth: b[1],
            big_endian: b[2] != 0,
            true_colour: b[3] != 0,
            red_max: u16::from_be_bytes([b[4], b[5]]),
            green_max: u16::from_be_bytes([b[6], b[7]]),
            blue_max: u16::from_be_bytes([b[8], b[9]]),
            red_shift: b[10],
            green_shift: b[11],
            blue_shift: b[12],
        })
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize / 8).max(1)
    }

    /// Convert one pixel to 8-bit RGB.
    ///
    /// Colour-mapped pixels have no palette here and come out as grey.
    pub fn to_rgb(&self, px: &[u8]) -> [u8; 3] {
        let n = self.bytes_per_pixel().min(px.len()).min(4);
        let value = if self.big_endian {
            px[..n].iter().fold(0u32, |acc, b| (acc << 8) | *b as u32)
        } else {
            px[..n].iter().rev().fold(0u32, |acc, b| (acc << 8) | *b as u32)
        };
        if !self.true_colour {
            let grey = value as u8;
            return [grey, grey, grey];
        }
        // Shifts come from the wire; out-of-range ones read as zero
        let channel = |shift: u8, max: u16| scale(value.checked_shr(shift as u32).unwrap_or(0), max);
        [
            channel(self.red_shift, self.red_max),
            channel(self.green_shift, self.green_max),
            channel(self.blue_shift, self.blue_max),
        ]
    }
}

fn scale(raw: u32, max: u16) -> u8 {
    if max == 0 {
        return 0;
    }
    let max = max as u32;
    ((raw & max) * 255 / max) as u8
}
