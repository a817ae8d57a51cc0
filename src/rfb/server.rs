//! Server → viewer direction
//!
//! Follows the server's half of the handshake, then frames server messages.
//! FramebufferUpdate rectangles are walked by encoding so cursor
//! pseudo-rectangles can be found; pixel payloads are skipped by length.
//! Encodings that are not self-delimiting without decompression (Tight and
//! friends) end decoding on this leg.

use super::cursor::{decode_rich_cursor, decode_x_cursor, empty_cursor, rich_cursor_len, x_cursor_len};
use super::pixel::PIXEL_FORMAT_LEN;
use super::version::GREETING_LEN;
use super::{
    parse_greeting, ByteQueue, DecodeError, DecodedEventSink, PixelFormat, ProtocolVersion,
    SharedArbitration, Step, StreamParser, SECURITY_INVALID, SECURITY_NONE, SECURITY_VNC_AUTH,
};
use log::{debug, info, warn};
use std::sync::Arc;

const FRAMEBUFFER_UPDATE: u8 = 0;
const SET_COLOUR_MAP_ENTRIES: u8 = 1;
const BELL: u8 = 2;
const SERVER_CUT_TEXT: u8 = 3;
const END_OF_CONTINUOUS_UPDATES: u8 = 150;
const SERVER_FENCE: u8 = 248;

const ENCODING_RAW: i32 = 0;
const ENCODING_COPY_RECT: i32 = 1;
const ENCODING_RRE: i32 = 2;
const ENCODING_CORRE: i32 = 4;
const ENCODING_HEXTILE: i32 = 5;
const ENCODING_ZLIB: i32 = 6;
const ENCODING_ZRLE: i32 = 16;
const ENCODING_DESKTOP_SIZE: i32 = -223;
const ENCODING_LAST_RECT: i32 = -224;
const ENCODING_POINTER_POS: i32 = -232;
const ENCODING_CURSOR: i32 = -239;
const ENCODING_X_CURSOR: i32 = -240;
const ENCODING_DESKTOP_NAME: i32 = -307;
const ENCODING_EXTENDED_DESKTOP_SIZE: i32 = -308;

const HEXTILE_RAW: u8 = 1;
const HEXTILE_BACKGROUND: u8 = 2;
const HEXTILE_FOREGROUND: u8 = 4;
const HEXTILE_ANY_SUBRECTS: u8 = 8;
const HEXTILE_SUBRECTS_COLOURED: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: u16,
    y: u16,
    width: u16,
    height: u16,
    encoding: i32,
}

impl Rect {
    fn parse(b: &[u8]) -> Self {
        Self {
            x: u16::from_be_bytes([b[0], b[1]]),
            y: u16::from_be_bytes([b[2], b[3]]),
            width: u16::from_be_bytes([b[4], b[5]]),
            height: u16::from_be_bytes([b[6], b[7]]),
            encoding: i32::from_be_bytes([b[8], b[9], b[10], b[11]]),
        }
    }

    fn tiles_across(&self) -> usize {
        (self.width as usize + 15) / 16
    }

    fn tile_count(&self) -> usize {
        self.tiles_across() * ((self.height as usize + 15) / 16)
    }

    /// Size of hextile tile `index` (row-major)
    fn tile_size(&self, index: usize) -> (usize, usize) {
        let across = self.tiles_across().max(1);
        let (tx, ty) = (index % across, index / across);
        let tw = (self.width as usize - tx * 16).min(16);
        let th = (self.height as usize - ty * 16).min(16);
        (tw, th)
    }
}

/// Rectangles left in the current update; `None` until a LastRect marker
type Remaining = Option<u16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Greeting,
    SecurityOffer,
    AwaitChoice,
    Challenge,
    SecurityResult,
    FailureReason,
    ServerInit,
    Messages,
    Rectangles(Remaining),
    RectBody(Rect, Remaining),
    Hextile { rect: Rect, tile: usize, remaining: Remaining },
}

pub struct ServerStream {
    phase: Phase,
    arbitration: SharedArbitration,
    sink: Arc<dyn DecodedEventSink>,
}

impl ServerStream {
    pub fn new(arbitration: SharedArbitration, sink: Arc<dyn DecodedEventSink>) -> Self {
        Self {
            phase: Phase::Greeting,
            arbitration,
            sink,
        }
    }

    pub fn in_message_phase(&self) -> bool {
        matches!(
            self.phase,
            Phase::Messages | Phase::Rectangles(_) | Phase::RectBody(..) | Phase::Hextile { .. }
        )
    }

    fn negotiated(&self) -> Option<ProtocolVersion> {
        self.arbitration.lock().negotiated()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.arbitration.lock().pixel_format.unwrap_or_default()
    }

    fn security_offer(&mut self, queue: &mut ByteQueue) -> Result<Step, DecodeError> {
        let Some(version) = self.negotiated() else {
            return Ok(Step::NeedMore);
        };
        if !version.has_security_list() {
            let Some(raw) = queue.take(4) else {
                return Ok(Step::NeedMore);
            };
            let security = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let security = u8::try_from(security).map_err(|_| DecodeError::UnsupportedSecurity(security))?;
            self.arbitration.lock().security_type = Some(security);
            self.phase = match security {
                SECURITY_INVALID => Phase::FailureReason,
                SECURITY_NONE => Phase::ServerInit,
                SECURITY_VNC_AUTH => Phase::Challenge,
                other => return Err(DecodeError::UnsupportedSecurity(other as u32)),
            };
            return Ok(Step::Continue);
        }

        let Some(&[count]) = queue.peek(1) else {
            return Ok(Step::NeedMore);
        };
        let Some(offer) = queue.take(1 + count as usize) else {
            return Ok(Step::NeedMore);
        };
        if count == 0 {
            self.phase = Phase::FailureReason;
        } else {
            debug!("Server offers security types {:?}", &offer[1..]);
            self.phase = Phase::AwaitChoice;
        }
        Ok(Step::Continue)
    }

    fn await_choice(&mut self) -> Result<Step, DecodeError> {
        let (version, security) = {
            let arb = self.arbitration.lock();
            (arb.negotiated(), arb.security_type)
        };
        let (Some(version), Some(security)) = (version, security) else {
            return Ok(Step::NeedMore);
        };
        self.phase = match security {
            SECURITY_NONE if version.has_failure_reason() => Phase::SecurityResult,
            SECURITY_NONE => Phase::ServerInit,
            SECURITY_VNC_AUTH => Phase::Challenge,
            other => return Err(DecodeError::UnsupportedSecurity(other as u32)),
        };
        Ok(Step::Continue)
    }

    fn security_result(&mut self, queue: &mut ByteQueue) -> Result<Step, DecodeError> {
        let Some(raw) = queue.take(4) else {
            return Ok(Step::NeedMore);
        };
        if u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) == 0 {
            self.phase = Phase::ServerInit;
            return Ok(Step::Continue);
        }
        match self.negotiated() {
            Some(v) if v.has_failure_reason() => {
                self.phase = Phase::FailureReason;
                Ok(Step::Continue)
            }
            _ => {
                info!("Server rejected authentication");
                Ok(Step::Finished)
            }
        }
    }

    fn failure_reason(&mut self, queue: &mut ByteQueue) -> Result<Step, DecodeError> {
        let Some(header) = queue.peek(4) else {
            return Ok(Step::NeedMore);
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let Some(msg) = queue.take(4 + len) else {
            return Ok(Step::NeedMore);
        };
        info!("Server refused connection: {}", String::from_utf8_lossy(&msg[4..]));
        Ok(Step::Finished)
    }

    fn server_init(&mut self, queue: &mut ByteQueue) -> Result<Step, DecodeError> {
        let Some(header) = queue.peek(24) else {
            return Ok(Step::NeedMore);
        };
        let name_len = u32::from_be_bytes([header[20], header[21], header[22], header[23]]) as usize;
        let Some(init) = queue.take(24 + name_len) else {
            return Ok(Step::NeedMore);
        };
        let width = u16::from_be_bytes([init[0], init[1]]);
        let height = u16::from_be_bytes([init[2], init[3]]);
        let pf = PixelFormat::parse(&init[4..4 + PIXEL_FORMAT_LEN]);
        info!(
            "Desktop '{}' {}x{}",
            String::from_utf8_lossy(&init[24..]),
            width,
            height
        );
        {
            let mut arb = self.arbitration.lock();
            arb.framebuffer_size = Some((width, height));
            arb.pixel_format = pf;
        }
        self.phase = Phase::Messages;
        Ok(Step::Continue)
    }

    fn message(&mut self, queue: &mut ByteQueue) -> Result<Step, DecodeError> {
        let Some(&[kind]) = queue.peek(1) else {
            return Ok(Step::NeedMore);
        };
        match kind {
            FRAMEBUFFER_UPDATE => {
                let Some(header) = queue.take(4) else {
                    return Ok(Step::NeedMore);
                };
                let count = u16::from_be_bytes([header[2], header[3]]);
                let remaining = if count == u16::MAX { None } else { Some(count) };
                self.phase = Phase::Rectangles(remaining);
            }
            SET_COLOUR_MAP_ENTRIES => {
                let Some(header) = queue.peek(6) else {
                    return Ok(Step::NeedMore);
                };
                let count = u16::from_be_bytes([header[4], header[5]]) as usize;
                queue.skip(6 + 6 * count);
            }
            BELL | END_OF_CONTINUOUS_UPDATES => queue.skip(1),
            SERVER_CUT_TEXT => {
                let Some(header) = queue.peek(8) else {
                    return Ok(Step::NeedMore);
                };
                let len = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);
                queue.skip(8 + len.unsigned_abs() as usize);
            }
            SERVER_FENCE => {
                let Some(header) = queue.peek(9) else {
                    return Ok(Step::NeedMore);
                };
                let len = 9 + header[8] as usize;
                queue.skip(len);
            }
            other => return Err(DecodeError::UnknownMessage(other)),
        }
        Ok(Step::Continue)
    }

    fn rectangles(&mut self, queue: &mut ByteQueue, remaining: Remaining) -> Result<Step, DecodeError> {
        if remaining == Some(0) {
            self.phase = Phase::Messages;
            return Ok(Step::Continue);
        }
        let Some(header) = queue.take(12) else {
            return Ok(Step::NeedMore);
        };
        let rect = Rect::parse(&header);
        self.phase = Phase::RectBody(rect, remaining.map(|r| r - 1));
        Ok(Step::Continue)
    }

    fn rect_body(&mut self, queue: &mut ByteQueue, rect: Rect, remaining: Remaining) -> Result<Step, DecodeError> {
        let pf = self.pixel_format();
        let bpp = pf.bytes_per_pixel();
        let (w, h) = (rect.width as usize, rect.height as usize);

        match rect.encoding {
            ENCODING_RAW => queue.skip(w * h * bpp),
            ENCODING_COPY_RECT => queue.skip(4),
            ENCODING_RRE | ENCODING_CORRE => {
                let Some(header) = queue.peek(4) else {
                    return Ok(Step::NeedMore);
                };
                let count = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
                let subrect = if rect.encoding == ENCODING_RRE { bpp + 8 } else { bpp + 4 };
                queue.skip(4 + bpp + count * subrect);
            }
            ENCODING_HEXTILE => {
                self.phase = Phase::Hextile { rect, tile: 0, remaining };
                return Ok(Step::Continue);
            }
            ENCODING_ZLIB | ENCODING_ZRLE => {
                let Some(header) = queue.peek(4) else {
                    return Ok(Step::NeedMore);
                };
                let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
                queue.skip(4 + len);
            }
            ENCODING_CURSOR => {
                let Some(data) = queue.take(rich_cursor_len(rect.width, rect.height, &pf)) else {
                    return Ok(Step::NeedMore);
                };
                debug!("Cursor shape {}x{} hotspot {},{}", rect.width, rect.height, rect.x, rect.y);
                self.sink
                    .cursor(decode_rich_cursor(rect.x, rect.y, rect.width, rect.height, &pf, &data));
            }
            ENCODING_X_CURSOR => {
                let len = x_cursor_len(rect.width, rect.height);
                let Some(data) = queue.take(len) else {
                    return Ok(Step::NeedMore);
                };
                let shape = if len == 0 {
                    empty_cursor(rect.x, rect.y)
                } else {
                    decode_x_cursor(rect.x, rect.y, rect.width, rect.height, &data)
                };
                self.sink.cursor(shape);
            }
            ENCODING_DESKTOP_SIZE => {
                debug!("Desktop resized to {}x{}", rect.width, rect.height);
                self.arbitration.lock().framebuffer_size = Some((rect.width, rect.height));
            }
            ENCODING_EXTENDED_DESKTOP_SIZE => {
                let Some(&[screens]) = queue.peek(1) else {
                    return Ok(Step::NeedMore);
                };
                queue.skip(4 + 16 * screens as usize);
                self.arbitration.lock().framebuffer_size = Some((rect.width, rect.height));
            }
            ENCODING_DESKTOP_NAME => {
                let Some(header) = queue.peek(4) else {
                    return Ok(Step::NeedMore);
                };
                let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
                queue.skip(4 + len);
            }
            ENCODING_POINTER_POS => {}
            ENCODING_LAST_RECT => {
                self.phase = Phase::Messages;
                return Ok(Step::Continue);
            }
            other => {
                warn!("Cannot frame rectangle encoding {}, no more cursor updates on this connection", other);
                return Err(DecodeError::UnsupportedEncoding(other));
            }
        }
        self.phase = Phase::Rectangles(remaining);
        Ok(Step::Continue)
    }

    fn hextile(&mut self, queue: &mut ByteQueue, rect: Rect, tile: usize, remaining: Remaining) -> Result<Step, DecodeError> {
        if tile >= rect.tile_count() {
            self.phase = Phase::Rectangles(remaining);
            return Ok(Step::Continue);
        }
        let bpp = self.pixel_format().bytes_per_pixel();
        let (tw, th) = rect.tile_size(tile);

        let Some(&[flags]) = queue.peek(1) else {
            return Ok(Step::NeedMore);
        };
        let len = if flags & HEXTILE_RAW != 0 {
            1 + tw * th * bpp
        } else {
            let mut len = 1;
            if flags & HEXTILE_BACKGROUND != 0 {
                len += bpp;
            }
            if flags & HEXTILE_FOREGROUND != 0 {
                len += bpp;
            }
            if flags & HEXTILE_ANY_SUBRECTS != 0 {
                let Some(head) = queue.peek(len + 1) else {
                    return Ok(Step::NeedMore);
                };
                let count = head[len] as usize;
                let per_subrect = if flags & HEXTILE_SUBRECTS_COLOURED != 0 { bpp + 2 } else { 2 };
                len += 1 + count * per_subrect;
            }
            len
        };
        queue.skip(len);
        self.phase = Phase::Hextile { rect, tile: tile + 1, remaining };
        Ok(Step::Continue)
    }
}

impl StreamParser for ServerStream {
    fn step(&mut self, queue: &mut ByteQueue) -> Result<Step, DecodeError> {
        match self.phase {
            Phase::Greeting => {
                let Some(greeting) = queue.take(GREETING_LEN) else {
                    return Ok(Step::NeedMore);
                };
                let (major, minor) = parse_greeting(&greeting)?;
                let version = ProtocolVersion::normalize(major, minor)?;
                info!("Server speaks RFB {}.{} (using {})", major, minor, version);
                self.arbitration.lock().server_version = Some(version);
                self.phase = Phase::SecurityOffer;
                Ok(Step::Continue)
            }
            Phase::SecurityOffer => self.security_offer(queue),
            Phase::AwaitChoice => self.await_choice(),
            Phase::Challenge => {
                if queue.take(16).is_none() {
                    return Ok(Step::NeedMore);
                }
                self.phase = Phase::SecurityResult;
                Ok(Step::Continue)
            }
            Phase::SecurityResult => self.security_result(queue),
            Phase::FailureReason => self.failure_reason(queue),
            Phase::ServerInit => self.server_init(queue),
            Phase::Messages => self.message(queue),
            Phase::Rectangles(remaining) => self.rectangles(queue, remaining),
            Phase::RectBody(rect, remaining) => self.rect_body(queue, rect, remaining),
            Phase::Hextile { rect, tile, remaining } => self.hextile(queue, rect, tile, remaining),
        }
    }
}
