//! Shadow RFB decoders
//!
//! The proxy feeds each leg's bytes to a decoder before forwarding them. The
//! decoders follow the handshake and message framing just far enough to pull
//! out input events and cursor shapes; framebuffer pixel data is skipped by
//! length, never decoded.
//!
//! The two legs never reference each other. Facts one leg learns that the
//! other needs (versions, security type, pixel format) go through one
//! [`SharedArbitration`] record per connection pair.

mod cursor;
mod pixel;
mod queue;
mod server;
mod version;
mod viewer;

pub use pixel::PixelFormat;
pub use queue::ByteQueue;
pub use server::ServerStream;
pub use version::{parse_greeting, ProtocolVersion};
pub use viewer::ViewerStream;

use crate::event::CursorShape;
use parking_lot::Mutex;
use std::sync::Arc;

/// Security types the decoders can follow
pub const SECURITY_INVALID: u8 = 0;
pub const SECURITY_NONE: u8 = 1;
pub const SECURITY_VNC_AUTH: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed protocol greeting {0:?}")]
    BadGreeting(String),

    #[error("unsupported protocol version {0}.{1}")]
    UnsupportedVersion(u16, u16),

    #[error("security type {0} cannot be followed")]
    UnsupportedSecurity(u32),

    #[error("unknown message type {0}")]
    UnknownMessage(u8),

    #[error("unsupported rectangle encoding {0}")]
    UnsupportedEncoding(i32),
}

impl DecodeError {
    /// Fatal errors end the connection; the rest only stop the shadow decoder
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DecodeError::BadGreeting(_) | DecodeError::UnsupportedVersion(..)
        )
    }
}

/// Cross-leg state of one proxied connection
#[derive(Debug, Default, Clone)]
pub struct ConnectionArbitration {
    pub server_version: Option<ProtocolVersion>,
    pub client_version: Option<ProtocolVersion>,
    /// Chosen by the viewer (3.7+) or imposed by the server (3.3)
    pub security_type: Option<u8>,
    pub pixel_format: Option<PixelFormat>,
    pub framebuffer_size: Option<(u16, u16)>,
}

impl ConnectionArbitration {
    /// Both greetings seen: the lower of the two versions
    pub fn negotiated(&self) -> Option<ProtocolVersion> {
        Some(self.server_version?.min(self.client_version?))
    }
}

pub type SharedArbitration = Arc<Mutex<ConnectionArbitration>>;

pub fn new_arbitration() -> SharedArbitration {
    Arc::new(Mutex::new(ConnectionArbitration::default()))
}

/// Receiver of decoded input/output events
pub trait DecodedEventSink: Send + Sync {
    fn key(&self, keysym: u32, down: bool);
    fn pointer(&self, x: u16, y: u16, button_mask: u8);
    fn cursor(&self, shape: CursorShape);
}

/// Outcome of one parsing step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Consumed something; try again
    Continue,
    /// Waiting for more bytes (or for the other leg)
    NeedMore,
    /// Nothing left to follow on this leg
    Finished,
}

/// One direction of the RFB conversation
pub trait StreamParser: Send {
    fn step(&mut self, queue: &mut ByteQueue) -> Result<Step, DecodeError>;
}

/// Buffers a leg's bytes and drives its parser.
///
/// After an error or once the parser finishes, further input is ignored so a
/// confused decoder never grows its buffer or affects the relay.
pub struct ShadowDecoder<P> {
    parser: P,
    queue: ByteQueue,
    halted: bool,
}

impl<P: StreamParser> ShadowDecoder<P> {
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            queue: ByteQueue::new(),
            halted: false,
        }
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        if self.halted {
            return Ok(());
        }
        self.queue.extend(data);
        loop {
            match self.parser.step(&mut self.queue) {
                Ok(Step::Continue) => continue,
                Ok(Step::NeedMore) => return Ok(()),
                Ok(Step::Finished) => {
                    self.halt();
                    return Ok(());
                }
                Err(e) => {
                    self.halt();
                    return Err(e);
                }
            }
        }
    }

    fn halt(&mut self) {
        self.halted = true;
        self.queue.clear();
    }
}

pub type ViewerDecoder = ShadowDecoder<ViewerStream>;
pub type ServerDecoder = ShadowDecoder<ServerStream>;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Decoded {
        Key(u32, bool),
        Pointer(u16, u16, u8),
        Cursor(CursorShape),
    }

    #[derive(Default)]
    pub struct CollectingSink {
        pub events: Mutex<Vec<Decoded>>,
    }

    impl CollectingSink {
        pub fn take(&self) -> Vec<Decoded> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl DecodedEventSink for CollectingSink {
        fn key(&self, keysym: u32, down: bool) {
            self.events.lock().push(Decoded::Key(keysym, down));
        }

        fn pointer(&self, x: u16, y: u16, button_mask: u8) {
            self.events.lock().push(Decoded::Pointer(x, y, button_mask));
        }

        fn cursor(&self, shape: CursorShape) {
            self.events.lock().push(Decoded::Cursor(shape));
        }
    }

    /// 32bpp little-endian true colour, red in the high byte
    pub fn pixel_format_bytes() -> [u8; 16] {
        [32, 24, 0, 1, 0, 255, 0, 255, 0, 255, 16, 8, 0, 0, 0, 0]
    }

    pub fn server_init(width: u16, height: u16, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&width.to_be_bytes());
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&pixel_format_bytes());
        out.extend_from_slice(&(name.len() as u32).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        out
    }
}
