//! Viewer → server direction
//!
//! Follows the viewer's half of the handshake, then frames client messages.
//! Key and pointer messages are reported to the sink; SetPixelFormat updates
//! the shared pixel format the server leg decodes cursors with.

use super::version::GREETING_LEN;
use super::{
    parse_greeting, ByteQueue, DecodeError, DecodedEventSink, PixelFormat, ProtocolVersion,
    SharedArbitration, Step, StreamParser, SECURITY_INVALID, SECURITY_NONE, SECURITY_VNC_AUTH,
};
use log::{debug, info};
use std::sync::Arc;

const SET_PIXEL_FORMAT: u8 = 0;
const SET_ENCODINGS: u8 = 2;
const FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
const KEY_EVENT: u8 = 4;
const POINTER_EVENT: u8 = 5;
const CLIENT_CUT_TEXT: u8 = 6;
const ENABLE_CONTINUOUS_UPDATES: u8 = 150;
const CLIENT_FENCE: u8 = 248;
const SET_DESKTOP_SIZE: u8 = 251;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Greeting,
    SecurityChoice,
    AuthResponse,
    ClientInit,
    Messages,
}

pub struct ViewerStream {
    phase: Phase,
    arbitration: SharedArbitration,
    sink: Arc<dyn DecodedEventSink>,
}

impl ViewerStream {
    pub fn new(arbitration: SharedArbitration, sink: Arc<dyn DecodedEventSink>) -> Self {
        Self {
            phase: Phase::Greeting,
            arbitration,
            sink,
        }
    }

    pub fn in_message_phase(&self) -> bool {
        self.phase == Phase::Messages
    }

    fn after_security(&mut self, security: u8) -> Result<Step, DecodeError> {
        match security {
            SECURITY_NONE => self.phase = Phase::ClientInit,
            SECURITY_VNC_AUTH => self.phase = Phase::AuthResponse,
            // The server refused; it will close the connection
            SECURITY_INVALID => return Ok(Step::Finished),
            other => return Err(DecodeError::UnsupportedSecurity(other as u32)),
        }
        Ok(Step::Continue)
    }

    fn message(&mut self, queue: &mut ByteQueue) -> Result<Step, DecodeError> {
        let Some(&[kind]) = queue.peek(1) else {
            return Ok(Step::NeedMore);
        };
        match kind {
            SET_PIXEL_FORMAT => {
                let Some(msg) = queue.take(20) else {
                    return Ok(Step::NeedMore);
                };
                if let Some(pf) = PixelFormat::parse(&msg[4..20]) {
                    debug!("Viewer set pixel format {:?}", pf);
                    self.arbitration.lock().pixel_format = Some(pf);
                }
            }
            SET_ENCODINGS => {
                let Some(header) = queue.peek(4) else {
                    return Ok(Step::NeedMore);
                };
                let count = u16::from_be_bytes([header[2], header[3]]) as usize;
                let Some(msg) = queue.take(4 + 4 * count) else {
                    return Ok(Step::NeedMore);
                };
                let encodings: Vec<i32> = msg[4..]
                    .chunks_exact(4)
                    .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                debug!("Viewer encodings {:?}", encodings);
            }
            FRAMEBUFFER_UPDATE_REQUEST | ENABLE_CONTINUOUS_UPDATES => {
                if queue.take(10).is_none() {
                    return Ok(Step::NeedMore);
                }
            }
            KEY_EVENT => {
                let Some(msg) = queue.take(8) else {
                    return Ok(Step::NeedMore);
                };
                let keysym = u32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]);
                self.sink.key(keysym, msg[1] != 0);
            }
            POINTER_EVENT => {
                let Some(msg) = queue.take(6) else {
                    return Ok(Step::NeedMore);
                };
                let x = u16::from_be_bytes([msg[2], msg[3]]);
                let y = u16::from_be_bytes([msg[4], msg[5]]);
                self.sink.pointer(x, y, msg[1]);
            }
            CLIENT_CUT_TEXT => {
                let Some(header) = queue.peek(8) else {
                    return Ok(Step::NeedMore);
                };
                // Negative lengths announce extended clipboard payloads
                let len = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);
                queue.skip(8 + len.unsigned_abs() as usize);
            }
            CLIENT_FENCE => {
                let Some(header) = queue.peek(9) else {
                    return Ok(Step::NeedMore);
                };
                let len = 9 + header[8] as usize;
                queue.skip(len);
            }
            SET_DESKTOP_SIZE => {
                let Some(header) = queue.peek(8) else {
                    return Ok(Step::NeedMore);
                };
                let len = 8 + 16 * header[6] as usize;
                queue.skip(len);
            }
            other => return Err(DecodeError::UnknownMessage(other)),
        }
        Ok(Step::Continue)
    }
}

impl StreamParser for ViewerStream {
    fn step(&mut self, queue: &mut ByteQueue) -> Result<Step, DecodeError> {
        match self.phase {
            Phase::Greeting => {
                let Some(greeting) = queue.take(GREETING_LEN) else {
                    return Ok(Step::NeedMore);
                };
                let (major, minor) = parse_greeting(&greeting)?;
                let version = ProtocolVersion::normalize(major, minor)?;
                info!("Viewer speaks RFB {}.{} (using {})", major, minor, version);
                self.arbitration.lock().client_version = Some(version);
                self.phase = Phase::SecurityChoice;
                Ok(Step::Continue)
            }
            Phase::SecurityChoice => {
                // Hold the viewer's bytes until the server's greeting has been seen
                let (negotiated, imposed) = {
                    let arb = self.arbitration.lock();
                    (arb.negotiated(), arb.security_type)
                };
                let Some(version) = negotiated else {
                    return Ok(Step::NeedMore);
                };
                if version.has_security_list() {
                    let Some(choice) = queue.take(1) else {
                        return Ok(Step::NeedMore);
                    };
                    let security = choice[0];
                    debug!("Viewer chose security type {}", security);
                    self.arbitration.lock().security_type = Some(security);
                    self.after_security(security)
                } else {
                    match imposed {
                        Some(security) => self.after_security(security),
                        None => Ok(Step::NeedMore),
                    }
                }
            }
            Phase::AuthResponse => {
                if queue.take(16).is_none() {
                    return Ok(Step::NeedMore);
                }
                self.phase = Phase::ClientInit;
                Ok(Step::Continue)
            }
            Phase::ClientInit => {
                let Some(init) = queue.take(1) else {
                    return Ok(Step::NeedMore);
                };
                debug!("Viewer requested shared={}", init[0] != 0);
                self.phase = Phase::Messages;
                Ok(Step::Continue)
            }
            Phase::Messages => self.message(queue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{CollectingSink, Decoded};
    use super::super::{new_arbitration, ShadowDecoder};
    use super::*;

    fn viewer_after_handshake() -> (ShadowDecoder<ViewerStream>, Arc<CollectingSink>, SharedArbitration) {
        let arbitration = new_arbitration();
        {
            let mut arb = arbitration.lock();
            arb.server_version = Some(ProtocolVersion::V3_8);
        }
        let sink = Arc::new(CollectingSink::default());
        let mut viewer = ShadowDecoder::new(ViewerStream::new(arbitration.clone(), sink.clone()));
        viewer.feed(b"RFB 003.008\n").unwrap();
        viewer.feed(&[SECURITY_NONE, 1]).unwrap();
        assert!(viewer.parser().in_message_phase());
        (viewer, sink, arbitration)
    }

    #[test]
    fn skips_uninteresting_messages() {
        let (mut viewer, sink, _) = viewer_after_handshake();
        let mut stream = vec![SET_ENCODINGS, 0, 0, 2];
        stream.extend_from_slice(&0i32.to_be_bytes());
        stream.extend_from_slice(&(-239i32).to_be_bytes());
        stream.extend_from_slice(&[FRAMEBUFFER_UPDATE_REQUEST, 1, 0, 0, 0, 0, 4, 0, 3, 0]);
        stream.extend_from_slice(&[CLIENT_CUT_TEXT, 0, 0, 0]);
        stream.extend_from_slice(&5i32.to_be_bytes());
        stream.extend_from_slice(b"hello");
        stream.extend_from_slice(&[POINTER_EVENT, 0, 0, 7, 0, 9]);
        viewer.feed(&stream).unwrap();
        assert_eq!(sink.take(), vec![Decoded::Pointer(7, 9, 0)]);
    }

    #[test]
    fn extended_clipboard_uses_absolute_length() {
        let (mut viewer, sink, _) = viewer_after_handshake();
        let mut stream = vec![CLIENT_CUT_TEXT, 0, 0, 0];
        stream.extend_from_slice(&(-4i32).to_be_bytes());
        stream.extend_from_slice(&[1, 2, 3, 4]);
        stream.extend_from_slice(&[KEY_EVENT, 0, 0, 0, 0, 0, 0xff, 0x0d]);
        viewer.feed(&stream).unwrap();
        assert_eq!(sink.take(), vec![Decoded::Key(0xff0d, false)]);
    }

    #[test]
    fn set_pixel_format_is_shared() {
        let (mut viewer, _, arbitration) = viewer_after_handshake();
        let mut msg = vec![SET_PIXEL_FORMAT, 0, 0, 0];
        msg.extend_from_slice(&[16, 16, 0, 1, 0, 31, 0, 63, 0, 31, 11, 5, 0, 0, 0, 0]);
        viewer.feed(&msg).unwrap();
        assert_eq!(arbitration.lock().pixel_format.map(|pf| pf.bits_per_pixel), Some(16));
    }

    #[test]
    fn unknown_message_desyncs_without_being_fatal() {
        let (mut viewer, _, _) = viewer_after_handshake();
        let err = viewer.feed(&[99, 0, 0]).unwrap_err();
        assert!(!err.is_fatal());
        assert!(viewer.is_halted());
    }

    #[test]
    fn waits_for_server_greeting_before_security_choice() {
        let arbitration = new_arbitration();
        let sink = Arc::new(CollectingSink::default());
        let mut viewer = ShadowDecoder::new(ViewerStream::new(arbitration.clone(), sink));
        viewer.feed(b"RFB 003.008\n").unwrap();
        viewer.feed(&[SECURITY_NONE]).unwrap();
        assert_eq!(arbitration.lock().security_type, None);

        arbitration.lock().server_version = Some(ProtocolVersion::V3_7);
        viewer.feed(&[]).unwrap();
        assert_eq!(arbitration.lock().security_type, Some(SECURITY_NONE));
    }

    #[test]
    fn version_3_3_follows_server_imposed_security() {
        let arbitration = new_arbitration();
        {
            let mut arb = arbitration.lock();
            arb.server_version = Some(ProtocolVersion::V3_3);
            arb.security_type = Some(SECURITY_VNC_AUTH);
        }
        let sink = Arc::new(CollectingSink::default());
        let mut viewer = ShadowDecoder::new(ViewerStream::new(arbitration, sink.clone()));
        viewer.feed(b"RFB 003.008\n").unwrap();
        viewer.feed(&[0u8; 16]).unwrap();
        viewer.feed(&[1, POINTER_EVENT, 4, 0, 1, 0, 2]).unwrap();
        assert_eq!(sink.take(), vec![Decoded::Pointer(1, 2, 4)]);
    }
}
