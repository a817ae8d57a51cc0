//! Recording RFB proxy
//!
//! Each accepted viewer gets its own upstream connection and a pair of relay
//! tasks. Every chunk read from one side is handed to that leg's shadow
//! decoder and then written, unmodified, to the other side. Decoding happens
//! before forwarding so facts one leg learns are recorded before the peer can
//! react to them.

mod debounce;

pub use debounce::{ConnectionStart, ReconnectDebounce, SessionHooks};

use crate::event::{CursorShape, EventKind};
use crate::rfb::{
    new_arbitration, DecodeError, DecodedEventSink, ServerStream, ShadowDecoder, StreamParser,
    ViewerStream,
};
use crate::runtime_settings::RuntimeSettings;
use crate::writer::EventWriter;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

const RELAY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("cannot reach upstream {addr}: {source}")]
    Upstream {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("relay I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(#[from] DecodeError),
}

/// Writes decoded input to the session log
pub struct RecordingSink {
    writer: Arc<EventWriter>,
    settings: Arc<RuntimeSettings>,
    peer: SocketAddr,
}

impl RecordingSink {
    pub fn new(writer: Arc<EventWriter>, settings: Arc<RuntimeSettings>, peer: SocketAddr) -> Self {
        Self { writer, settings, peer }
    }

    fn append(&self, kind: EventKind, args: Vec<Value>) {
        if let Err(e) = self.writer.record(kind, args) {
            error!("Dropping {} event from {}: {}", kind, self.peer, e);
        }
    }
}

impl DecodedEventSink for RecordingSink {
    fn key(&self, keysym: u32, down: bool) {
        self.append(EventKind::Key, vec![Value::from(keysym), Value::from(down)]);
    }

    fn pointer(&self, x: u16, y: u16, button_mask: u8) {
        self.append(
            EventKind::Pointer,
            vec![Value::from(x), Value::from(y), Value::from(button_mask)],
        );
    }

    fn cursor(&self, shape: CursorShape) {
        if !self.settings.report_cursor() {
            return;
        }
        if let Err(e) = self.writer.record_or_stash(EventKind::Cursor, "cursor", shape.to_args()) {
            error!("Dropping cursor event from {}: {}", self.peer, e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub listen_addr: String,
    pub upstream_host: String,
    pub upstream_port: u16,
}

/// Accepts viewers and relays them to the upstream VNC server
pub struct VncProxy {
    options: ProxyOptions,
    writer: Arc<EventWriter>,
    settings: Arc<RuntimeSettings>,
    debounce: Arc<ReconnectDebounce>,
}

impl VncProxy {
    pub fn new(
        options: ProxyOptions,
        writer: Arc<EventWriter>,
        settings: Arc<RuntimeSettings>,
        debounce: Arc<ReconnectDebounce>,
    ) -> Self {
        Self {
            options,
            writer,
            settings,
            debounce,
        }
    }

    /// Bind the public port and serve forever
    pub async fn run(self: Arc<Self>) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(&self.options.listen_addr).await?;
        info!(
            "VNC proxy listening on {} -> {}:{}",
            self.options.listen_addr, self.options.upstream_host, self.options.upstream_port
        );
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ProxyError> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("New viewer connection from {}", peer);

            let proxy = self.clone();
            tokio::spawn(async move {
                if let Err(e) = proxy.handle_connection(stream, peer).await {
                    warn!("Connection from {} ended: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, viewer: TcpStream, peer: SocketAddr) -> Result<(), ProxyError> {
        let upstream_addr = format!("{}:{}", self.options.upstream_host, self.options.upstream_port);
        let upstream = TcpStream::connect(&upstream_addr)
            .await
            .map_err(|source| ProxyError::Upstream {
                addr: upstream_addr.clone(),
                source,
            })?;
        viewer.set_nodelay(true)?;
        upstream.set_nodelay(true)?;

        let host = peer.ip().to_string();
        self.debounce.connected(&host);

        let arbitration = new_arbitration();
        let sink: Arc<dyn DecodedEventSink> =
            Arc::new(RecordingSink::new(self.writer.clone(), self.settings.clone(), peer));
        let viewer_decoder = ShadowDecoder::new(ViewerStream::new(arbitration.clone(), sink.clone()));
        let server_decoder = ShadowDecoder::new(ServerStream::new(arbitration, sink));

        let (viewer_read, viewer_write) = viewer.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();

        // A clean EOF only half-closes the pair so in-flight data still drains;
        // an error on either leg ends both
        let result = tokio::try_join!(
            relay(viewer_read, upstream_write, viewer_decoder, "viewer", peer),
            relay(upstream_read, viewer_write, server_decoder, "server", peer),
        );

        self.debounce.disconnected(&host);
        result.map(|(sent, received)| {
            debug!(
                "Connection from {} closed after {} bytes up, {} bytes down",
                peer, sent, received
            )
        })
    }
}

/// Copy `from` to `to`, decoding each chunk first. Returns bytes relayed.
async fn relay<P: StreamParser>(
    mut from: OwnedReadHalf,
    mut to: OwnedWriteHalf,
    mut decoder: ShadowDecoder<P>,
    leg: &'static str,
    peer: SocketAddr,
) -> Result<u64, ProxyError> {
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Err(e) = decoder.feed(&buf[..n]) {
            if e.is_fatal() {
                warn!("Dropping {}: {} sent {}", peer, leg, e);
                return Err(e.into());
            }
            warn!("Stopped decoding {} stream of {}: {}", leg, peer, e);
        }
        to.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    let _ = to.shutdown().await;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::parse_log;
    use crate::schedule::Scheduler;
    use crate::writer::EVENT_LOG_NAME;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct NoHooks;

    impl SessionHooks for NoHooks {
        fn connection_made(&self, _host: &str) {}
        fn connection_lost(&self, _host: &str) {}
    }

    async fn start_proxy(upstream_port: u16, writer: Arc<EventWriter>) -> SocketAddr {
        let settings = Arc::new(RuntimeSettings::new(&Config::default()));
        let debounce = Arc::new(ReconnectDebounce::new(
            Scheduler::new(),
            Duration::from_millis(50),
            Arc::new(NoHooks),
        ));
        let proxy = Arc::new(VncProxy::new(
            ProxyOptions {
                listen_addr: "127.0.0.1:0".into(),
                upstream_host: "127.0.0.1".into(),
                upstream_port,
            },
            writer,
            settings,
            debounce,
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(proxy.serve(listener));
        addr
    }

    /// Fake VNC server: 3.8, security None, then reads `expect` bytes of client messages
    async fn fake_server(expect: usize) -> (u16, oneshot::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            s.write_all(b"RFB 003.008\n").await.unwrap();
            let mut greeting = [0u8; 12];
            s.read_exact(&mut greeting).await.unwrap();
            s.write_all(&[1, 1]).await.unwrap();
            let mut choice = [0u8; 1];
            s.read_exact(&mut choice).await.unwrap();
            s.write_all(&0u32.to_be_bytes()).await.unwrap();
            let mut init = [0u8; 1];
            s.read_exact(&mut init).await.unwrap();
            s.write_all(&crate::rfb::testing::server_init(32, 32, "fake")).await.unwrap();
            let mut received = vec![0u8; expect];
            s.read_exact(&mut received).await.unwrap();
            let _ = tx.send(received);
        });
        (port, rx)
    }

    #[tokio::test]
    async fn relays_bytes_and_records_input() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join(EVENT_LOG_NAME);
        let writer = Arc::new(EventWriter::new());
        writer.start(&log_path).unwrap();

        let messages: Vec<u8> = [
            vec![4, 1, 0, 0, 0, 0, 0, 0x62],
            vec![5, 1, 0, 3, 0, 4],
        ]
        .concat();
        let (upstream_port, received) = fake_server(messages.len()).await;
        let proxy_addr = start_proxy(upstream_port, writer.clone()).await;

        let mut viewer = TcpStream::connect(proxy_addr).await.unwrap();
        let mut greeting = [0u8; 12];
        viewer.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"RFB 003.008\n");
        viewer.write_all(b"RFB 003.008\n").await.unwrap();
        let mut offer = [0u8; 2];
        viewer.read_exact(&mut offer).await.unwrap();
        viewer.write_all(&[1]).await.unwrap();
        let mut result = [0u8; 4];
        viewer.read_exact(&mut result).await.unwrap();
        viewer.write_all(&[1]).await.unwrap();
        let mut init = vec![0u8; 24 + 4];
        viewer.read_exact(&mut init).await.unwrap();
        viewer.write_all(&messages).await.unwrap();

        let relayed = received.await.unwrap();
        assert_eq!(relayed, messages);

        writer.stop(None).unwrap();
        let records = parse_log(&std::fs::read_to_string(&log_path).unwrap()).unwrap();
        let kinds: Vec<EventKind> = records.iter().map(|r| r.event).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Start, EventKind::Key, EventKind::Pointer, EventKind::Stop]
        );
        assert_eq!(records[1].args, vec![Value::from(0x62u32), Value::from(true)]);
    }

    #[tokio::test]
    async fn viewer_half_close_still_drains_server_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            s.write_all(b"RFB 003.008\n").await.unwrap();
            let mut from_viewer = Vec::new();
            s.read_to_end(&mut from_viewer).await.unwrap();
            assert_eq!(from_viewer, b"RFB 003.008\n");
            s.write_all(b"late frame").await.unwrap();
        });

        let proxy_addr = start_proxy(upstream_port, Arc::new(EventWriter::new())).await;
        let mut viewer = TcpStream::connect(proxy_addr).await.unwrap();
        let mut greeting = [0u8; 12];
        viewer.read_exact(&mut greeting).await.unwrap();
        viewer.write_all(b"RFB 003.008\n").await.unwrap();
        viewer.shutdown().await.unwrap();

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), viewer.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rest, b"late frame");
    }

    #[tokio::test]
    async fn malformed_greeting_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let _ = s.write_all(b"RFB 003.008\n").await;
            let mut sink = Vec::new();
            let _ = s.read_to_end(&mut sink).await;
        });

        let proxy_addr = start_proxy(upstream_port, Arc::new(EventWriter::new())).await;
        let mut viewer = TcpStream::connect(proxy_addr).await.unwrap();
        let mut greeting = [0u8; 12];
        viewer.read_exact(&mut greeting).await.unwrap();
        viewer.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), viewer.read_to_end(&mut rest)).await;
        // Closed without relaying anything (a reset is also acceptable)
        assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
        assert!(rest.is_empty());
    }
}
