//! Framed message transport over TCP.
//!
//! A [`Transport`] is a duplex stream of [`Message`]s over one TCP
//! connection. Each message is one length-delimited frame:
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 BE)|  JSON body (length bytes) |
//! +----------------+---------------------------+
//! ```
//!
//! Reads and writes are independently locked so a pump task can sit in
//! [`Transport::receive`] while other tasks [`Transport::send`]. Concurrent
//! sends are serialized by the writer lock, keeping frames whole and FIFO.
//!
//! Body decoding happens after framing: a frame that is not a valid message
//! surfaces as a non-transport error and the stream stays usable.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SmsError};
use crate::protocol::{Message, DEFAULT_MAX_FRAME_BYTES};

/// How long [`Transport::close`] waits for buffered output to drain.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(250);

/// Transport tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Largest accepted frame body in bytes
    pub max_frame_bytes: usize,
    /// Upper bound on establishing an outbound connection
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Set the frame size limit
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn codec(&self) -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .length_field_length(4)
            .big_endian()
            .max_frame_length(self.max_frame_bytes)
            .new_codec()
    }
}

/// Duplex message stream over one TCP connection.
#[derive(Debug)]
pub struct Transport {
    reader: Mutex<FramedRead<OwnedReadHalf, LengthDelimitedCodec>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    closed: AtomicBool,
    max_frame_bytes: usize,
}

impl Transport {
    /// Connect to `host:port` with default settings.
    pub async fn open(host: &str, port: u16) -> Result<Self> {
        Self::open_with(host, port, TransportConfig::default()).await
    }

    /// Connect to `host:port`.
    ///
    /// Any failure (resolution, refusal, timeout) maps to [`SmsError::Connect`].
    pub async fn open_with(host: &str, port: u16, config: TransportConfig) -> Result<Self> {
        let target = format!("{host}:{port}");
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| SmsError::Connect(format!("{target}: timed out")))?
            .map_err(|e| SmsError::Connect(format!("{target}: {e}")))?;

        Self::from_stream(stream, config)
    }

    /// Wrap an established stream (used by the listener for accepted sockets).
    pub fn from_stream(stream: TcpStream, config: TransportConfig) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: Mutex::new(FramedRead::new(read_half, config.codec())),
            writer: Mutex::new(FramedWrite::new(write_half, config.codec())),
            peer_addr,
            local_addr,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    /// Write one message as one frame.
    pub async fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(SmsError::Closed);
        }

        let body = message.to_bytes()?;
        if body.len() > self.max_frame_bytes {
            return Err(SmsError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_bytes,
            });
        }

        let mut writer = self.writer.lock().await;
        tokio::select! {
            () = self.shutdown.cancelled() => Err(SmsError::Closed),
            res = writer.send(Bytes::from(body)) => res.map_err(SmsError::from),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on peer EOF or after [`close`](Self::close).
    /// A frame whose body is not a valid message yields
    /// [`SmsError::Json`]; the connection remains usable.
    pub async fn receive(&self) -> Result<Option<Message>> {
        if self.is_closed() {
            return Ok(None);
        }

        let mut reader = self.reader.lock().await;
        let frame = tokio::select! {
            () = self.shutdown.cancelled() => return Ok(None),
            frame = reader.next() => frame,
        };

        match frame {
            None => Ok(None),
            Some(Ok(bytes)) => Message::from_slice(&bytes).map(Some),
            Some(Err(e)) => Err(SmsError::Io(e)),
        }
    }

    /// Close the connection. Idempotent and callable from any task.
    ///
    /// Pending `receive`/`send` calls return promptly; the peer observes EOF.
    /// Buffered output gets at most [`CLOSE_FLUSH_TIMEOUT`] to drain, so a
    /// peer that stopped reading cannot stall the caller.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, SinkExt::<Bytes>::flush(&mut *writer)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(peer = %self.peer_addr, "flush on close failed: {}", e),
            Err(_) => tracing::debug!(peer = %self.peer_addr, "peer not reading, dropping unflushed bytes"),
        }
        if let Err(e) = writer.get_mut().shutdown().await {
            tracing::debug!(peer = %self.peer_addr, "shutdown on close failed: {}", e);
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Remote endpoint
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local endpoint
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn pair() -> (Transport, Transport) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, accepted) = tokio::join!(Transport::open("127.0.0.1", port), listener.accept());
        let (stream, _) = accepted.unwrap();
        (
            client.unwrap(),
            Transport::from_stream(stream, TransportConfig::default()).unwrap(),
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.max_frame_bytes, 8 * 1024 * 1024);

        let config = config.with_max_frame_bytes(1024);
        assert_eq!(config.max_frame_bytes, 1024);
    }

    #[tokio::test]
    async fn test_send_receive() {
        let (client, server) = pair().await;

        client
            .send(&Message::request("LOGIN").with_data("username", "alice"))
            .await
            .unwrap();

        let received = server.receive().await.unwrap().unwrap();
        assert_eq!(received.action, "LOGIN");
        assert_eq!(received.get_str("username"), Some("alice"));
        assert_eq!(server.peer_addr(), client.local_addr());
    }

    #[tokio::test]
    async fn test_close_yields_eof_to_peer() {
        let (client, server) = pair().await;

        client.close().await;
        client.close().await;

        assert!(client.is_closed());
        assert!(server.receive().await.unwrap().is_none());
        assert!(matches!(
            client.send(&Message::request("LOGOUT")).await,
            Err(SmsError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_receive() {
        let (client, _server) = pair().await;
        let client = std::sync::Arc::new(client);

        let reader = {
            let client = client.clone();
            tokio::spawn(async move { client.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close().await;

        let res = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(res.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_returns_when_peer_stops_reading() {
        let (client, _server) = pair().await;
        let client = std::sync::Arc::new(client);

        // keeps writing until both socket buffers are full
        let writer = {
            let client = client.clone();
            tokio::spawn(async move {
                let msg = Message::request("SEARCH_STUDENTS").with_data("searchKeyword", "z".repeat(4 * 1024 * 1024));
                loop {
                    if let Err(e) = client.send(&msg).await {
                        return e;
                    }
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;

        tokio::time::timeout(Duration::from_secs(2), client.close())
            .await
            .expect("close blocked on a stalled peer");
        assert!(client.is_closed());

        let sent = tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(sent, SmsError::Closed));
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut raw = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let server = Transport::from_stream(stream, TransportConfig::default()).unwrap();

        let garbage = b"not json";
        raw.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        raw.write_all(garbage).await.unwrap();

        let good = Message::request("LOGOUT").to_bytes().unwrap();
        raw.write_all(&(good.len() as u32).to_be_bytes()).await.unwrap();
        raw.write_all(&good).await.unwrap();

        let err = server.receive().await.unwrap_err();
        assert!(!err.is_transport());

        let msg = server.receive().await.unwrap().unwrap();
        assert_eq!(msg.action, "LOGOUT");
    }

    #[tokio::test]
    async fn test_oversized_send_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = TransportConfig::default().with_max_frame_bytes(64);
        let client = Transport::open_with("127.0.0.1", port, config).await.unwrap();

        let msg = Message::request("SEARCH_STUDENTS").with_data("searchKeyword", "x".repeat(200));
        let err = client.send(&msg).await.unwrap_err();
        assert!(matches!(err, SmsError::FrameTooLarge { max: 64, .. }));
    }

    #[tokio::test]
    async fn test_open_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = Transport::open("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, SmsError::Connect(_)));
    }
}
