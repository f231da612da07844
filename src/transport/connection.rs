//! # Connection
//!
//! One socket to the server, plain or TLS, framed with [`WireCodec`].
//!
//! A connection is used by one request at a time: every request is written
//! and its reply read before the next request is sent. Any I/O error,
//! timeout, or framing violation invalidates the handle; every later call
//! fails with `HandleClosed` and the pool discards it.

use std::pin::Pin;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

use crate::core::codec::WireCodec;
use crate::core::packet::{OpCode, Packet, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::{constants, DriverError, Result, TransportErrorKind};
use crate::protocol::message::MessageFormat;
use crate::transport::tls::{self, TlsClientConfig};
use crate::utils::compression::Compressor;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_message;

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique request id
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Default `maxBsonObjectSize` before the server reports one
pub const DEFAULT_MAX_BSON_OBJECT_SIZE: usize = 16 * 1024 * 1024;
/// Default `maxWriteBatchSize` before the server reports one
pub const DEFAULT_MAX_WRITE_BATCH_SIZE: usize = 100_000;

/// Byte stream under a connection
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Per-connection limits and encoding choices, filled in by the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub format: MessageFormat,
    pub compressor: Option<Compressor>,
    pub max_bson_object_size: usize,
    pub max_message_size: usize,
    pub max_write_batch_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            format: MessageFormat::OpQuery,
            compressor: None,
            max_bson_object_size: DEFAULT_MAX_BSON_OBJECT_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_write_batch_size: DEFAULT_MAX_WRITE_BATCH_SIZE,
        }
    }
}

/// Connection handle
pub struct Connection {
    id: u64,
    address: String,
    framed: Option<Framed<Stream, WireCodec>>,
    socket_timeout: Duration,
    settings: ConnectionSettings,
    tls: bool,
    in_flight: u32,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .field("tls", &self.tls)
            .finish()
    }
}

impl Connection {
    /// Open a TCP connection, upgrading to TLS when `tls` is given.
    /// The connect timeout covers both the TCP connect and the TLS handshake.
    #[instrument(skip(tls_config), fields(tls = tls_config.is_some()))]
    pub async fn connect(
        host: &str,
        port: u16,
        tls_config: Option<&TlsClientConfig>,
        connect_timeout: Duration,
        socket_timeout: Duration,
    ) -> Result<Self> {
        let address = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let address = address.as_str();
        let started = std::time::Instant::now();
        let opened = with_timeout_message(
            async {
                let tcp = TcpStream::connect(address).await.map_err(|e| {
                    DriverError::transport(
                        TransportErrorKind::ConnectFailed,
                        format!("connect to {address}: {e}"),
                    )
                })?;
                tcp.set_nodelay(true)?;
                match tls_config {
                    Some(config) => Ok(Stream::Tls(Box::new(tls::wrap(tcp, config).await?))),
                    None => Ok(Stream::Plain(tcp)),
                }
            },
            connect_timeout,
            constants::ERR_CONNECT_TIMEOUT,
        )
        .await;

        match opened {
            Ok(stream) => {
                let conn = Self::from_stream(stream, address, socket_timeout);
                debug!(
                    conn_id = conn.id,
                    address,
                    tls = conn.tls,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Connection established"
                );
                Ok(conn)
            }
            Err(e) => {
                global_metrics().connection_error();
                warn!(address, error = %e, "Connection failed");
                Err(e)
            }
        }
    }

    /// Wrap an already-open stream
    pub fn from_stream(stream: Stream, address: &str, socket_timeout: Duration) -> Self {
        global_metrics().connection_established();
        let tls = matches!(stream, Stream::Tls(_));
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            address: address.to_string(),
            framed: Some(Framed::new(stream, WireCodec::default())),
            socket_timeout,
            settings: ConnectionSettings::default(),
            tls,
            in_flight: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn is_closed(&self) -> bool {
        self.framed.is_none()
    }

    /// Requests written whose reply has not been read yet (0 or 1)
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Apply handshake results; the frame limit follows `max_message_size`
    pub fn set_settings(&mut self, settings: ConnectionSettings) {
        if let Some(framed) = self.framed.as_mut() {
            framed.codec_mut().set_max_message_size(settings.max_message_size);
        }
        self.settings = settings;
    }

    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    fn framed(&mut self) -> Result<&mut Framed<Stream, WireCodec>> {
        self.framed.as_mut().ok_or_else(|| {
            DriverError::transport(TransportErrorKind::HandleClosed, constants::ERR_HANDLE_CLOSED)
        })
    }

    /// Drop the socket; later calls fail with `HandleClosed`
    pub fn invalidate(&mut self, reason: &str) {
        self.in_flight = 0;
        if self.framed.take().is_some() {
            debug!(conn_id = self.id, reason, "Connection invalidated");
        }
    }

    fn fail<T>(&mut self, err: DriverError) -> Result<T> {
        if err.transport_kind().is_some() || err.encoding_kind().is_some() {
            self.invalidate(&err.to_string());
        }
        Err(err)
    }

    /// Write one message and return the request id it was sent with
    pub async fn send_request(&mut self, op_code: OpCode, body: Vec<u8>) -> Result<i32> {
        let request_id = next_request_id();
        let packet = Packet::request(request_id, op_code, body)?;
        let bytes = packet.len() as u64;
        let timeout = self.socket_timeout;
        let Some(framed) = self.framed.as_mut() else {
            return Err(DriverError::transport(
                TransportErrorKind::HandleClosed,
                constants::ERR_HANDLE_CLOSED,
            ));
        };
        // Counted before the write so a cancelled send still reads as in flight
        self.in_flight += 1;
        match with_timeout_message(framed.send(packet), timeout, "write").await {
            Ok(()) => {
                global_metrics().message_sent(bytes, op_code == OpCode::Compressed);
                Ok(request_id)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Read the next complete message
    pub async fn receive_reply(&mut self) -> Result<Packet> {
        let timeout = self.socket_timeout;
        let framed = self.framed()?;
        let read = with_timeout_message(
            async {
                match framed.next().await {
                    Some(packet) => packet,
                    None => Err(DriverError::transport(
                        TransportErrorKind::IoError,
                        constants::ERR_CONNECTION_CLOSED,
                    )),
                }
            },
            timeout,
            "read",
        )
        .await;
        match read {
            Ok(packet) => {
                global_metrics().message_received(packet.len() as u64);
                self.in_flight = self.in_flight.saturating_sub(1);
                Ok(packet)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Send a request and read its reply. A reply whose `responseTo` does not
    /// match is `UnexpectedResponse` and invalidates the connection.
    pub async fn round_trip(&mut self, op_code: OpCode, body: Vec<u8>) -> Result<Packet> {
        let request_id = self.send_request(op_code, body).await?;
        let reply = self.receive_reply().await?;
        if reply.header.response_to != request_id {
            global_metrics().protocol_error();
            return self.fail(DriverError::transport(
                TransportErrorKind::UnexpectedResponse,
                format!(
                    "reply answers request {} but {request_id} was sent",
                    reply.header.response_to
                ),
            ));
        }
        Ok(reply)
    }

    /// Shut the socket down; idempotent
    pub async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            let _ = AsyncWriteExt::shutdown(framed.get_mut()).await;
            debug!(conn_id = self.id, "Connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        global_metrics().connection_closed();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, Framed<TcpStream, WireCodec>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let conn = Connection::connect("127.0.0.1", port, None, Duration::from_secs(5), Duration::from_secs(5))
            .await
            .unwrap();
        let server = Framed::new(accept.await.unwrap(), WireCodec::default());
        (conn, server)
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = next_request_id();
        let b = next_request_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_round_trip_matches_response_to() {
        let (mut conn, mut server) = pair().await;
        let echo = tokio::spawn(async move {
            let req = server.next().await.unwrap().unwrap();
            let reply = Packet::reply(99, req.header.request_id, OpCode::Msg, req.body).unwrap();
            server.send(reply).await.unwrap();
        });
        let reply = conn.round_trip(OpCode::Msg, vec![1, 2, 3]).await.unwrap();
        assert_eq!(reply.body, vec![1, 2, 3]);
        assert_eq!(conn.in_flight(), 0);
        assert!(!conn.is_closed());
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_response_invalidates() {
        let (mut conn, mut server) = pair().await;
        tokio::spawn(async move {
            let req = server.next().await.unwrap().unwrap();
            let reply =
                Packet::reply(1, req.header.request_id.wrapping_add(1000), OpCode::Msg, vec![])
                    .unwrap();
            server.send(reply).await.unwrap();
        });
        let err = conn.round_trip(OpCode::Msg, vec![0]).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::UnexpectedResponse));
        assert!(conn.is_closed());

        let err = conn.send_request(OpCode::Msg, vec![0]).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::HandleClosed));
    }

    #[tokio::test]
    async fn test_peer_close_invalidates() {
        let (mut conn, server) = pair().await;
        drop(server);
        let err = conn.round_trip(OpCode::Msg, vec![0]).await.unwrap_err();
        assert!(err.transport_kind().is_some());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_read_timeout_invalidates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });
        let mut conn =
            Connection::connect("127.0.0.1", port, None, Duration::from_secs(5), Duration::from_millis(50))
                .await
                .unwrap();
        let err = conn.round_trip(OpCode::Msg, vec![0]).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = Connection::connect("127.0.0.1", port, None, Duration::from_secs(2), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err.transport_kind(),
            Some(TransportErrorKind::ConnectFailed) | Some(TransportErrorKind::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut conn, _server) = pair().await;
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
    }
}
