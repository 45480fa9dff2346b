//! # Transport Seam
//!
//! Purpose: Abstract the byte stream a session talks through down to the
//! three primitives the reply grammar needs, plus the act of connecting.
//!
//! ## Design Principles
//! 1. **Grammar-Shaped Reads**: Callers ask for "up to the delimiter" or
//!    "exactly N bytes", never for whatever happens to be available.
//! 2. **Cancel Safety**: Read futures may be dropped at any await; bytes
//!    already pulled off the stream stay in the transport's buffer.
//! 3. **Strategy Pattern**: Sessions are generic over `Connector`, so tests
//!    swap TCP for in-memory duplex pipes.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ClientConfig;

/// Non-blocking byte stream used by a session.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Writes the whole buffer and flushes it.
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Reads up to and including the next occurrence of `delimiter`.
    ///
    /// Must be cancel safe.
    async fn read_until(&mut self, delimiter: &[u8]) -> io::Result<Bytes>;

    /// Reads exactly `len` bytes.
    ///
    /// Must be cancel safe.
    async fn read_exact(&mut self, len: usize) -> io::Result<Bytes>;

    /// Returns true once the peer hung up or an I/O error occurred.
    fn is_closed(&self) -> bool;

    /// Number of bytes received but not yet handed out by a read.
    fn buffered(&self) -> usize;
}

/// Opens transports to an address.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Transport type produced by this connector.
    type Transport: Transport;

    /// Connects to `addr`. No retries are attempted.
    async fn connect(&self, addr: &str) -> io::Result<Self::Transport>;
}

/// Buffered transport over any async stream.
pub struct StreamTransport<S> {
    stream: S,
    buffer: BytesMut,
    closed: bool,
}

/// Transport over a TCP socket.
pub type TcpTransport = StreamTransport<TcpStream>;

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps a stream with a default-sized read buffer.
    pub fn new(stream: S) -> Self {
        Self::with_capacity(stream, 8 * 1024)
    }

    /// Wraps a stream with a read buffer of `capacity` bytes.
    pub fn with_capacity(stream: S, capacity: usize) -> Self {
        StreamTransport {
            stream,
            buffer: BytesMut::with_capacity(capacity),
            closed: false,
        }
    }

    async fn fill(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        match self.stream.read_buf(&mut self.buffer).await {
            Ok(0) => {
                self.closed = true;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ))
            }
            Ok(_) => Ok(()),
            Err(err) => {
                self.closed = true;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        let result = match self.stream.write_all(data).await {
            Ok(()) => self.stream.flush().await,
            Err(err) => Err(err),
        };
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    async fn read_until(&mut self, delimiter: &[u8]) -> io::Result<Bytes> {
        if delimiter.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty delimiter"));
        }
        // Resume the scan where the previous pass stopped; a delimiter may
        // straddle two reads, so back off by its length minus one.
        let mut scanned = 0;
        loop {
            if let Some(offset) = self.buffer[scanned..]
                .windows(delimiter.len())
                .position(|window| window == delimiter)
            {
                let end = scanned + offset + delimiter.len();
                return Ok(self.buffer.split_to(end).freeze());
            }
            scanned = self.buffer.len().saturating_sub(delimiter.len() - 1);
            self.fill().await?;
        }
    }

    async fn read_exact(&mut self, len: usize) -> io::Result<Bytes> {
        while self.buffer.len() < len {
            self.buffer.reserve(len - self.buffer.len());
            self.fill().await?;
        }
        Ok(self.buffer.split_to(len).freeze())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Connector opening plain TCP sockets.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    nodelay: bool,
    connect_timeout: Option<Duration>,
    read_buffer_capacity: usize,
}

impl TcpConnector {
    /// Builds a connector from the transport fields of `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        TcpConnector {
            nodelay: config.nodelay,
            connect_timeout: config.connect_timeout(),
            read_buffer_capacity: config.read_buffer_capacity,
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        TcpConnector::from_config(&ClientConfig::default())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self, addr: &str) -> io::Result<TcpTransport> {
        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
            None => TcpStream::connect(addr).await?,
        };
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(self.nodelay)?;
        debug!(addr, "tcp transport connected");
        Ok(StreamTransport::with_capacity(stream, self.read_buffer_capacity))
    }
}
