//! Fake RESP server shared by the integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use respline_client::{Connector, StreamTransport};
use tokio::io::{
    duplex, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    DuplexStream,
};
use tokio::net::TcpListener;

/// What the fake server does with one command.
pub enum Response {
    /// Write these bytes back.
    Reply(Vec<u8>),
    /// Swallow the command.
    Silent,
    /// Drop the connection.
    Hangup,
}

/// Listens on an ephemeral port; returns the address and a counter of
/// accepted connections. Replies are written `chunk` bytes at a time.
pub async fn spawn_server<H>(chunk: usize, handler: H) -> (String, Arc<AtomicUsize>)
where
    H: Fn(usize, Vec<Vec<u8>>) -> Response + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let accepted = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = stream.set_nodelay(true);
            tokio::spawn(serve(stream, chunk, Arc::clone(&handler)));
        }
    });

    (addr, accepted)
}

/// Serves one connection until the client hangs up or the handler says so.
pub async fn serve<S, H>(stream: S, chunk: usize, handler: Arc<H>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: Fn(usize, Vec<Vec<u8>>) -> Response + Send + Sync + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut idx = 0;
    while let Ok(Some(args)) = read_command(&mut reader).await {
        match (*handler)(idx, args) {
            Response::Reply(bytes) => {
                for piece in bytes.chunks(chunk.max(1)) {
                    if writer.write_all(piece).await.is_err() {
                        return;
                    }
                    let _ = writer.flush().await;
                    tokio::task::yield_now().await;
                }
            }
            Response::Silent => {}
            Response::Hangup => return,
        }
        idx += 1;
    }
}

async fn read_command<R>(reader: &mut BufReader<R>) -> io::Result<Option<Vec<Vec<u8>>>>
where
    R: AsyncRead + Unpin,
{
    let line = match read_line(reader).await? {
        Some(line) => line,
        None => return Ok(None),
    };
    if line.first() != Some(&b'*') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data).await?;
        if !data.ends_with(b"\r\n") {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing crlf"));
        }
        data.truncate(len);
        args.push(data);
    }
    Ok(Some(args))
}

async fn read_line<R>(reader: &mut BufReader<R>) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    if !buf.ends_with(b"\r\n") {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(buf))
}

fn parse_usize(data: &[u8]) -> io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "digit"))
}

/// Connector handing out in-memory pipes whose buffer holds `chunk` bytes,
/// so the client sees replies at most `chunk` bytes at a time.
pub struct DuplexConnector<H> {
    chunk: usize,
    handler: Arc<H>,
    pub connects: Arc<AtomicUsize>,
}

impl<H> DuplexConnector<H>
where
    H: Fn(usize, Vec<Vec<u8>>) -> Response + Send + Sync + 'static,
{
    pub fn new(chunk: usize, handler: H) -> Self {
        DuplexConnector {
            chunk,
            handler: Arc::new(handler),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl<H> Connector for DuplexConnector<H>
where
    H: Fn(usize, Vec<Vec<u8>>) -> Response + Send + Sync + 'static,
{
    type Transport = StreamTransport<DuplexStream>;

    async fn connect(&self, _addr: &str) -> io::Result<Self::Transport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = duplex(self.chunk.max(1));
        tokio::spawn(serve(server, self.chunk, Arc::clone(&self.handler)));
        Ok(StreamTransport::new(client))
    }
}

pub fn simple(message: &str) -> Vec<u8> {
    format!("+{}\r\n", message).into_bytes()
}

pub fn error(message: &str) -> Vec<u8> {
    format!("-{}\r\n", message).into_bytes()
}

pub fn integer(value: i64) -> Vec<u8> {
    format!(":{}\r\n", value).into_bytes()
}

pub fn bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = format!("${}\r\n", data.len()).into_bytes();
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn array(items: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        buf.extend_from_slice(item);
    }
    buf
}
