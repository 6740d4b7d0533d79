//! Byte transports: plain TCP and TLS-over-TCP.
//!
//! A [`Connector`] resolves an [`Endpoint`] and produces a [`Stream`], which
//! is split into a buffered [`Reader`] and a [`Writer`] so the response read
//! loop can run concurrently with the request write. Every socket operation
//! is bounded by the caller's stall window; expiry surfaces as a
//! timeout-kind error.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use log::debug;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf},
    net::{TcpStream, lookup_host},
    time::timeout,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{self, pki_types::ServerName},
};

use crate::{Endpoint, Error, Result};

/// A connected byte channel, plain or TLS-wrapped.
#[derive(Debug)]
pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, data),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, data),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens transports for endpoints. Cheap to clone; the TLS client
/// configuration is shared.
#[derive(Clone)]
pub(crate) struct Connector {
    tls: TlsConnector,
}

impl Connector {
    pub(crate) fn new() -> Connector {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Connector {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }

    /// Resolve the endpoint, open a TCP connection to the first usable
    /// address, and run the TLS handshake when the scheme asks for it.
    pub(crate) async fn connect(&self, endpoint: &Endpoint, stall: Duration) -> Result<Stream> {
        let addrs = timeout(stall, lookup_host((endpoint.host(), endpoint.port())))
            .await
            .map_err(|_| Error::timeout())?
            .map_err(Error::resolve)?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(Error::resolve("host resolved to no addresses"));
        }

        let mut last_err = None;
        let mut tcp = None;
        for addr in addrs {
            match timeout(stall, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    tcp = Some(stream);
                    break;
                }
                Ok(Err(e)) => {
                    debug!("connect to {addr} failed: {e}");
                    last_err = Some(Error::connect(e));
                }
                Err(_) => last_err = Some(Error::timeout()),
            }
        }
        let Some(tcp) = tcp else {
            return Err(last_err.unwrap_or_else(|| Error::connect("no usable address")));
        };
        let _ = tcp.set_nodelay(true);

        if endpoint.tls() {
            let name = ServerName::try_from(endpoint.host().to_owned())
                .map_err(Error::handshake)?;
            let tls = timeout(stall, self.tls.connect(name, tcp))
                .await
                .map_err(|_| Error::timeout())?
                .map_err(Error::handshake)?;
            Ok(Stream::Tls(Box::new(tls)))
        } else {
            Ok(Stream::Plain(tcp))
        }
    }
}

pub(crate) fn split(stream: Stream) -> (Reader, Writer) {
    let (rd, wr) = tokio::io::split(stream);
    (
        Reader {
            half: rd,
            buf: BytesMut::with_capacity(8 * 1024),
        },
        Writer { half: wr },
    )
}

/// The read side of a transport, with its buffer.
#[derive(Debug)]
pub(crate) struct Reader {
    half: ReadHalf<Stream>,
    buf: BytesMut,
}

impl Reader {
    /// Read more bytes into the buffer. Zero bytes means the peer closed.
    async fn fill(&mut self, stall: Duration) -> Result<()> {
        let n = timeout(stall, self.half.read_buf(&mut self.buf))
            .await
            .map_err(|_| Error::timeout())?
            .map_err(Error::io)?;
        if n == 0 {
            return Err(Error::io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }
        Ok(())
    }

    /// Return the bytes before the first occurrence of `delim`, consuming
    /// both from the buffer. Each underlying socket read re-arms the stall
    /// window.
    pub(crate) async fn read_delimited(&mut self, delim: &[u8], stall: Duration) -> Result<Bytes> {
        loop {
            if let Some(pos) = self.buf.windows(delim.len()).position(|w| w == delim) {
                let mut chunk = self.buf.split_to(pos + delim.len());
                chunk.truncate(pos);
                return Ok(chunk.freeze());
            }
            self.fill(stall).await?;
        }
    }

    /// Return exactly `n` bytes, serving from the buffer first and reading
    /// the remainder from the socket.
    pub(crate) async fn read_exact(&mut self, n: usize, stall: Duration) -> Result<Bytes> {
        while self.buf.len() < n {
            self.fill(stall).await?;
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// Non-blocking liveness probe for idle connections.
    ///
    /// A reusable idle connection has nothing to read; readiness means the
    /// server either closed the socket or sent bytes we never asked for, and
    /// the connection must not be handed out again.
    pub(crate) fn is_live(&mut self) -> bool {
        struct NoopWake;
        impl std::task::Wake for NoopWake {
            fn wake(self: Arc<Self>) {}
        }

        let waker = std::task::Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        let mut probe = [0u8; 32];
        let mut buf = ReadBuf::new(&mut probe);
        !matches!(
            Pin::new(&mut self.half).poll_read(&mut cx, &mut buf),
            Poll::Ready(_)
        )
    }
}

/// The write side of a transport.
#[derive(Debug)]
pub(crate) struct Writer {
    half: WriteHalf<Stream>,
}

impl Writer {
    /// Write the whole buffer, re-arming the stall window on every chunk
    /// the socket accepts.
    pub(crate) async fn write_all(&mut self, mut data: &[u8], stall: Duration) -> Result<()> {
        while !data.is_empty() {
            let n = timeout(stall, self.half.write(data))
                .await
                .map_err(|_| Error::timeout())?
                .map_err(Error::io)?;
            if n == 0 {
                return Err(Error::io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no bytes",
                )));
            }
            data = &data[n..];
        }
        timeout(stall, self.half.flush())
            .await
            .map_err(|_| Error::timeout())?
            .map_err(Error::io)
    }

    /// Shut down the write direction; errors are ignored, the socket is
    /// going away either way.
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.half.shutdown().await;
    }
}
