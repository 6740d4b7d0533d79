//! The per-connection HTTP/1.1 protocol machine.
//!
//! A [`Conn`] drives one request/response exchange at a time over its
//! transport: serialize the request, read the status line, the header block,
//! and the body in whichever framing the response declares, then report
//! whether the connection may be reused. Closure is idempotent; a connection
//! that has been closed is never handed out again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, trace};

use crate::{
    Endpoint, Error, Result,
    header::Headers,
    message::{CRLF, Message},
    response::{Response, ResponseState},
    transport::{Connector, Reader, Writer, split},
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A single live transport with protocol state attached.
#[derive(Debug)]
pub(crate) struct Conn {
    id: u64,
    endpoint: Endpoint,
    reader: Reader,
    writer: Writer,
    closed: AtomicBool,
    valid: AtomicBool,
}

impl Conn {
    /// Resolve, connect, and (for TLS endpoints) handshake.
    pub(crate) async fn open(
        connector: &Connector,
        endpoint: Endpoint,
        stall: Duration,
    ) -> Result<Conn> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!("conn {id}: starting new connection to {endpoint}");
        let stream = connector.connect(&endpoint, stall).await?;
        let (reader, writer) = split(stream);
        Ok(Conn {
            id,
            endpoint,
            reader,
            writer,
            closed: AtomicBool::new(false),
            valid: AtomicBool::new(true),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Whether this connection may serve another exchange. Probes the
    /// socket, so a connection the server closed while idle is rejected.
    pub(crate) fn is_valid(&mut self) -> bool {
        self.valid.load(Ordering::Relaxed)
            && !self.closed.load(Ordering::Relaxed)
            && self.reader.is_live()
    }

    /// Returns true on the second and later calls; the first caller owns
    /// the socket teardown.
    fn already_closing(&self) -> bool {
        self.closed.swap(true, Ordering::SeqCst)
    }

    /// Idempotent close: the winner of the closed-flag race clears the
    /// valid flag and shuts the socket down, errors ignored.
    pub(crate) async fn close(&mut self) {
        if self.already_closing() {
            return;
        }
        self.valid.store(false, Ordering::Relaxed);
        trace!("conn {}: closing connection to {}", self.id, self.endpoint);
        self.writer.shutdown().await;
    }

    /// Run one request/response exchange.
    ///
    /// Returns the status code and whether the connection may be reused.
    /// The response read starts concurrently with the request write, so a
    /// server that answers (for example with an early 4xx) before the
    /// request is fully sent is still handled; in that case a write-side
    /// error is ignored.
    pub(crate) async fn exchange(&mut self, response: &Response) -> Result<(u16, bool)> {
        let stall = response.stall_timeout();
        let (bytes, head_request) = {
            let state = response.lock();
            let request = state.request();
            (request.bytes(), request.method().eq_ignore_ascii_case("HEAD"))
        };

        trace!("conn {}: writing {} request bytes", self.id, bytes.len());
        let (wrote, read) = tokio::join!(
            self.writer.write_all(&bytes, stall),
            read_response(&mut self.reader, response, head_request, stall),
        );
        match read {
            Ok(outcome) => Ok(outcome),
            Err(read_err) => Err(wrote.err().unwrap_or(read_err)),
        }
    }
}

fn line_str(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line).map_err(|_| Error::parse("line is not valid UTF-8"))
}

enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
}

fn decide_framing(state: &ResponseState, head_request: bool) -> Result<BodyFraming> {
    // RFC 7230 3.3.3: these responses never carry a body, whatever the
    // headers declare.
    if head_request || matches!(state.status_code(), 100..=199 | 204 | 304) {
        return Ok(BodyFraming::Empty);
    }
    if let Some(length) = state.header_value("Content-Length") {
        let n = length
            .trim()
            .parse()
            .map_err(|_| Error::parse("content-length is not numeric"))?;
        return Ok(BodyFraming::Length(n));
    }
    if let Some(te) = state.header_value("Transfer-Encoding") {
        if te.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")) {
            return Ok(BodyFraming::Chunked);
        }
    }
    Err(Error::framing("no content-length or chunked transfer-encoding"))
}

fn connection_close(headers: &Headers) -> bool {
    headers
        .get("Connection")
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
        .unwrap_or(false)
}

async fn read_response(
    reader: &mut Reader,
    response: &Response,
    head_request: bool,
    stall: Duration,
) -> Result<(u16, bool)> {
    let line = reader.read_delimited(CRLF, stall).await?;
    let status = {
        let mut state = response.lock();
        state.parse_initial_line(line_str(&line)?)?;
        state.status_code()
    };

    loop {
        let line = reader.read_delimited(CRLF, stall).await?;
        if line.is_empty() {
            break;
        }
        response.lock().parse_header_line(line_str(&line)?)?;
    }

    let framing = decide_framing(&response.lock(), head_request)?;
    match framing {
        BodyFraming::Empty => {}
        BodyFraming::Length(expected) => {
            let body = reader.read_exact(expected, stall).await?;
            response.lock().set_body(body.to_vec());
        }
        BodyFraming::Chunked => read_chunked_body(reader, response, stall).await?,
    }

    let reuse = !connection_close(response.lock().headers());
    Ok((status, reuse))
}

/// Chunked framing: `hex-size CRLF data CRLF ... 0 CRLF trailer* CRLF`.
/// Chunk payloads are concatenated into the body; trailers are read and
/// discarded.
async fn read_chunked_body(
    reader: &mut Reader,
    response: &Response,
    stall: Duration,
) -> Result<()> {
    loop {
        let line = reader.read_delimited(CRLF, stall).await?;
        let text = line_str(&line)?;
        let size_field = text.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| Error::parse("chunk size is not hex"))?;

        if size == 0 {
            loop {
                let trailer = reader.read_delimited(CRLF, stall).await?;
                if trailer.is_empty() {
                    return Ok(());
                }
            }
        }

        let chunk = reader.read_exact(size + CRLF.len(), stall).await?;
        if &chunk[size..] != CRLF {
            return Err(Error::parse("missing CRLF after chunk data"));
        }
        response.lock().append_body(&chunk[..size]);
    }
}
