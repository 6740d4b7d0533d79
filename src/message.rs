//! The message base shared by requests and responses: a version, an ordered
//! header list, a body, and the line-oriented wire parse.

use crate::header::{Header, Headers};
use crate::{Error, Result};

pub(crate) const CRLF: &[u8] = b"\r\n";

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == CRLF)
}

fn as_line(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|_| Error::parse("line is not valid UTF-8"))
}

/// Common behavior of HTTP messages.
///
/// Implementors provide field access and the initial-line parse; the header
/// block and body plumbing are shared.
pub trait Message {
    /// The protocol version, typically `HTTP/1.1`.
    fn version(&self) -> &str;

    /// Set the protocol version.
    fn set_version(&mut self, version: String);

    /// The ordered header list.
    fn headers(&self) -> &Headers;

    /// Mutable access to the header list.
    fn headers_mut(&mut self) -> &mut Headers;

    /// The message body.
    fn body(&self) -> &[u8];

    /// Mutable access to the body.
    fn body_mut(&mut self) -> &mut Vec<u8>;

    /// Parse the first line of the message. Requests and responses differ
    /// here; everything after the first line is shared.
    fn parse_initial_line(&mut self, line: &str) -> Result<()>;

    /// Replace the body, keeping the `Content-Length` header in sync.
    fn set_body(&mut self, body: Vec<u8>) {
        let len = body.len();
        *self.body_mut() = body;
        self.headers_mut().set("Content-Length", len.to_string());
    }

    /// Append a header.
    fn add_header(&mut self, header: Header) {
        self.headers_mut().append(header);
    }

    /// The value of the first header matching `name`.
    fn header_value(&self, name: &str) -> Option<&str> {
        self.headers().get(name)
    }

    /// Parse one `Name: value` header line. The value is trimmed of optional
    /// whitespace on both sides; the name is canonicalized.
    fn parse_header_line(&mut self, line: &str) -> Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        let colon = line
            .find(':')
            .ok_or_else(|| Error::parse("missing header colon"))?;
        let name = &line[..colon];
        let value = line[colon + 1..].trim();
        self.add_header(Header::new(name, value));
        Ok(())
    }

    /// Consume everything after the header block.
    fn parse_body(&mut self, rest: &[u8]) {
        self.body_mut().extend_from_slice(rest);
    }

    /// Parse a complete message: initial line, header block, body.
    ///
    /// The initial line and every header line must be CRLF-terminated; an
    /// empty line ends the header block and the remaining bytes become the
    /// body.
    fn parse_data(&mut self, data: &[u8]) -> Result<()> {
        let first_end = find_crlf(data).ok_or_else(|| Error::parse("invalid initial line"))?;
        self.parse_initial_line(as_line(&data[..first_end])?)?;

        let mut pos = first_end + CRLF.len();
        loop {
            let end = pos
                + find_crlf(&data[pos..]).ok_or_else(|| Error::parse("invalid header block"))?;
            if end == pos {
                pos = end + CRLF.len();
                break;
            }
            self.parse_header_line(as_line(&data[pos..end])?)?;
            pos = end + CRLF.len();
        }

        self.parse_body(&data[pos..]);
        Ok(())
    }
}
