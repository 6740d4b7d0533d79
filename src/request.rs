//! Outgoing HTTP requests.

use std::time::Duration;

use url::Url;

use crate::{
    Error, Result,
    header::{Header, Headers},
    message::Message,
};

/// Parse and vet a URL for use as a request target.
///
/// The URL must parse and must name a host to connect to; anything else is
/// a URI-kind error. Whether the *scheme* is one the client can route is
/// checked later, against the endpoint table, when the request is
/// dispatched.
fn request_url(input: &str) -> Result<Url> {
    let url = Url::parse(input).map_err(Error::uri)?;
    if url.host_str().is_none() {
        return Err(Error::uri_bad_scheme(url));
    }
    Ok(url)
}

/// An HTTP/1.1 request.
///
/// Built from a URL, a request carries the method, the origin-form request
/// target (path plus optional query), the ordered header list, and the body.
/// [`bytes`](Request::bytes) produces the exact wire form.
#[derive(Debug, Clone, Default)]
pub struct Request {
    method: String,
    request_path: String,
    url: Option<Url>,
    version: String,
    headers: Headers,
    body: Vec<u8>,
    stall_timeout: Option<Duration>,
}

impl Request {
    /// Create a request for the given URL.
    ///
    /// Accepts anything string-like, including an already-parsed
    /// [`Url`](crate::Url). The request target becomes the URL path
    /// (defaulting to `/`) plus the query string when present; a `Host`
    /// header is added and the version is set to `HTTP/1.1`. The method is
    /// left for the client verb methods to fill in, or for
    /// [`set_method`](Request::set_method).
    pub fn new(url: impl AsRef<str>) -> Result<Request> {
        let url = request_url(url.as_ref())?;

        let mut request_path = url.path().to_owned();
        if request_path.is_empty() {
            request_path.push('/');
        }
        if let Some(query) = url.query() {
            request_path.push('?');
            request_path.push_str(query);
        }

        let mut headers = Headers::new();
        headers.append(Header::new("Host", url.host_str().unwrap_or_default()));

        Ok(Request {
            method: String::new(),
            request_path,
            url: Some(url),
            version: "HTTP/1.1".to_owned(),
            headers,
            body: Vec::new(),
            stall_timeout: None,
        })
    }

    /// Parse a request from its wire form.
    pub fn parse(data: &[u8]) -> Result<Request> {
        let mut request = Request::default();
        request.parse_data(data)?;
        Ok(request)
    }

    /// Append a header, canonicalizing the name.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Request {
        self.headers.append(Header::new(name, value));
        self
    }

    /// Add an `Authorization` header from a scheme and credentials.
    pub fn authorization(self, scheme: &str, credentials: &str) -> Request {
        self.header("Authorization", format!("{scheme} {credentials}"))
    }

    /// Set the request body, keeping `Content-Length` in sync.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Request {
        self.set_body(body.into());
        self
    }

    /// Override the client's stall timeout for this request only.
    pub fn stall_timeout(mut self, timeout: Duration) -> Request {
        self.stall_timeout = Some(timeout);
        self
    }

    /// The request method, e.g. `GET`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Set the request method.
    pub fn set_method(&mut self, method: &str) {
        self.method = method.to_owned();
    }

    /// The origin-form request target from the first line.
    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    /// The URL this request was built from, when there is one.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub(crate) fn stall_override(&self) -> Option<Duration> {
        self.stall_timeout
    }

    /// Serialize the request into its HTTP/1.1 wire form:
    /// `METHOD SP PATH SP VERSION CRLF (Name: value CRLF)* CRLF body`.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.request_path.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(b"\r\n");
        for header in &self.headers {
            out.extend_from_slice(header.name().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

impl Message for Request {
    fn version(&self) -> &str {
        &self.version
    }

    fn set_version(&mut self, version: String) {
        self.version = version;
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    /// Three whitespace-delimited fields: `METHOD SP PATH SP VERSION`.
    /// No trimming is applied to any of them.
    fn parse_initial_line(&mut self, line: &str) -> Result<()> {
        let space = line
            .find(' ')
            .ok_or_else(|| Error::parse("no request method found"))?;
        self.method = line[..space].to_owned();

        let rest = &line[space + 1..];
        let space = rest
            .find(' ')
            .ok_or_else(|| Error::parse("no request path found"))?;
        self.request_path = rest[..space].to_owned();
        self.version = rest[space + 1..].to_owned();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_url_sets_path_host_and_version() {
        let req = Request::new("http://example.com/some/path?q=1").unwrap();
        assert_eq!(req.request_path(), "/some/path?q=1");
        assert_eq!(req.version(), "HTTP/1.1");
        assert_eq!(req.header_value("Host"), Some("example.com"));
    }

    #[test]
    fn bare_host_defaults_path_to_slash() {
        let req = Request::new("http://example.com").unwrap();
        assert_eq!(req.request_path(), "/");
    }

    #[test]
    fn accepts_parsed_url_values() {
        let url = Url::parse("http://example.com/a?b=c").unwrap();
        let req = Request::new(&url).unwrap();
        assert_eq!(req.request_path(), "/a?b=c");
    }

    #[test]
    fn rejects_url_without_host() {
        let err = Request::new("file:///etc/hosts").unwrap_err();
        assert!(err.is_uri());
        assert!(err.to_string().contains("URI scheme is not allowed"));
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(Request::new("not a url").unwrap_err().is_uri());
    }

    #[test]
    fn bytes_wire_form() {
        let mut req = Request::new("http://example.com/index.html")
            .unwrap()
            .header("x-more-info", "yes");
        req.set_method("GET");

        let text = String::from_utf8(req.bytes()).unwrap();
        assert!(text.starts_with("GET /index.html HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("X-More-Info: yes\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn round_trip_preserves_structure() {
        let mut req = Request::new("http://example.com/a/b?c=d")
            .unwrap()
            .header("x-first", "1")
            .header("X-SECOND", "2")
            .with_body(*b"payload");
        req.set_method("POST");

        let parsed = Request::parse(&req.bytes()).unwrap();
        assert_eq!(parsed.method(), "POST");
        assert_eq!(parsed.request_path(), "/a/b?c=d");
        assert_eq!(parsed.version(), "HTTP/1.1");
        assert_eq!(parsed.body(), b"payload");

        let original: Vec<_> = req.headers().iter().collect();
        let echoed: Vec<_> = parsed.headers().iter().collect();
        assert_eq!(original, echoed);
    }

    #[test]
    fn with_body_updates_content_length() {
        let req = Request::new("http://example.com/")
            .unwrap()
            .with_body(*b"hello");
        assert_eq!(req.header_value("Content-Length"), Some("5"));
    }

    #[test]
    fn authorization_header() {
        let req = Request::new("http://example.com/")
            .unwrap()
            .authorization("Bearer", "tok");
        assert_eq!(req.header_value("Authorization"), Some("Bearer tok"));
    }

    #[test]
    fn initial_line_requires_three_fields() {
        assert!(Request::parse(b"GET\r\n\r\n").unwrap_err().is_parse());
        assert!(Request::parse(b"GET /\r\n\r\n").unwrap_err().is_parse());
    }
}
