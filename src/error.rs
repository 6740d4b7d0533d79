use std::{error::Error as StdError, fmt, io};

use url::Url;

/// A `Result` alias where the `Err` case is `htpool::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error type that can be used for dynamic error handling.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The errors that may occur while issuing a request.
///
/// Note: Errors may include the full URL used to make the request. If the URL
/// contains sensitive information (e.g. an API key as a query parameter), be
/// sure to remove it ([`without_url`](Error::without_url)).
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    url: Option<Url>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                url: None,
            }),
        }
    }

    pub(crate) fn uri<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Uri, Some(e))
    }

    pub(crate) fn uri_bad_scheme(url: Url) -> Error {
        Error::new(Kind::Uri, Some(BadScheme)).with_url(url)
    }

    pub(crate) fn resolve<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Resolve, Some(e))
    }

    pub(crate) fn connect<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Connect, Some(e))
    }

    pub(crate) fn handshake<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Handshake, Some(e))
    }

    pub(crate) fn io(e: io::Error) -> Error {
        Error::new(Kind::Io, Some(e))
    }

    pub(crate) fn timeout() -> Error {
        Error::new(Kind::Timeout, Some(TimedOut))
    }

    pub(crate) fn parse<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Parse, Some(e))
    }

    pub(crate) fn framing<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Framing, Some(e))
    }

    pub(crate) fn canceled() -> Error {
        Error::new(Kind::Canceled, None::<Error>)
    }

    /// Clone the kind and URL of this error, flattening the source chain
    /// into its display form. Settled promises hand the same failure to
    /// multiple continuations, so the original boxed source cannot move.
    pub(crate) fn duplicate(&self) -> Error {
        Error {
            inner: Box::new(Inner {
                kind: self.inner.kind,
                source: self.inner.source.as_ref().map(|e| e.to_string().into()),
                url: self.inner.url.clone(),
            }),
        }
    }
}

impl Error {
    /// Returns a possible URL related to this error.
    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// Add a URL related to this error (overwriting any existing).
    pub fn with_url(mut self, url: Url) -> Self {
        self.inner.url = Some(url);
        self
    }

    /// Strip the related URL from this error (if, for example, it contains
    /// sensitive information).
    pub fn without_url(mut self) -> Self {
        self.inner.url = None;
        self
    }

    /// Returns true if the error came from parsing or validating a URI.
    pub fn is_uri(&self) -> bool {
        matches!(self.inner.kind, Kind::Uri)
    }

    /// Returns true if the error came from DNS or address resolution.
    pub fn is_resolve(&self) -> bool {
        matches!(self.inner.kind, Kind::Resolve)
    }

    /// Returns true if the error came from establishing the TCP connection.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// Returns true if the error came from the TLS handshake.
    pub fn is_handshake(&self) -> bool {
        matches!(self.inner.kind, Kind::Handshake)
    }

    /// Returns true if the error is a read or write error mid-exchange.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Returns true if the stall timer expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout)
    }

    /// Returns true if the error came from parsing the response.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse)
    }

    /// Returns true if the response declared no usable body framing.
    pub fn is_framing(&self) -> bool {
        matches!(self.inner.kind, Kind::Framing)
    }

    /// Returns true if the caller cancelled the response.
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("htpool::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref url) = self.inner.url {
            builder.field("url", url);
        }

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::Uri => f.write_str("malformed URI")?,
            Kind::Resolve => f.write_str("error resolving host")?,
            Kind::Connect => f.write_str("error connecting")?,
            Kind::Handshake => f.write_str("TLS handshake error")?,
            Kind::Io => f.write_str("I/O error during exchange")?,
            Kind::Timeout => f.write_str("timeout expired")?,
            Kind::Parse => f.write_str("error parsing response")?,
            Kind::Framing => f.write_str("invalid body framing")?,
            Kind::Canceled => f.write_str("request canceled")?,
        }

        if let Some(url) = &self.inner.url {
            write!(f, " for url ({url})")?;
        }

        if let Some(e) = &self.inner.source {
            write!(f, ": {e}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Kind {
    Uri,
    Resolve,
    Connect,
    Handshake,
    Io,
    Timeout,
    Parse,
    Framing,
    Canceled,
}

#[derive(Debug)]
pub(crate) struct TimedOut;

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("no read or write activity within the stall window")
    }
}

impl StdError for TimedOut {}

#[derive(Debug)]
pub(crate) struct BadScheme;

impl fmt::Display for BadScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("URI scheme is not allowed")
    }
}

impl StdError for BadScheme {}
