//! Endpoint identity used to key connection pools.

use std::fmt;

use url::Url;

use crate::{Error, Result};

/// A URL scheme this crate knows default ports for.
///
/// Only `http` and `https` are dispatchable over the client; the AMQP
/// entries exist so the port table matches the sibling protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP over TCP.
    Http,
    /// HTTP over TLS.
    Https,
    /// Plain AMQP (port table only).
    Amqp,
    /// AMQP over TLS (port table only).
    Amqps,
}

impl Scheme {
    /// Parse a scheme name, case-insensitively.
    pub fn parse(s: &str) -> Option<Scheme> {
        if s.eq_ignore_ascii_case("http") {
            Some(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Some(Scheme::Https)
        } else if s.eq_ignore_ascii_case("amqp") {
            Some(Scheme::Amqp)
        } else if s.eq_ignore_ascii_case("amqps") {
            Some(Scheme::Amqps)
        } else {
            None
        }
    }

    /// The port assumed when the URL does not carry one.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
            Scheme::Amqp => 5672,
            Scheme::Amqps => 5671,
        }
    }

    /// Whether connections for this scheme are wrapped in TLS.
    pub fn is_tls(self) -> bool {
        matches!(self, Scheme::Https | Scheme::Amqps)
    }

    /// The lowercase scheme name.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Amqp => "amqp",
            Scheme::Amqps => "amqps",
        }
    }
}

/// Canonical identity of a server: `(scheme, host, port)`.
///
/// Two requests whose URLs differ only in path or query share an endpoint,
/// and therefore a connection pool. The canonical string form is
/// `scheme://host:port`; equality and hashing follow it. Immutable after
/// construction.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Build the endpoint identity for a URL.
    ///
    /// Fails with a URI-kind error when the scheme is not `http` or `https`
    /// or the URL has no host.
    pub fn from_url(url: &Url) -> Result<Endpoint> {
        let scheme = match Scheme::parse(url.scheme()) {
            Some(s @ (Scheme::Http | Scheme::Https)) => s,
            _ => return Err(Error::uri_bad_scheme(url.clone())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::uri("URL has no host").with_url(url.clone()))?
            .to_ascii_lowercase();
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        Ok(Endpoint { scheme, host, port })
    }

    /// The endpoint's scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port connections are made to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether connections to this endpoint use TLS.
    pub fn tls(&self) -> bool {
        self.scheme.is_tls()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Endpoint").field(&self.to_string()).finish()
    }
}
