#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # htpool
//!
//! An asynchronous HTTP/1.1 client with per-endpoint connection pooling,
//! built on tokio.
//!
//! - Per-endpoint pools with a connection cap: saturated pools park callers
//!   instead of failing them
//! - Plain TCP and TLS transports (rustls)
//! - Single-assignment completion futures with chained continuations
//! - A stall timer re-armed on every read and write
//! - Retryable completion pipeline via [`Client::on_completion`]
//!
//! ## Making a request
//!
//! ```rust,ignore
//! use htpool::{Client, Request};
//!
//! #[tokio::main]
//! async fn main() -> htpool::Result<()> {
//!     let client = Client::new();
//!
//!     let response = client.get(Request::new("http://example.com/")?);
//!     let status = response.completion().await?;
//!
//!     assert_eq!(status, 200);
//!     println!("{}", String::from_utf8_lossy(&response.body()));
//!     Ok(())
//! }
//! ```
//!
//! Verb methods return a [`Response`] handle immediately; the exchange runs
//! on a spawned task and its outcome (the status code, a failure, or a
//! cancellation) surfaces on [`Response::completion`]. The completion is a
//! [`Promise`], so it can be awaited or given callback continuations.
//!
//! ## Pooling
//!
//! Connections are keyed by [`Endpoint`], meaning scheme, host, and port, so two
//! requests that differ only in path or query share a pool. Each pool keeps
//! at most [`ClientBuilder::max_connections`] connections (8 by default);
//! requests beyond the cap wait for a connection to be released rather than
//! opening more.
//!
//! ## Retries
//!
//! Completion hooks registered with [`Client::on_completion`] see the
//! outcome of every attempt and may ask the client to re-issue the request;
//! see the [`retry`] module.

mod client;
mod conn;
mod endpoint;
mod error;
mod header;
mod message;
mod pool;
mod promise;
mod request;
mod response;
pub mod retry;
mod transport;

pub use url::Url;

pub use self::{
    client::{Client, ClientBuilder},
    endpoint::{Endpoint, Scheme},
    error::{BoxError, Error, Result},
    header::{Header, Headers, canonicalize},
    message::Message,
    promise::{Promise, Settled},
    request::Request,
    response::Response,
};
