//! Responses and their completion handles.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    Error, Result,
    header::{Header, Headers},
    message::Message,
    promise::Promise,
    request::Request,
};

/// An in-flight or completed HTTP response.
///
/// A `Response` is returned synchronously by the client verb methods; the
/// outcome of the exchange surfaces on [`completion`](Response::completion),
/// which resolves with the status code, fails with the error that ended the
/// exchange, or reports cancellation. Clones are cheap and share state.
#[derive(Debug, Clone)]
pub struct Response {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<ResponseState>,
    completion: Promise<u16>,
    stall_timeout: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct ResponseState {
    version: String,
    status_code: u16,
    status_message: String,
    headers: Headers,
    body: Vec<u8>,
    request: Request,
    retries: u32,
}

impl Response {
    pub(crate) fn new(request: Request, stall_timeout: Duration) -> Response {
        Response {
            inner: Arc::new(Inner {
                state: Mutex::new(ResponseState {
                    request,
                    ..ResponseState::default()
                }),
                completion: Promise::new(),
                stall_timeout,
            }),
        }
    }

    /// The completion future. Resolves with the status code once the
    /// exchange (including any retries) finishes.
    pub fn completion(&self) -> Promise<u16> {
        self.inner.completion.clone()
    }

    /// The response status code, `0` until the status line has been parsed.
    pub fn status_code(&self) -> u16 {
        self.lock().status_code
    }

    /// The reason phrase from the status line.
    pub fn status_message(&self) -> String {
        self.lock().status_message.clone()
    }

    /// The protocol version from the status line.
    pub fn version(&self) -> String {
        self.lock().version.clone()
    }

    /// The value of the first header matching `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<String> {
        self.lock().headers.get(name).map(str::to_owned)
    }

    /// Visit every header in insertion order.
    pub fn each_header(&self, mut f: impl FnMut(&Header)) {
        for header in self.lock().headers.iter() {
            f(header);
        }
    }

    /// The response body.
    pub fn body(&self) -> Vec<u8> {
        self.lock().body.clone()
    }

    /// A copy of the request that initiated this response.
    pub fn request(&self) -> Request {
        self.lock().request.clone()
    }

    /// How many times the request has been re-issued by the completion
    /// hooks.
    pub fn retries(&self) -> u32 {
        self.lock().retries
    }

    /// The inactivity window after which the exchange is failed.
    pub fn stall_timeout(&self) -> Duration {
        self.inner.stall_timeout
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.inner.state.lock().unwrap()
    }

    /// Clear parsed state ahead of a retry, keeping the request.
    pub(crate) fn reset(&self, retries: u32) {
        let mut state = self.lock();
        state.version.clear();
        state.status_code = 0;
        state.status_message.clear();
        state.headers.clear();
        state.body.clear();
        state.retries = retries;
    }
}

impl ResponseState {
    pub(crate) fn status_code(&self) -> u16 {
        self.status_code
    }

    pub(crate) fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }
}

impl Message for ResponseState {
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

    /// `VERSION SP STATUS SP MESSAGE`, STATUS a decimal integer. The reason
    /// phrase is the untrimmed remainder of the line.
    fn parse_initial_line(&mut self, line: &str) -> Result<()> {
        let space = line
            .find(' ')
            .ok_or_else(|| Error::parse("no response version found"))?;
        self.version = line[..space].to_owned();

        let rest = &line[space + 1..];
        let space = rest
            .find(' ')
            .ok_or_else(|| Error::parse("no status code found"))?;
        self.status_code = rest[..space]
            .parse()
            .map_err(|_| Error::parse("status code is not numeric"))?;
        self.status_message = rest[space + 1..].to_owned();
        Ok(())
    }
}
