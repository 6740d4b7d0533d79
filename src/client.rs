//! The client dispatcher: verb entrypoints, the per-endpoint pool map, and
//! the retryable completion pipeline.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::debug;

use crate::{
    Endpoint, Error, Request, Response, Result,
    pool::Pool,
    promise::{Promise, Settled},
    retry::CompletionChain,
    transport::Connector,
};

const DEFAULT_MAX_CONNECTIONS: usize = 8;
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// An asynchronous HTTP/1.1 client with per-endpoint connection pooling.
///
/// `Client` is cheap to clone and cloning is the recommended way to share
/// it; all clones use the same pools. Verb methods return a [`Response`]
/// immediately; the outcome of the exchange surfaces on
/// [`Response::completion`].
///
/// ```rust,ignore
/// let client = htpool::Client::new();
/// let response = client.get(htpool::Request::new("http://example.com/")?);
/// let status = response.completion().await?;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    connector: Connector,
    pools: Mutex<HashMap<Endpoint, Arc<Pool>>>,
    settings: Mutex<Settings>,
    hooks: CompletionChain,
}

#[derive(Clone, Copy)]
struct Settings {
    limit_enabled: bool,
    max_connections: usize,
    stall_timeout: Duration,
}

/// Builds a [`Client`] with non-default pooling or timeout settings.
#[derive(Clone, Copy)]
pub struct ClientBuilder {
    settings: Settings,
}

impl ClientBuilder {
    /// The per-endpoint connection cap. Defaults to 8. Hitting the cap
    /// parks callers instead of failing them.
    pub fn max_connections(mut self, max: usize) -> ClientBuilder {
        self.settings.max_connections = max;
        self
    }

    /// Enable or disable the per-endpoint connection cap. Defaults to
    /// enabled.
    pub fn limit_connections(mut self, enabled: bool) -> ClientBuilder {
        self.settings.limit_enabled = enabled;
        self
    }

    /// The inactivity window after which an exchange fails. Defaults to
    /// 30 seconds. Overridable per request via
    /// [`Request::stall_timeout`](crate::Request::stall_timeout).
    pub fn stall_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.settings.stall_timeout = timeout;
        self
    }

    /// Finish the builder.
    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                connector: Connector::new(),
                pools: Mutex::new(HashMap::new()),
                settings: Mutex::new(self.settings),
                hooks: CompletionChain::default(),
            }),
        }
    }
}

impl Client {
    /// A client with default settings.
    pub fn new() -> Client {
        Client::builder().build()
    }

    /// Start building a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            settings: Settings {
                limit_enabled: true,
                max_connections: DEFAULT_MAX_CONNECTIONS,
                stall_timeout: DEFAULT_STALL_TIMEOUT,
            },
        }
    }

    /// Issue a GET request.
    pub fn get(&self, mut request: Request) -> Response {
        request.set_method("GET");
        self.request(request)
    }

    /// Issue a POST request.
    pub fn post(&self, mut request: Request) -> Response {
        request.set_method("POST");
        self.request(request)
    }

    /// Issue a PUT request.
    pub fn put(&self, mut request: Request) -> Response {
        request.set_method("PUT");
        self.request(request)
    }

    /// Issue a HEAD request.
    pub fn head(&self, mut request: Request) -> Response {
        request.set_method("HEAD");
        self.request(request)
    }

    /// Issue an OPTIONS request.
    pub fn options(&self, mut request: Request) -> Response {
        request.set_method("OPTIONS");
        self.request(request)
    }

    /// Issue a request whose method is already set.
    ///
    /// Must be called within a tokio runtime; the exchange is driven by a
    /// spawned task. Endpoint problems (unsupported scheme, missing host)
    /// fail the returned response's completion instead of panicking.
    pub fn request(&self, request: Request) -> Response {
        let settings = *self.inner.settings.lock().unwrap();
        let stall = request.stall_override().unwrap_or(settings.stall_timeout);
        let endpoint = match request.url() {
            Some(url) => Endpoint::from_url(url),
            None => Err(Error::uri("request has no URL")),
        };

        let response = Response::new(request, stall);
        match endpoint {
            Ok(endpoint) => {
                let pool = self.pool_for(endpoint, &settings);
                tokio::spawn(drive(
                    Arc::clone(&self.inner),
                    pool,
                    response.clone(),
                ));
            }
            Err(e) => response.completion().fail(e),
        }
        response
    }

    /// Register a completion hook (see the [`retry`](crate::retry) module).
    ///
    /// Hooks run in registration order after every attempt; the first hook
    /// returning `false` triggers a retry of the request.
    pub fn on_completion<F>(&self, hook: F)
    where
        F: Fn(&Settled<u16>, &Response, u32) -> bool + Send + Sync + 'static,
    {
        self.inner.hooks.add(hook);
    }

    /// Change the per-endpoint connection cap, propagating to existing
    /// pools.
    pub fn set_max_connections(&self, max: usize) {
        let settings = {
            let mut settings = self.inner.settings.lock().unwrap();
            settings.max_connections = max;
            *settings
        };
        for pool in self.pools() {
            pool.configure(settings.limit_enabled, settings.max_connections);
        }
    }

    /// Enable or disable the connection cap, propagating to existing pools.
    pub fn set_limit_connections(&self, enabled: bool) {
        let settings = {
            let mut settings = self.inner.settings.lock().unwrap();
            settings.limit_enabled = enabled;
            *settings
        };
        for pool in self.pools() {
            pool.configure(settings.limit_enabled, settings.max_connections);
        }
    }

    /// Change the default stall timeout, propagating to existing pools.
    /// In-flight responses keep the window they started with.
    pub fn set_stall_timeout(&self, timeout: Duration) {
        self.inner.settings.lock().unwrap().stall_timeout = timeout;
        for pool in self.pools() {
            pool.set_stall(timeout);
        }
    }

    fn pools(&self) -> Vec<Arc<Pool>> {
        self.inner.pools.lock().unwrap().values().cloned().collect()
    }

    /// The pool for an endpoint, lazily created with the current settings.
    fn pool_for(&self, endpoint: Endpoint, settings: &Settings) -> Arc<Pool> {
        let mut pools = self.inner.pools.lock().unwrap();
        pools
            .entry(endpoint)
            .or_insert_with_key(|endpoint| {
                debug!("creating pool for {endpoint}");
                Pool::new(
                    endpoint.clone(),
                    self.inner.connector.clone(),
                    settings.limit_enabled,
                    settings.max_connections,
                    settings.stall_timeout,
                )
            })
            .clone()
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}

/// Drive one logical request to settlement: attempt, run the hook chain,
/// and either forward the outcome or reset and retry.
async fn drive(inner: Arc<ClientInner>, pool: Arc<Pool>, response: Response) {
    let completion = response.completion();
    let mut retry: u32 = 0;
    loop {
        let outcome = match attempt(&pool, &response, &completion).await {
            Ok(status) => Settled::Done(status),
            Err(e) if e.is_canceled() => Settled::Canceled,
            Err(e) => Settled::Failed(e),
        };

        if inner.hooks.all(&outcome, &response, retry) {
            // If the caller already settled the completion, this is
            // swallowed by the promise's first-wins rule.
            completion.settle(outcome);
            return;
        }

        retry += 1;
        debug!(
            "retrying request to {} (retry {retry})",
            pool.endpoint()
        );
        response.reset(retry);
    }
}

/// One attempt: checkout, exchange, and return the connection to the pool
/// (release on reusable success, close and discard otherwise). An early
/// settlement of the public completion (cancellation) aborts the attempt
/// and tears the connection down.
async fn attempt(
    pool: &Arc<Pool>,
    response: &Response,
    completion: &Promise<u16>,
) -> Result<u16> {
    let mut conn = tokio::select! {
        conn = pool.acquire() => conn?,
        _ = completion.clone() => return Err(Error::canceled()),
    };

    let result = tokio::select! {
        result = conn.exchange(response) => result,
        _ = completion.clone() => Err(Error::canceled()),
    };

    match result {
        Ok((status, true)) => {
            pool.release(conn);
            Ok(status)
        }
        Ok((status, false)) => {
            conn.close().await;
            pool.discard();
            Ok(status)
        }
        Err(e) => {
            conn.close().await;
            pool.discard();
            Err(e)
        }
    }
}
