//! Per-endpoint connection pools.
//!
//! A pool hands out one connection per in-flight exchange: idle connections
//! are reused (stale ones are discarded on the way out), new connections are
//! admitted while the pool is under its cap, and callers beyond the cap park
//! as waiters. A released connection goes to the head waiter before it is
//! ever enqueued as idle; a closed connection frees its slot and, when
//! waiters remain, triggers a replacement connect.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, trace};
use tokio::sync::oneshot;

use crate::{Endpoint, Error, Result, conn::Conn, transport::Connector};

pub(crate) struct Pool {
    endpoint: Endpoint,
    connector: Connector,
    state: Mutex<PoolState>,
}

struct PoolState {
    limit_enabled: bool,
    max_connections: usize,
    stall: Duration,
    /// Connecting + active + idle connections charged to this pool.
    total: usize,
    idle: VecDeque<Conn>,
    waiters: VecDeque<oneshot::Sender<Result<Conn>>>,
}

enum Plan {
    Reuse(Conn),
    Connect(Duration),
    Wait(oneshot::Receiver<Result<Conn>>),
}

impl Pool {
    pub(crate) fn new(
        endpoint: Endpoint,
        connector: Connector,
        limit_enabled: bool,
        max_connections: usize,
        stall: Duration,
    ) -> Arc<Pool> {
        Arc::new(Pool {
            endpoint,
            connector,
            state: Mutex::new(PoolState {
                limit_enabled,
                max_connections,
                stall,
                total: 0,
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        })
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Get a connection: reuse an idle one, open a new one while under the
    /// cap, or park until a release or replacement arrives.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<Conn> {
        let plan = {
            let mut state = self.state.lock().unwrap();
            loop {
                if let Some(mut conn) = state.idle.pop_front() {
                    if conn.is_valid() {
                        trace!("pool {}: reusing idle conn {}", self.endpoint, conn.id());
                        break Plan::Reuse(conn);
                    }
                    debug!(
                        "pool {}: dropping stale idle conn {}",
                        self.endpoint,
                        conn.id()
                    );
                    state.total -= 1;
                    continue;
                }
                if !state.limit_enabled || state.total < state.max_connections {
                    state.total += 1;
                    break Plan::Connect(state.stall);
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                trace!("pool {}: saturated, parking waiter", self.endpoint);
                break Plan::Wait(rx);
            }
        };

        match plan {
            Plan::Reuse(conn) => Ok(conn),
            Plan::Connect(stall) => {
                let slot = SlotGuard { pool: self, armed: true };
                let conn = Conn::open(&self.connector, self.endpoint.clone(), stall).await?;
                slot.disarm();
                Ok(conn)
            }
            Plan::Wait(rx) => match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::canceled()),
            },
        }
    }

    /// Return a reusable connection. Waiters are served head-first and
    /// outside the pool mutex; cancelled waiters are skipped.
    pub(crate) fn release(self: &Arc<Self>, mut conn: Conn) {
        loop {
            let waiter = {
                let mut state = self.state.lock().unwrap();
                match state.waiters.pop_front() {
                    Some(waiter) => waiter,
                    None => {
                        trace!("pool {}: conn {} idle", self.endpoint, conn.id());
                        state.idle.push_back(conn);
                        return;
                    }
                }
            };
            match waiter.send(Ok(conn)) {
                Ok(()) => {
                    trace!("pool {}: handed released conn to waiter", self.endpoint);
                    return;
                }
                Err(Ok(back)) => conn = back,
                Err(Err(_)) => return,
            }
        }
    }

    /// Account for a closed connection. Frees the slot and, when waiters
    /// remain under the cap, starts a replacement whose readiness feeds
    /// [`release`](Pool::release).
    pub(crate) fn discard(self: &Arc<Self>) {
        let respawn = {
            let mut state = self.state.lock().unwrap();
            state.total -= 1;
            !state.waiters.is_empty()
        };
        if respawn {
            self.spawn_replacement();
        }
    }

    /// Reserve a slot and connect in the background for a parked waiter.
    /// Returns false when there is no waiter or no capacity.
    fn spawn_replacement(self: &Arc<Self>) -> bool {
        let stall = {
            let mut state = self.state.lock().unwrap();
            if state.waiters.is_empty() {
                return false;
            }
            if state.limit_enabled && state.total >= state.max_connections {
                return false;
            }
            state.total += 1;
            state.stall
        };

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            debug!(
                "pool {}: opening replacement connection for waiter",
                pool.endpoint
            );
            match Conn::open(&pool.connector, pool.endpoint.clone(), stall).await {
                Ok(conn) => pool.release(conn),
                Err(e) => {
                    let waiter = {
                        let mut state = pool.state.lock().unwrap();
                        state.total -= 1;
                        state.waiters.pop_front()
                    };
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(Err(e));
                    }
                    // Remaining waiters each get their own attempt.
                    pool.spawn_replacement();
                }
            }
        });
        true
    }

    /// Apply client-level settings. Raising the cap may admit replacements
    /// for parked waiters.
    pub(crate) fn configure(self: &Arc<Self>, limit_enabled: bool, max_connections: usize) {
        let parked = {
            let mut state = self.state.lock().unwrap();
            state.limit_enabled = limit_enabled;
            state.max_connections = max_connections;
            state.waiters.len()
        };
        for _ in 0..parked {
            if !self.spawn_replacement() {
                break;
            }
        }
    }

    pub(crate) fn set_stall(&self, stall: Duration) {
        self.state.lock().unwrap().stall = stall;
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.lock().unwrap();
        (state.total, state.idle.len(), state.waiters.len())
    }
}

struct SlotGuard<'a> {
    pool: &'a Arc<Pool>,
    armed: bool,
}

impl SlotGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            // The connect failed or its caller went away before it
            // finished; the reserved slot goes back to the queue.
            self.pool.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use url::Url;

    const STALL: Duration = Duration::from_secs(5);

    /// Listener that accepts connections and holds them open.
    async fn accepting_listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        let endpoint = Endpoint::from_url(&url).unwrap();
        (listener, endpoint)
    }

    fn pool_for(endpoint: Endpoint, max: usize) -> Arc<Pool> {
        Pool::new(endpoint, Connector::new(), true, max, STALL)
    }

    #[tokio::test]
    async fn admits_up_to_cap_then_parks() {
        let (listener, endpoint) = accepting_listener().await;
        let keep = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (sock, _) = listener.accept().await.unwrap();
                held.push(sock);
            }
        });

        let pool = pool_for(endpoint, 2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.counts(), (2, 0, 0));

        let waiter = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.counts(), (2, 0, 1));

        // Releasing one connection serves the parked waiter with that very
        // connection instead of queueing it as idle.
        let released_id = a.id();
        pool.release(a);
        let handed = waiter.await.unwrap().unwrap();
        assert_eq!(handed.id(), released_id);
        assert_eq!(pool.counts(), (2, 0, 0));

        drop(b);
        keep.abort();
    }

    #[tokio::test]
    async fn release_without_waiters_goes_idle_and_is_reused() {
        let (listener, endpoint) = accepting_listener().await;
        let keep = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (sock, _) = listener.accept().await.unwrap();
                held.push(sock);
            }
        });

        let pool = pool_for(endpoint, 4);
        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        pool.release(conn);
        assert_eq!(pool.counts(), (1, 1, 0));

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), id);
        keep.abort();
    }

    #[tokio::test]
    async fn stale_idle_connections_are_skipped() {
        let (listener, endpoint) = accepting_listener().await;
        let pool = pool_for(endpoint, 4);

        let (conn, accept) = tokio::join!(pool.acquire(), listener.accept());
        let (peer, _) = accept.unwrap();
        pool.release(conn.unwrap());

        // Server closes the idle connection behind our back.
        drop(peer);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The stale entry is discarded and a fresh connection is opened.
        let (fresh, accept) = tokio::join!(pool.acquire(), listener.accept());
        assert!(fresh.is_ok());
        assert!(accept.is_ok());
        assert_eq!(pool.counts(), (1, 0, 0));
    }

    #[tokio::test]
    async fn cancelled_waiter_is_skipped_on_release() {
        let (listener, endpoint) = accepting_listener().await;
        let keep = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (sock, _) = listener.accept().await.unwrap();
                held.push(sock);
            }
        });

        let pool = pool_for(endpoint, 1);
        let conn = pool.acquire().await.unwrap();

        let ghost = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire().await }
        });
        let second = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.counts(), (1, 0, 2));

        // First waiter gives up before a connection frees.
        ghost.abort();
        let _ = ghost.await;

        pool.release(conn);
        let served = second.await.unwrap();
        assert!(served.is_ok());
        keep.abort();
    }

    #[tokio::test]
    async fn discard_spawns_replacement_for_waiter() {
        let (listener, endpoint) = accepting_listener().await;
        let keep = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (sock, _) = listener.accept().await.unwrap();
                held.push(sock);
            }
        });

        let pool = pool_for(endpoint, 1);
        let conn = pool.acquire().await.unwrap();

        let waiter = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The active connection dies instead of being released.
        drop(conn);
        pool.discard();

        let served = waiter.await.unwrap();
        assert!(served.is_ok());
        keep.abort();
    }

    #[tokio::test]
    async fn failed_replacement_fails_the_waiter() {
        let (listener, endpoint) = accepting_listener().await;
        let pool = pool_for(endpoint, 1);

        let (conn, accept) = tokio::join!(pool.acquire(), listener.accept());
        let conn = conn.unwrap();
        let _peer = accept.unwrap();

        let waiter = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Nobody listens on the endpoint anymore; the replacement connect
        // must fail, and the failure must reach the waiter.
        drop(listener);
        drop(conn);
        pool.discard();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_connect());
        assert_eq!(pool.counts().0, 0);
    }

    #[tokio::test]
    async fn raising_the_cap_unparks_waiters() {
        let (listener, endpoint) = accepting_listener().await;
        let keep = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (sock, _) = listener.accept().await.unwrap();
                held.push(sock);
            }
        });

        let pool = pool_for(endpoint, 1);
        let _held = pool.acquire().await.unwrap();

        let waiter = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.configure(true, 2);
        let served = waiter.await.unwrap();
        assert!(served.is_ok());
        keep.abort();
    }
}
