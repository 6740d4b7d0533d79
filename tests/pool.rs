mod support;

use std::time::{Duration, Instant};

use htpool::{Client, Request};
use support::server;
use tokio::io::AsyncWriteExt;

const SLOW: Duration = Duration::from_millis(150);
const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

#[tokio::test]
async fn saturated_pool_queues_the_overflow() {
    let server = server::with_response(|_req, socket| {
        Box::new(async move {
            tokio::time::sleep(SLOW).await;
            socket.write_all(OK).await.unwrap();
        })
    });

    let client = Client::builder().max_connections(2).build();
    let started = Instant::now();

    let a = client.get(Request::new(server.url("/a")).unwrap());
    let b = client.get(Request::new(server.url("/b")).unwrap());
    let c = client.get(Request::new(server.url("/c")).unwrap());
    let (ra, rb, rc) = tokio::join!(a.completion(), b.completion(), c.completion());
    let elapsed = started.elapsed();

    assert_eq!(ra.unwrap(), 200);
    assert_eq!(rb.unwrap(), 200);
    assert_eq!(rc.unwrap(), 200);

    // Exactly two connections were opened; the third request waited for a
    // release, so the wall time covers two server rounds.
    assert_eq!(server.connections(), 2);
    assert!(
        elapsed >= SLOW * 2,
        "third request should have waited: {elapsed:?}"
    );
}

#[tokio::test]
async fn unlimited_pool_opens_a_connection_per_caller() {
    let server = server::with_response(|_req, socket| {
        Box::new(async move {
            tokio::time::sleep(SLOW).await;
            socket.write_all(OK).await.unwrap();
        })
    });

    let client = Client::builder().limit_connections(false).build();

    let a = client.get(Request::new(server.url("/a")).unwrap());
    let b = client.get(Request::new(server.url("/b")).unwrap());
    let c = client.get(Request::new(server.url("/c")).unwrap());
    let (ra, rb, rc) = tokio::join!(a.completion(), b.completion(), c.completion());

    assert!(ra.is_ok() && rb.is_ok() && rc.is_ok());
    assert_eq!(server.connections(), 3);
}

#[tokio::test]
async fn raising_the_cap_reaches_existing_pools() {
    let server = server::with_response(|_req, socket| {
        Box::new(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            socket.write_all(OK).await.unwrap();
        })
    });

    let client = Client::builder().max_connections(1).build();

    let first = client.get(Request::new(server.url("/a")).unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Saturated: this one parks.
    let second = client.get(Request::new(server.url("/b")).unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Raising the cap admits a replacement connection for the waiter.
    client.set_max_connections(2);

    let (rf, rs) = tokio::join!(first.completion(), second.completion());
    assert_eq!(rf.unwrap(), 200);
    assert_eq!(rs.unwrap(), 200);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn requests_to_distinct_endpoints_use_distinct_pools() {
    let server_a = server::with_response(|_req, socket| {
        Box::new(async move {
            socket.write_all(OK).await.unwrap();
        })
    });
    let server_b = server::with_response(|_req, socket| {
        Box::new(async move {
            socket.write_all(OK).await.unwrap();
        })
    });

    let client = Client::builder().max_connections(1).build();
    let a = client.get(Request::new(server_a.url("/")).unwrap());
    let b = client.get(Request::new(server_b.url("/")).unwrap());
    let (ra, rb) = tokio::join!(a.completion(), b.completion());

    assert_eq!(ra.unwrap(), 200);
    assert_eq!(rb.unwrap(), 200);
    assert_eq!(server_a.connections(), 1);
    assert_eq!(server_b.connections(), 1);
}
