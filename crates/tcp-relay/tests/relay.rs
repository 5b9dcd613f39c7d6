//! End-to-end relay tests over loopback TCP.

use std::{future::Future, net::SocketAddr, time::Duration};

use tcp_relay::{AcceptErrorPolicy, Config, ConnectionRegistry, Listener, RelayStats, BUFFER_LEN};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Relay {
    addr: SocketAddr,
    registry: ConnectionRegistry,
    stats: RelayStats,
    shutdown: CancellationToken,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_relay(upstream: SocketAddr) -> Relay {
    let cfg = Config {
        listen_host: "127.0.0.1".into(),
        listen_port: 0,
        upstream_host: upstream.ip().to_string(),
        upstream_port: upstream.port(),
        debug: false,
        log_level: "info".into(),
        accept_error_policy: AcceptErrorPolicy::Continue,
    };
    let registry = ConnectionRegistry::new();
    let stats = RelayStats::new();
    let listener = Listener::bind(&cfg, registry.clone(), stats.clone())
        .await
        .unwrap();
    let addr = listener.local_addr();
    let shutdown = CancellationToken::new();
    tokio::spawn(listener.run(shutdown.clone()));
    Relay {
        addr,
        registry,
        stats,
        shutdown,
    }
}

/// Upstream that echoes every byte back on the same connection.
async fn start_echo() -> SocketAddr {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = l.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut s, _)) = l.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = s.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

async fn eventually<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(WAIT, async {
        while !cond().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Read until EOF or reset; returns bytes seen.
async fn drain(s: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = timeout(WAIT, s.read_to_end(&mut out))
        .await
        .expect("socket was not closed");
    out
}

fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

#[tokio::test]
async fn ping_pong_then_client_close() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(upstream.local_addr().unwrap()).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut server, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();

    client.write_all(b"PING").await.unwrap();
    let mut buf = [0u8; 4];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"PING");

    server.write_all(b"PONG").await.unwrap();
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"PONG");

    drop(client);
    assert!(drain(&mut server).await.is_empty());
    let registry = relay.registry.clone();
    eventually(|| {
        let r = registry.clone();
        async move { r.is_empty() }
    })
    .await;
    assert_eq!(relay.stats.accepted(), 1);
    assert_eq!(relay.stats.upstream_connected(), 1);
}

#[tokio::test]
async fn upstream_close_cascades_to_client() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(upstream.local_addr().unwrap()).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut server, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();

    server.write_all(b"bye").await.unwrap();
    drop(server);

    assert_eq!(drain(&mut client).await, b"bye");
    let registry = relay.registry.clone();
    eventually(|| {
        let r = registry.clone();
        async move { r.is_empty() }
    })
    .await;
}

#[tokio::test]
async fn refused_upstream_closes_client_without_data() {
    let dead = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let relay = start_relay(dead).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let _ = client.write_all(b"ignored").await;
    assert!(drain(&mut client).await.is_empty());

    let stats = relay.stats.clone();
    eventually(|| {
        let s = stats.clone();
        async move { s.upstream_failed() == 1 }
    })
    .await;
    let registry = relay.registry.clone();
    eventually(|| {
        let r = registry.clone();
        async move { r.is_empty() }
    })
    .await;
    assert_eq!(relay.stats.accepted(), 1);
    assert_eq!(relay.stats.upstream_connected(), 0);
    assert_eq!(relay.stats.snapshot(0).bytes_upstream, 0);
}

#[tokio::test]
async fn large_stream_arrives_intact_and_in_order() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(upstream.local_addr().unwrap()).await;

    let data = payload(7, 1 << 20);
    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut server, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();

    let sent = data.clone();
    let writer = tokio::spawn(async move {
        client.write_all(&sent).await.unwrap();
        client.shutdown().await.unwrap();
        client
    });

    let received = drain(&mut server).await;
    let _client = writer.await.unwrap();
    assert_eq!(received.len(), data.len());
    assert!(received == data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_concurrent_sessions_do_not_mix() {
    let relay = start_relay(start_echo().await).await;
    let len = 10_000;
    assert!(len > BUFFER_LEN);

    let mut sessions = Vec::new();
    for seed in 0..100u8 {
        let addr = relay.addr;
        sessions.push(tokio::spawn(async move {
            let data = payload(seed, len);
            let mut client = TcpStream::connect(addr).await.unwrap();
            let (mut r, mut w) = client.split();
            let mut echoed = vec![0u8; len];
            let (wrote, read) = tokio::join!(w.write_all(&data), r.read_exact(&mut echoed));
            wrote.unwrap();
            read.unwrap();
            assert!(echoed == data, "session {seed} got foreign or reordered bytes");
        }));
    }
    for s in sessions {
        timeout(WAIT, s).await.unwrap().unwrap();
    }

    assert_eq!(relay.stats.accepted(), 100);
    assert_eq!(relay.stats.upstream_connected(), 100);

    let registry = relay.registry.clone();
    eventually(|| {
        let r = registry.clone();
        async move { r.is_empty() }
    })
    .await;
    let stats = relay.stats.clone();
    eventually(|| {
        let s = stats.clone();
        async move {
            let snap = s.snapshot(0);
            snap.bytes_upstream == 100 * len as u64 && snap.bytes_downstream == 100 * len as u64
        }
    })
    .await;
}

#[tokio::test]
async fn close_all_tears_down_live_sessions() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(upstream.local_addr().unwrap()).await;

    let mut client = TcpStream::connect(relay.addr).await.unwrap();
    let (mut server, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();

    let stats = relay.stats.clone();
    eventually(|| {
        let s = stats.clone();
        async move { s.upstream_connected() == 1 }
    })
    .await;

    relay.shutdown.cancel();
    assert_eq!(relay.registry.close_all().await, 1);
    assert!(relay.registry.is_empty());
    assert!(drain(&mut client).await.is_empty());
    assert!(drain(&mut server).await.is_empty());
}

#[tokio::test]
async fn bridges_stay_registered_while_idle() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = start_relay(upstream.local_addr().unwrap()).await;

    let _client = TcpStream::connect(relay.addr).await.unwrap();
    let (_server, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();

    let registry = relay.registry.clone();
    eventually(|| {
        let r = registry.clone();
        async move { r.len() == 1 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relay.registry.len(), 1);
    for bridge in relay.registry.bridges() {
        assert!(!bridge.is_closing());
    }
}
