// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use resp_proxy_rs::{
    metrics::ProxyMetrics,
    resp::Resp,
    router::{Router, memory::MemoryRouter},
    server,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::integration_tests::common::{TestClient, bulk, test_config};

async fn spawn_proxy(
    auth: &str,
    max_clients: u32,
) -> Result<(std::net::SocketAddr, Arc<ProxyMetrics>, CancellationToken)> {
    let cfg = test_config(auth, max_clients, 128);
    let metrics = Arc::new(ProxyMetrics::default());
    let router: Arc<dyn Router> = Arc::new(MemoryRouter::new(&cfg.proxy.backend_addrs));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    tokio::spawn(server::serve(
        listener,
        router,
        cfg,
        Arc::clone(&metrics),
        shutdown.clone(),
    ));
    Ok((addr, metrics, shutdown))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_over_tcp() -> Result<()> {
    let (addr, _metrics, shutdown) = spawn_proxy("", 10).await?;

    let mut client = TestClient::new(TcpStream::connect(addr).await?);
    client.push(&["SET", "a", "1"]);
    client.push(&["SET", "b", "2"]);
    client.push(&["GET", "a"]);
    client.push(&["GET", "b"]);
    client.flush().await?;

    client.expect(Resp::ok()).await?;
    client.expect(Resp::ok()).await?;
    client.expect(bulk("1")).await?;
    client.expect(bulk("2")).await?;

    client.send(&["QUIT"]).await?;
    client.expect(Resp::ok()).await?;
    assert_eq!(client.read().await?, None);

    shutdown.cancel();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_admission_cap_over_tcp() -> Result<()> {
    let (addr, metrics, shutdown) = spawn_proxy("", 1).await?;

    let mut first = TestClient::new(TcpStream::connect(addr).await?);
    first.send(&["PING"]).await?;
    first
        .expect(Resp::status(bytes::Bytes::from_static(b"PONG")))
        .await?;
    assert_eq!(metrics.sessions(), 1);

    let mut second = TestClient::new(TcpStream::connect(addr).await?);
    second
        .expect(Resp::error("ERR max number of clients reached"))
        .await?;
    assert_eq!(second.read().await?, None, "refused socket must be closed");

    shutdown.cancel();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auth_over_tcp() -> Result<()> {
    let (addr, _metrics, shutdown) = spawn_proxy("sesame", 10).await?;

    let mut client = TestClient::new(TcpStream::connect(addr).await?);
    client.send(&["GET", "x"]).await?;
    client
        .expect(Resp::error("NOAUTH Authentication required"))
        .await?;

    client.send(&["AUTH", "sesame"]).await?;
    client.expect(Resp::ok()).await?;

    client.send(&["GET", "x"]).await?;
    client.expect(Resp::Null).await?;

    shutdown.cancel();
    Ok(())
}
