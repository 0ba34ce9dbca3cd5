// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use resp_proxy_rs::{metrics::ProxyMetrics, resp::Resp, router::Router};
use tokio::time::sleep;

use crate::integration_tests::common::{MockRouter, bulk, start_session, test_config};

async fn wait_sessions(metrics: &ProxyMetrics, want: i64) {
    for _ in 0..200 {
        if metrics.sessions() == want {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("session gauge stuck at {}, want {want}", metrics.sessions());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_admission_cap_refuses_excess_clients() -> Result<()> {
    let router = MockRouter::new();
    let cfg = test_config("", 1, 128);
    let metrics = Arc::new(ProxyMetrics::default());

    let mut first = start_session(
        Arc::clone(&cfg),
        Arc::clone(&metrics),
        Arc::clone(&router) as Arc<dyn Router>,
    );
    first.client.send(&["GET", "a"]).await?;
    first.client.expect(bulk("GET a")).await?;
    assert_eq!(metrics.sessions(), 1);

    let mut second = start_session(
        Arc::clone(&cfg),
        Arc::clone(&metrics),
        Arc::clone(&router) as Arc<dyn Router>,
    );
    second
        .client
        .expect(Resp::error("ERR max number of clients reached"))
        .await?;
    assert_eq!(second.client.read().await?, None);
    assert_eq!(metrics.sessions(), 1);

    // Capacity is released on teardown and a new client gets in.
    first.client.send(&["QUIT"]).await?;
    first.client.expect(Resp::ok()).await?;
    wait_sessions(&metrics, 0).await;

    let mut third = start_session(cfg, Arc::clone(&metrics), router as Arc<dyn Router>);
    third.client.send(&["GET", "b"]).await?;
    third.client.expect(bulk("GET b")).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_offline_router_refuses_sessions() -> Result<()> {
    let router = MockRouter::offline();
    let cfg = test_config("", 10, 128);
    let metrics = Arc::new(ProxyMetrics::default());

    let mut h = start_session(cfg, Arc::clone(&metrics), router as Arc<dyn Router>);
    h.client
        .expect(Resp::error("ERR router is not online"))
        .await?;
    assert_eq!(h.client.read().await?, None);
    assert_eq!(metrics.sessions(), 0);
    Ok(())
}
