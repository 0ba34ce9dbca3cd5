// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use resp_proxy_rs::{
    metrics::ProxyMetrics,
    resp::Resp,
    router::{Router, memory::MemoryRouter},
};

use crate::integration_tests::common::{
    Harness, bulk, start_session, status, test_config,
};

fn harness() -> Harness {
    let cfg = test_config("", 10, 128);
    let router: Arc<dyn Router> = Arc::new(MemoryRouter::new(&cfg.proxy.backend_addrs));
    start_session(cfg, Arc::new(ProxyMetrics::default()), router)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mget_scatters_and_coalesces_to_one_response() -> Result<()> {
    let mut h = harness();

    h.client.send(&["SET", "a", "1"]).await?;
    h.client.expect(Resp::ok()).await?;
    h.client.send(&["SET", "b", "2"]).await?;
    h.client.expect(Resp::ok()).await?;

    h.client.send(&["MGET", "a", "b", "c"]).await?;
    h.client
        .expect(Resp::Array(vec![bulk("1"), bulk("2"), Resp::Null]))
        .await?;

    // Exactly one frame came back; the next reply belongs to the next
    // command.
    h.client.send(&["PING"]).await?;
    h.client.expect(status("PONG")).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mget_single_key_degenerates_to_plain_dispatch() -> Result<()> {
    let mut h = harness();

    h.client.send(&["SET", "a", "1"]).await?;
    h.client.expect(Resp::ok()).await?;

    h.client.send(&["MGET", "a"]).await?;
    h.client.expect(Resp::Array(vec![bulk("1")])).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mset_scatter_matches_pointwise_writes() -> Result<()> {
    let mut h = harness();

    h.client
        .send(&["MSET", "k1", "v1", "k2", "v2", "k3", "v3"])
        .await?;
    h.client.expect(Resp::ok()).await?;

    for (key, value) in [("k1", "v1"), ("k2", "v2"), ("k3", "v3")] {
        h.client.send(&["GET", key]).await?;
        h.client.expect(bulk(value)).await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_del_scatter_sums_deletions() -> Result<()> {
    let mut h = harness();

    h.client
        .send(&["MSET", "k1", "v1", "k2", "v2", "k3", "v3"])
        .await?;
    h.client.expect(Resp::ok()).await?;

    h.client.send(&["DEL", "k1", "k2", "missing"]).await?;
    h.client.expect(Resp::Int(2)).await?;

    h.client.send(&["DEL", "k3"]).await?;
    h.client.expect(Resp::Int(1)).await?;

    h.client.send(&["DEL", "k1", "k2", "k3"]).await?;
    h.client.expect(Resp::Int(0)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_multikey_arity_errors_keep_session_alive() -> Result<()> {
    let mut h = harness();

    h.client.send(&["MGET"]).await?;
    h.client
        .expect(Resp::error("ERR wrong number of arguments for 'MGET' command"))
        .await?;

    h.client.send(&["MSET", "k1"]).await?;
    h.client
        .expect(Resp::error("ERR wrong number of arguments for 'MSET' command"))
        .await?;

    h.client.send(&["MSET", "k1", "v1", "k2"]).await?;
    h.client
        .expect(Resp::error("ERR wrong number of arguments for 'MSET' command"))
        .await?;

    h.client.send(&["DEL"]).await?;
    h.client
        .expect(Resp::error("ERR wrong number of arguments for 'DEL' command"))
        .await?;

    h.client.send(&["PING"]).await?;
    h.client.expect(status("PONG")).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mset_single_pair_degenerates_to_plain_dispatch() -> Result<()> {
    let mut h = harness();

    h.client.send(&["MSET", "solo", "v"]).await?;
    h.client.expect(Resp::ok()).await?;
    h.client.send(&["GET", "solo"]).await?;
    h.client.expect(bulk("v")).await?;
    Ok(())
}
