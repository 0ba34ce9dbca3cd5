// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use resp_proxy_rs::{
    cfg::{config::Config, logger::init_logger},
    metrics::ProxyMetrics,
    router::{Router, memory::MemoryRouter},
    server,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("config/logger.yaml")?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/proxy.yaml".to_string());
    let cfg = Config::load_from_file(&config_path)
        .with_context(|| format!("failed to load config {config_path}"))?;
    ensure!(
        !cfg.proxy.backend_addrs.is_empty(),
        "BackendAddrs must name at least one backend"
    );
    let cfg = Arc::new(cfg);

    let metrics = Arc::new(ProxyMetrics::default());
    let router: Arc<dyn Router> = Arc::new(MemoryRouter::new(&cfg.proxy.backend_addrs));

    let listener = TcpListener::bind(&cfg.proxy.bind).await?;
    info!(
        "proxy listening on {}, {} backends",
        cfg.proxy.bind,
        cfg.proxy.backend_addrs.len()
    );

    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.cancel();
        }
    });

    server::serve(listener, router, cfg, metrics, shutdown).await
}
