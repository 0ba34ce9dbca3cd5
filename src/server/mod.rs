// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TCP accept loop feeding sessions to the router.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{net::TcpListener, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cfg::config::Config, metrics::ProxyMetrics, router::Router, session::Session,
};

const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(50);

/// Accepts connections until `shutdown` fires, starting one session per
/// client. Admission control runs inside `Session::start`, so a refused
/// client still gets its error reply without stalling this loop.
pub async fn serve(
    listener: TcpListener,
    router: Arc<dyn Router>,
    config: Arc<Config>,
    metrics: Arc<ProxyMetrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut backoff = ACCEPT_BACKOFF_INITIAL;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("listener stopped");
                return Ok(());
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    backoff = ACCEPT_BACKOFF_INITIAL;
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!("set_nodelay for {peer} failed: {err}");
                    }
                    Session::new(
                        stream,
                        peer.to_string(),
                        Arc::clone(&config),
                        Arc::clone(&metrics),
                    )
                    .start(Arc::clone(&router));
                },
                Err(err) => {
                    // Transient resource exhaustion (EMFILE and friends);
                    // retry instead of tearing the proxy down.
                    warn!("accept failed: {err}, retrying in {backoff:?}");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(config.runtime.accept_backoff_max);
                },
            },
        }
    }
}
