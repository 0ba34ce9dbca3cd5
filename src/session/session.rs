// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf, split},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cfg::config::Config,
    handlers,
    metrics::ProxyMetrics,
    resp::{Resp, decode::FrameReader, encode::FrameWriter},
    router::Router,
    session::{
        request::{Request, RequestAlloc},
        stats::OpStatsBook,
    },
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("too many sessions")]
    TooManySessions,

    #[error("router is not online")]
    RouterNotOnline,

    /// A dispatched request completed with neither a response nor an error.
    #[error("resp is required")]
    RespIsRequired,
}

/// Wall-clock nanoseconds; the default session clock.
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// State shared between the reader, the writer, backends holding in-flight
/// requests, and external introspection.
pub struct SessionCore {
    config: Arc<Config>,
    metrics: Arc<ProxyMetrics>,
    remote: String,
    create_unix: i64,
    ops: AtomicI64,
    last_op_unix: AtomicI64,
    /// Set on full close; backends short-circuit in-flight work on it.
    broken: Arc<AtomicBool>,
    /// Aborts the read path once the session is fully closed.
    kill: CancellationToken,
    /// Close logging fires at most once.
    exit: OnceCell<()>,
    pub(crate) stats_total: AtomicI64,
    pub(crate) stats_fails: AtomicI64,
    clock: fn() -> i64,
}

impl SessionCore {
    pub fn auth(&self) -> &str {
        &self.config.proxy.auth
    }

    pub fn now_ns(&self) -> i64 {
        (self.clock)()
    }

    pub fn ops(&self) -> i64 {
        self.ops.load(Ordering::Relaxed)
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Bumps the session failure counter and hands the error back, so call
    /// sites can wrap a return value without extra plumbing.
    pub fn incr_op_fails<E>(&self, err: E) -> E {
        self.stats_fails.fetch_add(1, Ordering::Relaxed);
        err
    }

    /// Closes the session. `half` stops only the read side so the writer
    /// can still drain queued responses; a full close marks the session
    /// broken and cancels the kill token. Idempotent: the log line fires
    /// once no matter how often this is called.
    pub fn close_with_error(&self, err: Option<&anyhow::Error>, half: bool) {
        if self.exit.set(()).is_ok() {
            match err {
                Some(err) => {
                    info!("session [{}] closed: {self}, error: {err}", self.remote)
                },
                None => info!("session [{}] closed: {self}, quit", self.remote),
            }
        }
        if !half {
            self.broken.store(true, Ordering::SeqCst);
            self.kill.cancel();
        }
    }

    pub fn close(&self) {
        self.close_with_error(None, false);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            ops: self.ops.load(Ordering::Relaxed),
            create: self.create_unix,
            lastop: self.last_op_unix.load(Ordering::Relaxed),
            remote: self.remote.clone(),
        }
    }
}

/// JSON summary exposed for introspection and close logging.
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub ops: i64,
    pub create: i64,
    pub lastop: i64,
    pub remote: String,
}

impl fmt::Display for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary =
            serde_json::to_string(&self.snapshot()).map_err(|_| fmt::Error)?;
        f.write_str(&summary)
    }
}

/// Reader-local session state; never crosses the task boundary.
pub(crate) struct ReaderState {
    pub(crate) core: Arc<SessionCore>,
    pub(crate) authorized: bool,
    pub(crate) quit: bool,
}

/// One connected client.
///
/// Owns both stream halves until `start`, which performs admission and
/// hands them to the spawned reader and writer. Consuming `self` makes a
/// second start unrepresentable.
pub struct Session<S> {
    core: Arc<SessionCore>,
    rd: FrameReader<ReadHalf<S>>,
    wr: FrameWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Session<S> {
    pub fn new(
        stream: S,
        remote: impl Into<String>,
        config: Arc<Config>,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self::with_clock(stream, remote, config, metrics, now_ns)
    }

    /// Like [`Session::new`] with an injected nanosecond clock, so tests
    /// can pin the pseudo-random probe slot and the stats flush tick.
    pub fn with_clock(
        stream: S,
        remote: impl Into<String>,
        config: Arc<Config>,
        metrics: Arc<ProxyMetrics>,
        clock: fn() -> i64,
    ) -> Self {
        let (r, w) = split(stream);
        let core = Arc::new(SessionCore {
            config,
            metrics,
            remote: remote.into(),
            create_unix: clock() / 1_000_000_000,
            ops: AtomicI64::new(0),
            last_op_unix: AtomicI64::new(0),
            broken: Arc::new(AtomicBool::new(false)),
            kill: CancellationToken::new(),
            exit: OnceCell::new(),
            stats_total: AtomicI64::new(0),
            stats_fails: AtomicI64::new(0),
            clock,
        });
        Self {
            core,
            rd: FrameReader::new(r),
            wr: FrameWriter::new(w),
        }
    }

    /// Shared handle for introspection and external close.
    pub fn core(&self) -> Arc<SessionCore> {
        Arc::clone(&self.core)
    }

    /// Admits the session and spawns its reader and writer. Refusals are
    /// reported to the client from a detached task so the caller's accept
    /// loop never blocks on a slow peer.
    pub fn start(self, router: Arc<dyn Router>) {
        let Session { core, rd, wr } = self;
        let metrics = Arc::clone(&core.metrics);

        if metrics.incr_sessions() > core.config.proxy.max_clients as i64 {
            refuse(
                core,
                wr,
                "ERR max number of clients reached",
                SessionError::TooManySessions,
            );
            metrics.decr_sessions();
            return;
        }
        if !router.is_online() {
            refuse(
                core,
                wr,
                "ERR router is not online",
                SessionError::RouterNotOnline,
            );
            metrics.decr_sessions();
            return;
        }

        let (tx, rx) = mpsc::channel(core.config.proxy.session_max_pipeline);
        let alloc = Arc::new(RequestAlloc::default());

        let writer = tokio::spawn(loop_writer(
            Arc::clone(&core),
            wr,
            rx,
            Arc::clone(&alloc),
        ));
        tokio::spawn(async move {
            if let Err(err) = loop_reader(Arc::clone(&core), rd, tx, alloc, router).await
            {
                core.close_with_error(Some(&err), true);
            }
            let _ = writer.await;
            core.metrics.decr_sessions();
        });
    }
}

/// Reports an admission refusal and closes, off the accept path.
fn refuse<S: AsyncRead + AsyncWrite + Send + 'static>(
    core: Arc<SessionCore>,
    mut wr: FrameWriter<WriteHalf<S>>,
    reply: &'static str,
    err: SessionError,
) {
    tokio::spawn(async move {
        wr.encode(&Resp::error(reply));
        let _ = wr.flush().await;
        core.close_with_error(Some(&anyhow::Error::new(err)), false);
    });
}

async fn loop_reader<S: AsyncRead + Send>(
    core: Arc<SessionCore>,
    mut rd: FrameReader<ReadHalf<S>>,
    tx: mpsc::Sender<Arc<Request>>,
    alloc: Arc<RequestAlloc>,
    router: Arc<dyn Router>,
) -> Result<()> {
    let mut state = ReaderState {
        authorized: core.auth().is_empty(),
        quit: false,
        core: Arc::clone(&core),
    };
    let broken = Arc::clone(&core.broken);

    loop {
        if state.quit {
            return Ok(());
        }
        let multi = tokio::select! {
            _ = core.kill.cancelled() => bail!("session killed"),
            res = rd.read_multi_bulk() => res.context("decode multi-bulk")?,
        };
        let Some(multi) = multi else {
            bail!("connection closed by peer");
        };

        core.stats_total.fetch_add(1, Ordering::Relaxed);
        core.ops.fetch_add(1, Ordering::Relaxed);
        core.last_op_unix
            .store(core.now_ns() / 1_000_000_000, Ordering::Relaxed);

        let mut r = alloc.fetch(multi, core.now_ns(), Arc::clone(&broken));
        if let Err(err) = handlers::handle_request(&mut state, &mut r, &router) {
            let err = core.incr_op_fails(err);
            // A preset error reply supersedes any partially-built coalesce.
            r.take_coalesce();
            r.set_resp(Resp::error(
                format!("ERR handle request, {err}").into_bytes(),
            ));
            let _ = tx.send(r).await;
            return Err(err);
        }
        if tx.send(r).await.is_err() {
            bail!("writer has terminated");
        }
    }
}

async fn loop_writer<S: AsyncWrite + Send>(
    core: Arc<SessionCore>,
    mut wr: FrameWriter<WriteHalf<S>>,
    mut rx: mpsc::Receiver<Arc<Request>>,
    alloc: Arc<RequestAlloc>,
) {
    let mut book = OpStatsBook::default();
    let err = write_responses(&core, &mut wr, &mut rx, &mut book, &alloc)
        .await
        .err();
    core.close_with_error(err.as_ref(), false);

    // Everything still queued was accepted but can no longer be answered.
    while rx.recv().await.is_some() {
        core.stats_fails.fetch_add(1, Ordering::Relaxed);
    }
    book.flush(
        &core.stats_total,
        &core.stats_fails,
        &core.metrics,
        core.now_ns(),
        true,
    );
}

async fn write_responses<S: AsyncWrite + Send>(
    core: &SessionCore,
    wr: &mut FrameWriter<WriteHalf<S>>,
    rx: &mut mpsc::Receiver<Arc<Request>>,
    book: &mut OpStatsBook,
    alloc: &RequestAlloc,
) -> Result<()> {
    while let Some(r) = rx.recv().await {
        r.batch.wait().await;

        let resp = match resolve_response(&r) {
            Ok(resp) => resp,
            Err(err) => {
                let err = core.incr_op_fails(err);
                wr.encode(&Resp::error(
                    format!("ERR handle response, {err}").into_bytes(),
                ));
                let _ = wr.flush().await;
                return Err(err);
            },
        };

        book.incr_op(&r.op_str, core.now_ns() - r.start_ns);
        wr.encode(&resp);

        if rx.is_empty() {
            wr.flush().await.map_err(|err| {
                core.incr_op_fails(anyhow!(err).context("flush responses"))
            })?;
            book.flush(
                &core.stats_total,
                &core.stats_fails,
                &core.metrics,
                core.now_ns(),
                false,
            );
        }
        alloc.release(r);
    }
    Ok(())
}

/// Runs the coalesce reducer if present, otherwise surfaces the backend
/// outcome; a missing response is a session-fatal protocol violation.
fn resolve_response(r: &Request) -> Result<Resp> {
    if let Some(coalesce) = r.take_coalesce() {
        return coalesce();
    }
    let (resp, err) = r.take_outcome();
    if let Some(err) = err {
        return Err(err);
    }
    resp.ok_or_else(|| anyhow::Error::new(SessionError::RespIsRequired))
}
