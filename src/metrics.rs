// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Process-wide proxy counters.
//!
//! Sessions receive an `Arc<ProxyMetrics>` at creation instead of touching
//! globals, which keeps the session core testable; the binary builds one
//! instance and shares it across the listener.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct OpMetric {
    pub calls: AtomicI64,
    pub nanos: AtomicI64,
}

#[derive(Debug, Default)]
pub struct ProxyMetrics {
    sessions: AtomicI64,
    op_total: AtomicI64,
    op_fails: AtomicI64,
    op_stats: DashMap<String, OpMetric>,
}

impl ProxyMetrics {
    /// Registers one more live session and returns the post-increment count,
    /// which admission compares against `ProxyMaxClients`.
    pub fn incr_sessions(&self) -> i64 {
        self.sessions.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn decr_sessions(&self) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn add_op_total(&self, n: i64) {
        if n != 0 {
            self.op_total.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn add_op_fails(&self, n: i64) {
        if n != 0 {
            self.op_fails.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Folds one per-session opmap entry into the process-wide table.
    pub fn add_op_stats(&self, op: &str, calls: i64, nanos: i64) {
        let entry = match self.op_stats.get(op) {
            Some(entry) => entry,
            None => self
                .op_stats
                .entry(op.to_string())
                .or_default()
                .downgrade(),
        };
        entry.calls.fetch_add(calls, Ordering::Relaxed);
        entry.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn sessions(&self) -> i64 {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn op_total(&self) -> i64 {
        self.op_total.load(Ordering::Relaxed)
    }

    pub fn op_fails(&self) -> i64 {
        self.op_fails.load(Ordering::Relaxed)
    }

    /// `(calls, total_nanos)` for one command, if it was ever flushed.
    pub fn op_stat(&self, op: &str) -> Option<(i64, i64)> {
        self.op_stats.get(op).map(|e| {
            (
                e.calls.load(Ordering::Relaxed),
                e.nanos.load(Ordering::Relaxed),
            )
        })
    }
}
