// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    sync::atomic::{AtomicI64, Ordering},
};

use crate::metrics::ProxyMetrics;

/// One flush per 100 ms wall-clock tick, unless forced.
const FLUSH_PERIOD_NS: i64 = 100_000_000;
/// The opmap is rebuilt on this flush cadence when it has grown past
/// `OPMAP_KEEP_MAX`, bounding memory against pathological command
/// vocabularies.
const OPMAP_REBUILD_EVERY: u64 = 16384;
const OPMAP_KEEP_MAX: usize = 32;

#[derive(Debug, Default, Clone, Copy)]
pub struct OpEntry {
    pub calls: i64,
    pub nanos: i64,
}

/// Writer-owned per-session accumulators, flushed opportunistically into the
/// process-wide counters when the pipeline drains.
#[derive(Debug)]
pub struct OpStatsBook {
    opmap: HashMap<String, OpEntry>,
    flush_tick: i64,
    flush_count: u64,
}

impl Default for OpStatsBook {
    fn default() -> Self {
        Self {
            opmap: HashMap::with_capacity(OPMAP_KEEP_MAX),
            flush_tick: -1,
            flush_count: 0,
        }
    }
}

impl OpStatsBook {
    pub fn incr_op(&mut self, op: &str, nanos: i64) {
        if !self.opmap.contains_key(op) {
            self.opmap.insert(op.to_string(), OpEntry::default());
        }
        if let Some(entry) = self.opmap.get_mut(op) {
            entry.calls += 1;
            entry.nanos += nanos;
        }
    }

    /// Drains the session accumulators into `metrics`. Rate-limited to one
    /// flush per tick; `force` bypasses the limiter at teardown. Returns
    /// whether a flush happened.
    pub fn flush(
        &mut self,
        total: &AtomicI64,
        fails: &AtomicI64,
        metrics: &ProxyMetrics,
        now_ns: i64,
        force: bool,
    ) -> bool {
        let tick = now_ns / FLUSH_PERIOD_NS;
        if !force && tick == self.flush_tick {
            return false;
        }
        self.flush_tick = tick;

        metrics.add_op_total(total.swap(0, Ordering::Relaxed));
        metrics.add_op_fails(fails.swap(0, Ordering::Relaxed));
        for (op, entry) in self.opmap.iter_mut() {
            if entry.calls != 0 || entry.nanos != 0 {
                let taken = std::mem::take(entry);
                metrics.add_op_stats(op, taken.calls, taken.nanos);
            }
        }

        self.flush_count += 1;
        if self.opmap.len() > OPMAP_KEEP_MAX && self.flush_count % OPMAP_REBUILD_EVERY == 0 {
            self.opmap = HashMap::with_capacity(OPMAP_KEEP_MAX);
        }
        true
    }

    pub fn opmap_len(&self) -> usize {
        self.opmap.len()
    }
}
