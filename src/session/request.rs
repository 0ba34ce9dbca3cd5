// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::{handlers::opinfo::OpFlag, resp::Resp};

/// Single-use counting completion latch.
///
/// The writer waits once; each accepted dispatch adds one pending signal and
/// the backend delivers it via `done` after populating the request outcome.
/// Scattered requests share the parent's latch, so the parent becomes ready
/// only after every sub-request has completed.
#[derive(Debug, Default)]
pub struct Batch {
    pending: AtomicUsize,
    notify: Notify,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `n` more pending completions. Must happen-before the
    /// matching `done` calls.
    pub fn add(&self, n: usize) {
        self.pending.fetch_add(n, Ordering::SeqCst);
    }

    /// Signals one completion. The outcome it reports must be written
    /// before this call.
    pub fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_one();
        }
    }

    /// Blocks the single waiter until every registered completion has been
    /// signaled. Returns immediately when nothing is pending.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Reducer run by the writer once all sub-requests have signaled; yields the
/// parent response.
pub type Coalesce = Box<dyn FnOnce() -> Result<Resp> + Send>;

#[derive(Debug, Default)]
struct Outcome {
    resp: Option<Resp>,
    err: Option<anyhow::Error>,
}

/// One client command in flight through the pipeline.
///
/// Co-owned by the reader (constructs and enqueues), the backend (writes the
/// outcome, signals the batch) and the writer (waits, reads, emits). The
/// write-once-before-signal / read-only-after-wait discipline keeps the
/// outcome lock uncontended.
pub struct Request {
    /// Decoded multi-bulk argv, command name first.
    pub multi: Vec<Bytes>,
    pub op_str: String,
    pub op_flag: OpFlag,
    /// Arrival timestamp in nanoseconds, for latency accounting.
    pub start_ns: i64,
    pub batch: Arc<Batch>,
    /// Back-reference to the owning session's broken flag; backends consult
    /// it to short-circuit work for a dead session.
    pub broken: Arc<AtomicBool>,
    outcome: Mutex<Outcome>,
    coalesce: Mutex<Option<Coalesce>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("op_str", &self.op_str)
            .field("argc", &self.multi.len())
            .finish()
    }
}

/// Outcome mutations cannot tear (single writer before signal), so a
/// poisoned lock still holds a consistent value.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Request {
    pub fn new(multi: Vec<Bytes>, start_ns: i64, broken: Arc<AtomicBool>) -> Self {
        Self {
            multi,
            op_str: String::new(),
            op_flag: OpFlag::empty(),
            start_ns,
            batch: Arc::new(Batch::new()),
            broken,
            outcome: Mutex::new(Outcome::default()),
            coalesce: Mutex::new(None),
        }
    }

    /// Builds a sub-request sharing the parent's batch and broken flag.
    pub fn sub(parent: &Request, multi: Vec<Bytes>) -> Arc<Request> {
        Arc::new(Self {
            multi,
            op_str: parent.op_str.clone(),
            op_flag: parent.op_flag,
            start_ns: parent.start_ns,
            batch: Arc::clone(&parent.batch),
            broken: Arc::clone(&parent.broken),
            outcome: Mutex::new(Outcome::default()),
            coalesce: Mutex::new(None),
        })
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Stores the backend outcome and signals the batch. Called exactly once
    /// per accepted dispatch.
    pub fn complete(&self, res: Result<Resp>) {
        {
            let mut o = lock_ignore_poison(&self.outcome);
            match res {
                Ok(resp) => o.resp = Some(resp),
                Err(err) => o.err = Some(err),
            }
        }
        self.batch.done();
    }

    /// Presets a locally produced response without touching the batch; used
    /// for in-band errors and handler failures that never reach a backend.
    pub fn set_resp(&self, resp: Resp) {
        lock_ignore_poison(&self.outcome).resp = Some(resp);
    }

    pub fn set_coalesce(&self, f: Coalesce) {
        *lock_ignore_poison(&self.coalesce) = Some(f);
    }

    pub fn take_coalesce(&self) -> Option<Coalesce> {
        lock_ignore_poison(&self.coalesce).take()
    }

    /// Moves the outcome out; valid only after the batch has been waited on
    /// (or for never-dispatched requests).
    pub fn take_outcome(&self) -> (Option<Resp>, Option<anyhow::Error>) {
        let mut o = lock_ignore_poison(&self.outcome);
        (o.resp.take(), o.err.take())
    }

    fn reset(&mut self, multi: Vec<Bytes>, start_ns: i64, broken: Arc<AtomicBool>) {
        self.multi = multi;
        self.op_str.clear();
        self.op_flag = OpFlag::empty();
        self.start_ns = start_ns;
        self.batch = Arc::new(Batch::new());
        self.broken = broken;
        *lock_ignore_poison(&self.outcome) = Outcome::default();
        *lock_ignore_poison(&self.coalesce) = None;
    }
}

/// Freelist arena amortizing request allocation across one session.
///
/// The reader fetches, the writer releases after emitting the response; a
/// request is only recycled once nothing else holds it.
#[derive(Debug, Default)]
pub struct RequestAlloc {
    free: Mutex<Vec<Arc<Request>>>,
}

const ALLOC_CACHE_MAX: usize = 128;

impl RequestAlloc {
    pub fn fetch(
        &self,
        multi: Vec<Bytes>,
        start_ns: i64,
        broken: Arc<AtomicBool>,
    ) -> Arc<Request> {
        if let Some(mut r) = lock_ignore_poison(&self.free).pop()
            && let Some(inner) = Arc::get_mut(&mut r)
        {
            inner.reset(multi, start_ns, broken);
            return r;
        }
        Arc::new(Request::new(multi, start_ns, broken))
    }

    pub fn release(&self, r: Arc<Request>) {
        if Arc::strong_count(&r) != 1 {
            return;
        }
        let mut free = lock_ignore_poison(&self.free);
        if free.len() < ALLOC_CACHE_MAX {
            free.push(r);
        }
    }
}
