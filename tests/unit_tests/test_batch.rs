// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use anyhow::Result;
use bytes::Bytes;
use resp_proxy_rs::{
    resp::Resp,
    session::{Batch, Request, RequestAlloc},
};
use tokio::time::timeout;

fn argv(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

#[tokio::test]
async fn test_wait_with_nothing_pending_returns_immediately() -> Result<()> {
    let batch = Batch::new();
    timeout(Duration::from_millis(100), batch.wait()).await?;
    Ok(())
}

#[tokio::test]
async fn test_wait_blocks_until_all_signals() -> Result<()> {
    let batch = Arc::new(Batch::new());
    batch.add(2);

    let early = Arc::clone(&batch);
    tokio::spawn(async move {
        early.done();
    });
    // One signal is not enough.
    assert!(
        timeout(Duration::from_millis(50), batch.wait())
            .await
            .is_err()
    );

    let late = Arc::clone(&batch);
    tokio::spawn(async move {
        late.done();
    });
    timeout(Duration::from_secs(1), batch.wait()).await?;
    Ok(())
}

#[tokio::test]
async fn test_signal_before_wait_is_not_lost() -> Result<()> {
    let batch = Batch::new();
    batch.add(1);
    batch.done();
    timeout(Duration::from_millis(100), batch.wait()).await?;
    Ok(())
}

#[tokio::test]
async fn test_complete_stores_outcome_before_signal() -> Result<()> {
    let broken = Arc::new(AtomicBool::new(false));
    let r = Arc::new(Request::new(argv(&["GET", "a"]), 0, broken));
    r.batch.add(1);

    let backend = Arc::clone(&r);
    tokio::spawn(async move {
        backend.complete(Ok(Resp::Int(1)));
    });

    timeout(Duration::from_secs(1), r.batch.wait()).await?;
    let (resp, err) = r.take_outcome();
    assert_eq!(resp, Some(Resp::Int(1)));
    assert!(err.is_none());
    Ok(())
}

#[test]
fn test_sub_requests_share_batch_and_broken() {
    let broken = Arc::new(AtomicBool::new(false));
    let parent = Request::new(argv(&["MGET", "a", "b"]), 7, broken);
    let sub = Request::sub(&parent, argv(&["MGET", "a"]));

    assert!(Arc::ptr_eq(&parent.batch, &sub.batch));
    assert!(Arc::ptr_eq(&parent.broken, &sub.broken));
    assert_eq!(sub.start_ns, parent.start_ns);
}

#[test]
fn test_alloc_recycles_released_requests() {
    let alloc = RequestAlloc::default();
    let broken = Arc::new(AtomicBool::new(false));

    let r = alloc.fetch(argv(&["SET", "a", "1"]), 1, Arc::clone(&broken));
    r.set_resp(Resp::ok());
    let ptr = Arc::as_ptr(&r);
    alloc.release(r);

    let reused = alloc.fetch(argv(&["GET", "b"]), 2, broken);
    assert_eq!(Arc::as_ptr(&reused), ptr);
    // Recycled state must be pristine.
    assert_eq!(reused.multi, argv(&["GET", "b"]));
    assert_eq!(reused.start_ns, 2);
    assert!(reused.op_str.is_empty());
    let (resp, err) = reused.take_outcome();
    assert!(resp.is_none());
    assert!(err.is_none());
}

#[test]
fn test_alloc_skips_shared_requests() {
    let alloc = RequestAlloc::default();
    let broken = Arc::new(AtomicBool::new(false));

    let r = alloc.fetch(argv(&["GET", "a"]), 1, Arc::clone(&broken));
    let held = Arc::clone(&r);
    let ptr = Arc::as_ptr(&r);
    alloc.release(r);

    let fresh = alloc.fetch(argv(&["GET", "b"]), 2, broken);
    assert_ne!(Arc::as_ptr(&fresh), ptr);
    drop(held);
}
