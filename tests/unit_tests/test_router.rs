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
    router::{MAX_SLOT_NUM, Router, Slot, key_to_slot, memory::MemoryRouter, slot_entry},
    session::Request,
};
use tokio::time::timeout;

fn argv(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

fn addrs() -> Vec<String> {
    vec!["shard-0".to_string(), "shard-1".to_string()]
}

#[test]
fn test_key_to_slot_stays_in_range() {
    for key in [&b"a"[..], b"foo", b"", b"{}", b"a{b}c", b"\xff\xfe"] {
        assert!(key_to_slot(key) < MAX_SLOT_NUM);
    }
}

#[test]
fn test_hash_tag_pins_related_keys() {
    assert_eq!(
        key_to_slot(b"{user1000}.following"),
        key_to_slot(b"{user1000}.followers")
    );
    // An empty or unterminated tag falls back to the whole key.
    assert_ne!(key_to_slot(b"{}aaa"), key_to_slot(b"{}bbb"));
    assert_ne!(key_to_slot(b"{unclosed"), key_to_slot(b"{unclosed}"));
}

#[test]
fn test_slot_entry_serialization() {
    let slot = Slot {
        id: 5,
        backend_addr: "shard-1".to_string(),
        migrate_from: String::new(),
        replica_groups: vec![vec!["replica-a".to_string()]],
    };
    assert_eq!(
        slot.to_resp(),
        Resp::Array(vec![
            Resp::Int(5),
            Resp::bulk(Bytes::from_static(b"shard-1")),
            Resp::bulk(Bytes::from_static(b"")),
            Resp::Array(vec![Resp::Array(vec![Resp::bulk(Bytes::from_static(
                b"replica-a"
            ))])]),
        ])
    );
    // A missing slot serializes as an empty array.
    assert_eq!(slot_entry(None), Resp::Array(Vec::new()));
}

#[test]
fn test_memory_router_partitions_slot_range() {
    let router = MemoryRouter::new(&addrs());
    let slots = router.get_slots();
    assert_eq!(slots.len(), MAX_SLOT_NUM);
    assert_eq!(slots[0].backend_addr, "shard-0");
    assert_eq!(slots[MAX_SLOT_NUM - 1].backend_addr, "shard-1");
    assert!(router.get_slot(MAX_SLOT_NUM).is_none());
    assert_eq!(router.get_slot(3).map(|s| s.id), Some(3));
}

async fn execute(router: &MemoryRouter, parts: &[&str]) -> Result<Resp> {
    let mut req = Request::new(
        argv(parts),
        0,
        Arc::new(AtomicBool::new(false)),
    );
    req.op_str = parts[0].to_string();
    let r = Arc::new(req);
    router.dispatch(Arc::clone(&r))?;
    timeout(Duration::from_secs(1), r.batch.wait()).await?;
    let (resp, err) = r.take_outcome();
    if let Some(err) = err {
        return Err(err);
    }
    Ok(resp.expect("backend must produce a response"))
}

#[tokio::test]
async fn test_memory_backend_set_get_del() -> Result<()> {
    let router = MemoryRouter::new(&addrs());

    assert_eq!(execute(&router, &["SET", "a", "1"]).await?, Resp::ok());
    assert_eq!(
        execute(&router, &["GET", "a"]).await?,
        Resp::bulk(Bytes::from_static(b"1"))
    );
    assert_eq!(execute(&router, &["DEL", "a"]).await?, Resp::Int(1));
    assert_eq!(execute(&router, &["GET", "a"]).await?, Resp::Null);
    Ok(())
}

#[tokio::test]
async fn test_memory_backend_direct_seeding() -> Result<()> {
    let router = MemoryRouter::new(&addrs());

    // Key "a" hashes into the upper half of the slot range.
    let owner = router
        .get_slot(key_to_slot(b"a"))
        .map(|s| s.backend_addr)
        .expect("slot table is fully populated");
    let backend = router.backend(&owner).expect("backend exists");
    backend.put("a", "seeded");

    assert_eq!(
        execute(&router, &["GET", "a"]).await?,
        Resp::bulk(Bytes::from_static(b"seeded"))
    );
    Ok(())
}

#[tokio::test]
async fn test_memory_backend_refuses_broken_sessions() -> Result<()> {
    let router = MemoryRouter::new(&addrs());
    let broken = Arc::new(AtomicBool::new(true));
    let mut req = Request::new(argv(&["GET", "a"]), 0, broken);
    req.op_str = "GET".to_string();
    let r = Arc::new(req);
    router.dispatch(Arc::clone(&r))?;
    timeout(Duration::from_secs(1), r.batch.wait()).await?;
    let (resp, err) = r.take_outcome();
    assert!(resp.is_none());
    assert!(err.is_some());
    Ok(())
}
