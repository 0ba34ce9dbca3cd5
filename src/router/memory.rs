// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! An in-process backend fleet.
//!
//! Stands in for the production shard servers: every named backend owns a
//! key-value store and executes dispatched requests on a spawned task, so
//! completions reach the session writer asynchronously and out of arrival
//! order, exactly like remote backends would.

use std::sync::{Arc, atomic::AtomicBool, atomic::Ordering};

use anyhow::{Result, anyhow, bail};
use bytes::Bytes;
use dashmap::DashMap;

use crate::{
    resp::Resp,
    router::{MAX_SLOT_NUM, Router, Slot, key_to_slot, request_key},
    session::request::Request,
};

#[derive(Debug)]
pub struct MemoryBackend {
    addr: String,
    store: DashMap<Bytes, Bytes>,
}

impl MemoryBackend {
    fn new(addr: &str) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.to_string(),
            store: DashMap::new(),
        })
    }

    /// Seeds a key directly, bypassing the wire; test setup helper.
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.store.insert(key.into(), value.into());
    }

    fn spawn_execute(self: &Arc<Self>, r: Arc<Request>) {
        r.batch.add(1);
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = if r.is_broken() {
                Err(anyhow!("session is broken"))
            } else {
                backend.execute(&r)
            };
            r.complete(outcome);
        });
    }

    fn execute(&self, r: &Request) -> Result<Resp> {
        let argv = &r.multi;
        let args = argv.len() - 1;
        Ok(match r.op_str.as_str() {
            "PING" => match args {
                0 => Resp::status(Bytes::from_static(b"PONG")),
                _ => Resp::Bulk(argv[1].clone()),
            },
            "INFO" => Resp::bulk(
                format!(
                    "# Backend\r\naddr:{}\r\nkeys:{}\r\n",
                    self.addr,
                    self.store.len()
                )
                .into_bytes(),
            ),
            "SET" if args == 2 => {
                self.store.insert(argv[1].clone(), argv[2].clone());
                Resp::ok()
            },
            "GET" if args == 1 => match self.store.get(&argv[1]) {
                Some(v) => Resp::Bulk(v.clone()),
                None => Resp::Null,
            },
            "MGET" if args >= 1 => Resp::Array(
                argv[1..]
                    .iter()
                    .map(|key| match self.store.get(key) {
                        Some(v) => Resp::Bulk(v.clone()),
                        None => Resp::Null,
                    })
                    .collect(),
            ),
            "MSET" if args >= 2 && args % 2 == 0 => {
                for pair in argv[1..].chunks_exact(2) {
                    self.store.insert(pair[0].clone(), pair[1].clone());
                }
                Resp::ok()
            },
            "DEL" if args >= 1 => {
                let mut removed = 0;
                for key in &argv[1..] {
                    if self.store.remove(key).is_some() {
                        removed += 1;
                    }
                }
                Resp::Int(removed)
            },
            "EXISTS" if args == 1 => Resp::Int(self.store.contains_key(&argv[1]) as i64),
            "TYPE" if args == 1 => {
                if self.store.contains_key(&argv[1]) {
                    Resp::status(Bytes::from_static(b"string"))
                } else {
                    Resp::status(Bytes::from_static(b"none"))
                }
            },
            "SLOTSINFO" => Resp::Array(Vec::new()),
            "SLOTSSCAN" if args >= 2 => {
                let slot = parse_slot(&argv[1])?;
                let keys = self
                    .store
                    .iter()
                    .filter(|kv| key_to_slot(kv.key()) == slot)
                    .map(|kv| Resp::Bulk(kv.key().clone()))
                    .collect();
                Resp::Array(vec![
                    Resp::bulk(Bytes::from_static(b"0")),
                    Resp::Array(keys),
                ])
            },
            op @ ("SET" | "GET" | "MGET" | "MSET" | "DEL" | "EXISTS" | "TYPE"
            | "SLOTSSCAN") => Resp::error(
                format!("ERR wrong number of arguments for '{op}' command")
                    .into_bytes(),
            ),
            op => Resp::error(format!("ERR unknown command '{op}'").into_bytes()),
        })
    }
}

fn parse_slot(raw: &[u8]) -> Result<usize> {
    let s = std::str::from_utf8(raw)?;
    let slot = s.parse::<usize>()?;
    if slot >= MAX_SLOT_NUM {
        bail!("slot {slot} out of range");
    }
    Ok(slot)
}

/// Slot-sharded fleet of [`MemoryBackend`]s.
pub struct MemoryRouter {
    slots: Vec<Slot>,
    backends: DashMap<String, Arc<MemoryBackend>>,
    online: AtomicBool,
}

impl MemoryRouter {
    /// Partitions the slot range into contiguous chunks across `addrs`.
    pub fn new(addrs: &[String]) -> Self {
        let backends = DashMap::new();
        for addr in addrs {
            backends.insert(addr.clone(), MemoryBackend::new(addr));
        }
        let chunk = MAX_SLOT_NUM.div_ceil(addrs.len().max(1));
        let slots = (0..MAX_SLOT_NUM)
            .map(|id| Slot {
                id,
                backend_addr: addrs
                    .get(id / chunk)
                    .cloned()
                    .unwrap_or_default(),
                migrate_from: String::new(),
                replica_groups: Vec::new(),
            })
            .collect();
        Self {
            slots,
            backends,
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn backend(&self, addr: &str) -> Option<Arc<MemoryBackend>> {
        self.backends.get(addr).map(|b| Arc::clone(&b))
    }
}

impl Router for MemoryRouter {
    fn dispatch(&self, r: Arc<Request>) -> Result<()> {
        let slot = key_to_slot(request_key(&r));
        self.dispatch_slot(r, slot)
    }

    fn dispatch_slot(&self, r: Arc<Request>, slot: usize) -> Result<()> {
        let entry = self
            .slots
            .get(slot)
            .ok_or_else(|| anyhow!("slot {slot} out of range"))?;
        let backend = self
            .backends
            .get(&entry.backend_addr)
            .ok_or_else(|| anyhow!("slot {slot} has no backend"))?;
        backend.spawn_execute(r);
        Ok(())
    }

    fn dispatch_addr(&self, r: Arc<Request>, addr: &str) -> bool {
        match self.backends.get(addr) {
            Some(backend) => {
                backend.spawn_execute(r);
                true
            },
            None => false,
        }
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn get_slots(&self) -> Vec<Slot> {
        self.slots.clone()
    }

    fn get_slot(&self, id: usize) -> Option<Slot> {
        self.slots.get(id).cloned()
    }
}
