// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Slot model and the dispatch contract between a session and the backend
//! fleet.

/// In-process backend fleet for the CLI binary and the test suite.
pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use crc::{CRC_32_ISO_HDLC, Crc};

use crate::{
    resp::Resp,
    session::request::Request,
};

/// Number of logical shards; slot ids live in `[0, MAX_SLOT_NUM)`.
pub const MAX_SLOT_NUM: usize = 1024;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Maps a key to its slot. A non-empty `{tag}` section restricts hashing to
/// the tag, letting clients pin related keys to one shard.
pub fn key_to_slot(key: &[u8]) -> usize {
    CRC32.checksum(hash_tag(key)) as usize % MAX_SLOT_NUM
}

fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{')
        && let Some(close) = key[open + 1..].iter().position(|&b| b == b'}')
        && close > 0
    {
        return &key[open + 1..open + 1 + close];
    }
    key
}

/// One shard's routing entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    pub id: usize,
    pub backend_addr: String,
    pub migrate_from: String,
    pub replica_groups: Vec<Vec<String>>,
}

impl Slot {
    /// Serializes the entry as `[id, backend_addr, migrate_from,
    /// [[addr, ...], ...]]` for SLOTSMAPPING.
    pub fn to_resp(&self) -> Resp {
        let groups = self
            .replica_groups
            .iter()
            .map(|group| {
                Resp::Array(
                    group
                        .iter()
                        .map(|addr| Resp::bulk(addr.clone().into_bytes()))
                        .collect(),
                )
            })
            .collect();
        Resp::Array(vec![
            Resp::Int(self.id as i64),
            Resp::bulk(self.backend_addr.clone().into_bytes()),
            Resp::bulk(self.migrate_from.clone().into_bytes()),
            Resp::Array(groups),
        ])
    }
}

/// SLOTSMAPPING entry for a possibly-missing slot; an absent slot
/// serializes as an empty array.
pub fn slot_entry(slot: Option<&Slot>) -> Resp {
    match slot {
        Some(s) => s.to_resp(),
        None => Resp::Array(Vec::new()),
    }
}

/// Dispatch contract owned by the backend fleet.
///
/// Every accepted dispatch registers exactly one pending completion on
/// `r.batch` before returning and signals it exactly once after populating
/// the request outcome; a refusal (`Err`, or `false` from `dispatch_addr`)
/// touches neither.
pub trait Router: Send + Sync + 'static {
    /// Routes by hashing the command's key argument.
    fn dispatch(&self, r: Arc<Request>) -> Result<()>;

    /// Routes to the backend owning `slot`.
    fn dispatch_slot(&self, r: Arc<Request>, slot: usize) -> Result<()>;

    /// Routes to a backend by address; `false` means the address is
    /// unknown and the request was not taken.
    fn dispatch_addr(&self, r: Arc<Request>, addr: &str) -> bool;

    fn is_online(&self) -> bool;

    fn get_slots(&self) -> Vec<Slot>;

    fn get_slot(&self, id: usize) -> Option<Slot>;
}

/// The key argument a hash-routed dispatch operates on.
pub fn request_key(r: &Request) -> &[u8] {
    match r.multi.get(1) {
        Some(key) => key,
        None => &[],
    }
}
