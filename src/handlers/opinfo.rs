// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Command classification: name extraction and capability flags.

use std::collections::HashMap;

use anyhow::{Result, ensure};
use bytes::Bytes;
use once_cell::sync::Lazy;

bitflags::bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlag: u32 {
        /// Mutates backend state.
        const WRITE       = 0x01;
        /// Unclassified command, assumed to possibly write.
        const MAY_WRITE   = 0x02;
        /// Refused by the proxy; terminates the session when seen.
        const NOT_ALLOWED = 0x04;
    }
}

impl OpFlag {
    pub fn is_not_allowed(&self) -> bool {
        self.contains(OpFlag::NOT_ALLOWED)
    }
}

const W: OpFlag = OpFlag::WRITE;
const R: OpFlag = OpFlag::empty();
const X: OpFlag = OpFlag::NOT_ALLOWED;

/// Commands the proxy understands, with their capability flags. Multi-key,
/// administrative and cross-slot commands that cannot be routed through a
/// single shard are marked not-allowed.
#[rustfmt::skip]
static OP_TABLE_ENTRIES: &[(&str, OpFlag)] = &[
    ("APPEND", W), ("AUTH", R), ("BGREWRITEAOF", X), ("BGSAVE", X),
    ("BITCOUNT", R), ("BITOP", X), ("BITPOS", R), ("BLPOP", X),
    ("BRPOP", X), ("BRPOPLPUSH", X), ("CLIENT", X), ("CONFIG", X),
    ("DBSIZE", X), ("DEBUG", X), ("DECR", W), ("DECRBY", W),
    ("DEL", W), ("DISCARD", X), ("DUMP", R), ("ECHO", R),
    ("EVAL", W), ("EVALSHA", W), ("EXEC", X), ("EXISTS", R),
    ("EXPIRE", W), ("EXPIREAT", W), ("FLUSHALL", X), ("FLUSHDB", X),
    ("GET", R), ("GETBIT", R), ("GETRANGE", R), ("GETSET", W),
    ("HDEL", W), ("HEXISTS", R), ("HGET", R), ("HGETALL", R),
    ("HINCRBY", W), ("HINCRBYFLOAT", W), ("HKEYS", R), ("HLEN", R),
    ("HMGET", R), ("HMSET", W), ("HSCAN", R), ("HSET", W),
    ("HSETNX", W), ("HVALS", R), ("INCR", W), ("INCRBY", W),
    ("INCRBYFLOAT", W), ("INFO", R), ("KEYS", X), ("LASTSAVE", X),
    ("LINDEX", R), ("LINSERT", W), ("LLEN", R), ("LPOP", W),
    ("LPUSH", W), ("LPUSHX", W), ("LRANGE", R), ("LREM", W),
    ("LSET", W), ("LTRIM", W), ("MGET", R), ("MIGRATE", X),
    ("MONITOR", X), ("MOVE", X), ("MSET", W), ("MSETNX", X),
    ("MULTI", X), ("OBJECT", X), ("PERSIST", W), ("PEXPIRE", W),
    ("PEXPIREAT", W), ("PFADD", W), ("PFCOUNT", R), ("PFMERGE", X),
    ("PING", R), ("PSETEX", W), ("PSUBSCRIBE", X), ("PSYNC", X),
    ("PTTL", R), ("PUBLISH", X), ("PUNSUBSCRIBE", X), ("QUIT", R),
    ("RANDOMKEY", X), ("RENAME", X), ("RENAMENX", X), ("RESTORE", X),
    ("RPOP", W), ("RPOPLPUSH", W), ("RPUSH", W), ("RPUSHX", W),
    ("SADD", W), ("SAVE", X), ("SCAN", X), ("SCARD", R),
    ("SCRIPT", X), ("SDIFF", R), ("SDIFFSTORE", W), ("SELECT", R),
    ("SET", W), ("SETBIT", W), ("SETEX", W), ("SETNX", W),
    ("SETRANGE", W), ("SHUTDOWN", X), ("SINTER", R), ("SINTERSTORE", W),
    ("SISMEMBER", R), ("SLAVEOF", X), ("SLOTSCHECK", X), ("SLOTSDEL", W),
    ("SLOTSINFO", R), ("SLOTSMAPPING", R), ("SLOTSMGRTONE", X),
    ("SLOTSMGRTSLOT", X), ("SLOTSMGRTTAGONE", X), ("SLOTSMGRTTAGSLOT", X),
    ("SLOTSSCAN", R), ("SLOWLOG", X), ("SMEMBERS", R), ("SMOVE", W),
    ("SORT", W), ("SPOP", W), ("SRANDMEMBER", R), ("SREM", W),
    ("SSCAN", R), ("STRLEN", R), ("SUBSCRIBE", X), ("SUBSTR", R),
    ("SUNION", R), ("SUNIONSTORE", W), ("SYNC", X), ("TIME", X),
    ("TTL", R), ("TYPE", R), ("UNSUBSCRIBE", X), ("UNWATCH", X),
    ("WATCH", X), ("ZADD", W), ("ZCARD", R), ("ZCOUNT", R),
    ("ZINCRBY", W), ("ZINTERSTORE", W), ("ZLEXCOUNT", R), ("ZRANGE", R),
    ("ZRANGEBYLEX", R), ("ZRANGEBYSCORE", R), ("ZRANK", R), ("ZREM", W),
    ("ZREMRANGEBYLEX", W), ("ZREMRANGEBYRANK", W), ("ZREMRANGEBYSCORE", W),
    ("ZREVRANGE", R), ("ZREVRANGEBYSCORE", R), ("ZREVRANK", R),
    ("ZSCAN", R), ("ZSCORE", R), ("ZUNIONSTORE", W),
];

static OP_TABLE: Lazy<HashMap<&'static str, OpFlag>> =
    Lazy::new(|| OP_TABLE_ENTRIES.iter().copied().collect());

/// Extracts the uppercased command name and its flags from a decoded
/// multi-bulk. Unknown commands default to `MAY_WRITE`.
pub fn get_op_info(multi: &[Bytes]) -> Result<(String, OpFlag)> {
    ensure!(!multi.is_empty(), "bad multi-bulk, empty command");
    let name = String::from_utf8_lossy(&multi[0]).to_ascii_uppercase();
    let flag = OP_TABLE
        .get(name.as_str())
        .copied()
        .unwrap_or(OpFlag::MAY_WRITE);
    Ok((name, flag))
}
