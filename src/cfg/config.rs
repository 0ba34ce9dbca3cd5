// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Parameters governing client-facing behavior of the proxy.
    pub proxy: ProxyConfig,
    /// Implementation/runtime parameters outside the wire protocol.
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Client-facing proxy settings.
pub struct ProxyConfig {
    #[serde(rename = "Bind")]
    /// Listen address, e.g. `0.0.0.0:19000`.
    pub bind: String,

    #[serde(default, rename = "Auth")]
    /// Session password; empty means authentication is not required.
    pub auth: String,

    #[serde(rename = "ProxyMaxClients")]
    /// Global cap on concurrently admitted sessions.
    pub max_clients: u32,

    #[serde(rename = "SessionMaxPipeline")]
    /// Per-session cap on in-flight pipelined requests.
    pub session_max_pipeline: usize,

    #[serde(default, rename = "BackendAddrs")]
    /// Backend fleet the slot range is partitioned across.
    pub backend_addrs: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings.
pub struct RuntimeConfig {
    #[serde(rename = "AcceptBackoffMax", with = "serde_secs")]
    /// Ceiling for the accept-loop retry backoff.
    pub accept_backoff_max: Duration,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.proxy.bind.is_empty(), "Bind must not be empty");
        ensure!(self.proxy.max_clients >= 1, "ProxyMaxClients must be >= 1");

        // A zero pipeline would deadlock the reader on its first send.
        if self.proxy.session_max_pipeline == 0 {
            self.proxy.session_max_pipeline = 1024;
        }

        self.proxy.backend_addrs.dedup();

        if self.runtime.accept_backoff_max.is_zero() {
            self.runtime.accept_backoff_max = Duration::from_secs(1);
        }

        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
