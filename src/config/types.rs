// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Main configuration structure.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// SSH-reachable servers, addressable as targets or as intermediate hops.
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,

    /// Tunnel-kind proxies (http/https/socks5). These cannot chain further.
    #[serde(default)]
    pub proxies: HashMap<String, ProxyConfig>,
}

/// Global default settings merged into every server record.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Defaults {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub ssh_key: Option<String>,
}

/// A single server record.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ServerConfig {
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    /// Path to the identity file used for public-key authentication.
    #[serde(default)]
    pub ssh_key: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Try identities offered by the local ssh-agent.
    #[serde(default = "default_true")]
    pub use_agent: bool,

    /// Name of the server or proxy entry this host is reached through.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Verify the server host key against the default known_hosts file.
    /// Off by default; enabling it rejects unknown or changed keys.
    #[serde(default)]
    pub check_host_key: bool,

    /// Request X11 forwarding on command sessions.
    #[serde(default)]
    pub x11: bool,

    /// Allocate a pty for command execution on this host.
    #[serde(default)]
    pub pty: bool,

    /// Local rc file sourced by interactive shells on this host.
    #[serde(default)]
    pub local_rc: Option<String>,

    /// Remote command used to decode the transmitted rc payload.
    /// When unset the shell probes for a usable `base64 -d`/`-D`.
    #[serde(default)]
    pub local_rc_decode_cmd: Option<String>,
}

/// A tunnel-kind proxy record.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// Tunneling protocol spoken by a proxy entry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Https,
    Socks5,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Http => write!(f, "http"),
            ProxyKind::Https => write!(f, "https"),
            ProxyKind::Socks5 => write!(f, "socks5"),
        }
    }
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Merge global defaults into this record, field by field.
    pub fn with_defaults(mut self, defaults: &Defaults) -> Self {
        if self.user.is_none() {
            self.user = defaults.user.clone();
        }
        if self.port.is_none() {
            self.port = defaults.port;
        }
        if self.ssh_key.is_none() {
            self.ssh_key = defaults.ssh_key.clone();
        }
        self
    }

    /// Effective port, falling back to the SSH default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(22)
    }

    /// Effective username, falling back to the local user.
    pub fn effective_user(&self) -> String {
        self.user
            .clone()
            .unwrap_or_else(crate::utils::current_username)
    }
}
