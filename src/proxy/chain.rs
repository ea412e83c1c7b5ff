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

//! Proxy chain resolution.
//!
//! A target may be reached through a chain of intermediate hops: SSH
//! servers that are themselves dialed through *their* proxy reference,
//! terminated at most by one tunnel-kind (http/https/socks5) proxy. The
//! resolver walks backward from the target, collecting hops, then
//! reverses the list so the result reads in dial order.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::fmt;

use crate::config::{Config, ProxyKind};

/// One intermediate endpoint on the way to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub name: String,
    pub kind: HopKind,
}

/// How a hop is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopKind {
    /// An intermediate SSH server; the next leg is tunneled through a
    /// direct-tcpip channel on its connection.
    Ssh,
    /// A tunnel-kind proxy. Such hops cannot chain further and therefore
    /// only ever appear first in dial order.
    Tunnel(ProxyKind),
}

impl fmt::Display for HopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HopKind::Ssh => write!(f, "ssh"),
            HopKind::Tunnel(kind) => write!(f, "{kind}"),
        }
    }
}

impl Hop {
    pub fn new(name: impl Into<String>, kind: HopKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Resolve the hop chain needed to reach `target`.
///
/// The returned list is ordered dial-first to target-adjacent-last; an
/// empty list means a direct dial. Referenced names that resolve to
/// neither a server nor a proxy entry fail with a "proxy not found"
/// error, and cyclic references are rejected rather than walked forever.
pub fn resolve_chain(target: &str, config: &Config) -> Result<Vec<Hop>> {
    let mut hops = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(target.to_string());

    let mut current = match config.servers.get(target) {
        Some(server) => server,
        None => bail!("Not found server: {target}"),
    };

    while let Some(proxy_name) = current.proxy.as_deref() {
        if !visited.insert(proxy_name.to_string()) {
            bail!("Proxy loop detected at: {proxy_name}");
        }

        if let Some(proxy) = config.proxies.get(proxy_name) {
            // Tunnel-kind proxies terminate the walk.
            hops.push(Hop::new(proxy_name, HopKind::Tunnel(proxy.kind)));
            break;
        }

        match config.servers.get(proxy_name) {
            Some(server) => {
                hops.push(Hop::new(proxy_name, HopKind::Ssh));
                current = server;
            }
            None => bail!("Not found proxy: {proxy_name}"),
        }
    }

    // Collected walking backward from the target; dial order is the reverse.
    hops.reverse();
    Ok(hops)
}

/// Human-readable dial path, used when announcing a connection.
pub fn path_description(target: &str, hops: &[Hop]) -> String {
    if hops.is_empty() {
        format!("direct connection to {target}")
    } else {
        let chain: Vec<String> = hops
            .iter()
            .map(|hop| format!("{} ({})", hop.name, hop.kind))
            .collect();
        format!("{} -> {target}", chain.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyConfig, ServerConfig};

    fn server(host: &str, proxy: Option<&str>) -> ServerConfig {
        ServerConfig {
            host: host.to_string(),
            proxy: proxy.map(str::to_string),
            ..Default::default()
        }
    }

    fn socks5(host: &str) -> ProxyConfig {
        ProxyConfig {
            kind: ProxyKind::Socks5,
            host: host.to_string(),
            port: 1080,
            user: None,
            password: None,
        }
    }

    #[test]
    fn test_direct_target_has_empty_chain() {
        let mut config = Config::default();
        config
            .servers
            .insert("web01".to_string(), server("10.0.0.11", None));

        let hops = resolve_chain("web01", &config).unwrap();
        assert!(hops.is_empty());
    }

    #[test]
    fn test_single_ssh_hop() {
        let mut config = Config::default();
        config
            .servers
            .insert("web01".to_string(), server("10.0.0.11", Some("bastion")));
        config
            .servers
            .insert("bastion".to_string(), server("bastion.example.com", None));

        let hops = resolve_chain("web01", &config).unwrap();
        assert_eq!(hops, vec![Hop::new("bastion", HopKind::Ssh)]);
    }

    #[test]
    fn test_ssh_hop_behind_socks5_is_dialed_after_the_tunnel() {
        // target -> A (ssh server) -> B (socks5 proxy); dial order is B, A.
        let mut config = Config::default();
        config
            .servers
            .insert("target".to_string(), server("10.0.0.20", Some("a")));
        config
            .servers
            .insert("a".to_string(), server("a.example.com", Some("b")));
        config.proxies.insert("b".to_string(), socks5("b.example.com"));

        let hops = resolve_chain("target", &config).unwrap();
        assert_eq!(
            hops,
            vec![
                Hop::new("b", HopKind::Tunnel(ProxyKind::Socks5)),
                Hop::new("a", HopKind::Ssh),
            ]
        );
    }

    #[test]
    fn test_chain_of_ssh_hops_preserves_dial_order() {
        // target -> hop2 -> hop1; dial order is hop1, hop2.
        let mut config = Config::default();
        config
            .servers
            .insert("target".to_string(), server("10.0.0.30", Some("hop2")));
        config
            .servers
            .insert("hop2".to_string(), server("hop2.example.com", Some("hop1")));
        config
            .servers
            .insert("hop1".to_string(), server("hop1.example.com", None));

        let hops = resolve_chain("target", &config).unwrap();
        let names: Vec<&str> = hops.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["hop1", "hop2"]);
        assert!(hops.iter().all(|h| h.kind == HopKind::Ssh));
    }

    #[test]
    fn test_unknown_proxy_reference_fails() {
        let mut config = Config::default();
        config
            .servers
            .insert("web01".to_string(), server("10.0.0.11", Some("ghost")));

        let err = resolve_chain("web01", &config).unwrap_err();
        assert!(err.to_string().contains("Not found proxy"));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unknown_target_fails() {
        let config = Config::default();
        let err = resolve_chain("web01", &config).unwrap_err();
        assert!(err.to_string().contains("Not found server"));
    }

    #[test]
    fn test_proxy_cycle_is_rejected() {
        let mut config = Config::default();
        config
            .servers
            .insert("a".to_string(), server("a.example.com", Some("b")));
        config
            .servers
            .insert("b".to_string(), server("b.example.com", Some("a")));

        let err = resolve_chain("a", &config).unwrap_err();
        assert!(err.to_string().contains("Proxy loop"));
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let mut config = Config::default();
        config
            .servers
            .insert("a".to_string(), server("a.example.com", Some("a")));

        let err = resolve_chain("a", &config).unwrap_err();
        assert!(err.to_string().contains("Proxy loop"));
    }

    #[test]
    fn test_path_description() {
        let hops = vec![
            Hop::new("gw", HopKind::Tunnel(ProxyKind::Socks5)),
            Hop::new("bastion", HopKind::Ssh),
        ];
        assert_eq!(
            path_description("web01", &hops),
            "gw (socks5) -> bastion (ssh) -> web01"
        );
        assert_eq!(path_description("web01", &[]), "direct connection to web01");
    }
}
