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

//! Connection lifecycle for one target.
//!
//! A [`Connection`] owns at most one live transport to its target,
//! established through the resolved hop chain. Session creation is the
//! sole trigger of the state machine: a `Live` connection is probed
//! before every new session and rebuilt once when the probe fails.

use anyhow::{Context, Result};
use russh::client::Msg;
use russh::Channel;
use std::sync::Arc;

use super::auth::auth_methods;
use super::client::{Client, ServerCheckMethod};
use super::dialer::dial_via_proxy;
use crate::config::{Config, ServerConfig};
use crate::proxy::{path_description, resolve_chain, Hop, HopKind};

/// Lifecycle state of a connection.
#[derive(Debug, Default)]
pub enum ConnectionState {
    /// No transport yet; the first session creation dials.
    #[default]
    Unconnected,
    /// An authenticated transport, plus the hop clients keeping the
    /// tunnel path alive underneath it.
    Live {
        client: Client,
        hop_clients: Vec<Client>,
    },
    /// A probe failed; the next step is a rebuild.
    Stale,
}

impl ConnectionState {
    fn name(&self) -> &'static str {
        match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Live { .. } => "live",
            ConnectionState::Stale => "stale",
        }
    }
}

/// One lazily-dialed, reusable connection to a named target.
///
/// Never shared across concurrent command executions; each execution
/// task owns its own `Connection` and derives per-command sessions
/// from it.
pub struct Connection {
    name: String,
    server: ServerConfig,
    config: Arc<Config>,
    state: ConnectionState,
}

impl Connection {
    /// Resolve the target name against the configuration. Fails upfront
    /// for unknown names, before any dial.
    pub fn new(name: &str, config: Arc<Config>) -> Result<Self> {
        let server = config.resolve_server(name)?;
        Ok(Self {
            name: name.to_string(),
            server,
            config,
            state: ConnectionState::Unconnected,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// The live client, if any. Used by long-lived sessions that manage
    /// their own keepalive.
    pub fn client(&self) -> Option<&Client> {
        match &self.state {
            ConnectionState::Live { client, .. } => Some(client),
            _ => None,
        }
    }

    /// Dial the target through its hop chain and authenticate.
    ///
    /// The freshly built transport replaces whatever the connection held
    /// before.
    pub async fn create_client(&mut self) -> Result<()> {
        let hops = resolve_chain(&self.name, &self.config)?;
        tracing::debug!("Connecting: {}", path_description(&self.name, &hops));

        let mut hop_clients: Vec<Client> = Vec::new();
        // A tunnel-kind hop only ever opens the path to the *next*
        // endpoint; it is pending until that endpoint is dialed.
        let mut pending_tunnel: Option<&Hop> = None;

        for hop in &hops {
            match hop.kind {
                HopKind::Tunnel(_) => {
                    pending_tunnel = Some(hop);
                }
                HopKind::Ssh => {
                    let hop_server = self
                        .config
                        .resolve_server(&hop.name)
                        .with_context(|| format!("Not found proxy: {}", hop.name))?;
                    let client = dial_endpoint(
                        &self.config,
                        &hop.name,
                        &hop_server,
                        pending_tunnel.take(),
                        hop_clients.last(),
                    )
                    .await
                    .with_context(|| format!("Failed to connect hop {}", hop.name))?;
                    hop_clients.push(client);
                }
            }
        }

        let client = dial_endpoint(
            &self.config,
            &self.name,
            &self.server,
            pending_tunnel.take(),
            hop_clients.last(),
        )
        .await
        .with_context(|| format!("Failed to connect {}", self.name))?;

        self.state = ConnectionState::Live {
            client,
            hop_clients,
        };
        Ok(())
    }

    /// Create a new session channel, dialing or rebuilding as needed.
    ///
    /// A `Live` connection is probed first; on probe failure it turns
    /// `Stale` and is rebuilt exactly once before the session is
    /// attempted. Rebuild errors propagate unswallowed.
    pub async fn create_session(&mut self) -> Result<Channel<Msg>> {
        if matches!(
            self.state,
            ConnectionState::Unconnected | ConnectionState::Stale
        ) {
            self.create_client().await?;
        }

        let probe_err = match &self.state {
            ConnectionState::Live { client, .. } => client.check_alive().await.err(),
            _ => None,
        };
        if let Some(probe_err) = probe_err {
            tracing::debug!(
                "Liveness probe failed for {}, rebuilding: {probe_err}",
                self.name
            );
            self.state = ConnectionState::Stale;
            self.create_client()
                .await
                .with_context(|| format!("Failed to rebuild stale connection to {}", self.name))?;
        }

        let ConnectionState::Live { client, .. } = &self.state else {
            unreachable!("connection is live after create_client");
        };

        let channel = client
            .open_session()
            .await
            .with_context(|| format!("Failed to open session on {}", self.name))?;
        Ok(channel)
    }
}

/// Dial one SSH endpoint, through whatever path reaches it: a pending
/// tunnel-kind proxy, the previous hop's transport, or directly.
async fn dial_endpoint(
    config: &Config,
    name: &str,
    server: &ServerConfig,
    pending_tunnel: Option<&Hop>,
    previous: Option<&Client>,
) -> Result<Client> {
    let methods = auth_methods(server);
    let check = ServerCheckMethod::for_server(server.check_host_key);
    let port = server.effective_port();
    let user = server.effective_user();

    if let Some(tunnel_hop) = pending_tunnel {
        let proxy = config
            .proxies
            .get(&tunnel_hop.name)
            .with_context(|| format!("Not found proxy: {}", tunnel_hop.name))?;
        let stream = dial_via_proxy(&tunnel_hop.name, proxy, &server.host, port)
            .await
            .with_context(|| {
                format!(
                    "Failed to tunnel through {} ({})",
                    tunnel_hop.name, proxy.kind
                )
            })?;
        let client =
            Client::connect_over_stream(stream, &server.host, port, &user, &methods, check)
                .await?;
        return Ok(client);
    }

    if let Some(previous) = previous {
        let channel = previous
            .open_direct_tcpip(&server.host, port)
            .await
            .with_context(|| {
                format!(
                    "Failed to open direct-tcpip channel to {name} via {}",
                    previous.host()
                )
            })?;
        let client = Client::connect_over_stream(
            channel.into_stream(),
            &server.host,
            port,
            &user,
            &methods,
            check,
        )
        .await?;
        return Ok(client);
    }

    let client = Client::connect(&server.host, port, &user, &methods, check).await?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(name: &str, server: ServerConfig) -> Arc<Config> {
        let mut config = Config::default();
        config.servers.insert(name.to_string(), server);
        Arc::new(config)
    }

    #[test]
    fn test_new_connection_starts_unconnected() {
        let config = config_with(
            "web01",
            ServerConfig {
                host: "10.0.0.11".to_string(),
                ..Default::default()
            },
        );
        let conn = Connection::new("web01", config).unwrap();
        assert_eq!(conn.state_name(), "unconnected");
        assert!(conn.client().is_none());
    }

    #[test]
    fn test_new_connection_unknown_target_fails_upfront() {
        let config = Arc::new(Config::default());
        assert!(Connection::new("ghost", config).is_err());
    }

    #[tokio::test]
    async fn test_create_session_propagates_dial_error() {
        // Port 1 on localhost refuses immediately; the error must carry
        // the target name and the connection must not be left live.
        let config = config_with(
            "dead",
            ServerConfig {
                host: "127.0.0.1".to_string(),
                port: Some(1),
                use_agent: false,
                password: Some("x".to_string()),
                ..Default::default()
            },
        );
        let mut conn = Connection::new("dead", config).unwrap();
        let err = conn.create_session().await.unwrap_err();
        assert!(err.to_string().contains("dead"));
        assert!(conn.client().is_none());
    }
}
