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

//! SSH client wrapper over a russh connection handle.
//!
//! A [`Client`] owns one authenticated transport to a host. It is cheap
//! to clone (the handle is reference counted) and serves as the base for
//! session channels, direct-tcpip tunnels to further hops, and liveness
//! probes.

use russh::client::{Config, Handle, Handler, Msg};
use russh::Channel;
use std::fmt::Debug;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

use super::auth::{authenticate, AuthMethod};
use super::error::Error;

/// Interval between transport keepalive packets. Matches the custom
/// keepalive cadence sent on interactive sessions.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Fixed connect timeout for every dial.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound for one liveness round trip.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How a server host key is verified on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCheckMethod {
    /// Accept any host key. The historical default; opt out per server
    /// with `check_host_key: true`.
    NoCheck,
    /// Check against the user's default known_hosts file.
    DefaultKnownHostsFile,
}

impl ServerCheckMethod {
    pub fn for_server(check_host_key: bool) -> Self {
        if check_host_key {
            Self::DefaultKnownHostsFile
        } else {
            Self::NoCheck
        }
    }
}

/// A ssh connection to a remote server.
#[derive(Clone)]
pub struct Client {
    handle: Arc<Handle<ClientHandler>>,
    username: String,
    host: String,
    port: u16,
}

fn client_config() -> Config {
    Config {
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        ..Default::default()
    }
}

impl Client {
    /// Open a ssh connection to a remote host over TCP.
    ///
    /// Every resolved address is attempted in turn; authentication runs
    /// on the first successful connection and aborts the whole attempt
    /// if no method is accepted.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        methods: &[AuthMethod],
        server_check: ServerCheckMethod,
    ) -> Result<Self, Error> {
        let config = Arc::new(client_config());

        let socket_addrs = (host, port)
            .to_socket_addrs()
            .map_err(Error::AddressInvalid)?;
        let mut connect_res = Err(Error::AddressInvalid(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "could not resolve to any addresses",
        )));
        for socket_addr in socket_addrs {
            let handler = ClientHandler {
                hostname: host.to_string(),
                port,
                server_check,
            };
            let attempt = tokio::time::timeout(
                CONNECT_TIMEOUT,
                russh::client::connect(config.clone(), socket_addr, handler),
            )
            .await
            .map_err(|_| Error::ConnectTimeout(CONNECT_TIMEOUT))?;
            match attempt {
                Ok(handle) => {
                    connect_res = Ok(handle);
                    break;
                }
                Err(e) => connect_res = Err(e.into()),
            }
        }
        let mut handle = connect_res?;

        authenticate(&mut handle, username, host, methods).await?;

        Ok(Self {
            handle: Arc::new(handle),
            username: username.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Open a ssh connection over an already-established stream, layering
    /// a fresh handshake on top of a tunnel.
    pub async fn connect_over_stream<S>(
        stream: S,
        host: &str,
        port: u16,
        username: &str,
        methods: &[AuthMethod],
        server_check: ServerCheckMethod,
    ) -> Result<Self, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let config = Arc::new(client_config());
        let handler = ClientHandler {
            hostname: host.to_string(),
            port,
            server_check,
        };

        let handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            russh::client::connect_stream(config, stream, handler),
        )
        .await
        .map_err(|_| Error::ConnectTimeout(CONNECT_TIMEOUT))??;

        let mut handle = handle;
        authenticate(&mut handle, username, host, methods).await?;

        Ok(Self {
            handle: Arc::new(handle),
            username: username.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Open a new session channel for one command or shell.
    pub async fn open_session(&self) -> Result<Channel<Msg>, Error> {
        self.handle
            .channel_open_session()
            .await
            .map_err(Error::Ssh)
    }

    /// Open a `direct-tcpip` channel towards the next hop or target.
    pub async fn open_direct_tcpip(
        &self,
        target_host: &str,
        target_port: u16,
    ) -> Result<Channel<Msg>, Error> {
        self.handle
            .channel_open_direct_tcpip(
                target_host,
                u32::from(target_port),
                "127.0.0.1",
                0,
            )
            .await
            .map_err(Error::Ssh)
    }

    /// One no-op round trip confirming the transport still answers.
    ///
    /// Any server response counts as liveness, including a refusal;
    /// only transport-level errors and timeouts mean the connection is
    /// gone. This mirrors want-reply keepalive semantics where an
    /// "unsupported request" acknowledgment is still an acknowledgment.
    pub async fn check_alive(&self) -> Result<(), Error> {
        match tokio::time::timeout(PROBE_TIMEOUT, self.handle.channel_open_session()).await {
            Ok(Ok(channel)) => {
                let _ = channel.close().await;
                Ok(())
            }
            Ok(Err(err)) => {
                if self.handle.is_closed() {
                    Err(err.into())
                } else {
                    // The server answered, even if it refused the channel.
                    tracing::trace!("Liveness probe refused but answered: {err}");
                    Ok(())
                }
            }
            Err(_) => Err(Error::ProbeTimeout(PROBE_TIMEOUT)),
        }
    }

    /// Fire one keepalive round trip, ignoring refusals.
    pub async fn send_keepalive(&self) {
        if let Err(e) = self.check_alive().await {
            tracing::debug!("Keepalive to {} failed: {e}", self.host);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
            .map_err(Error::Ssh)
    }
}

impl Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("username", &self.username)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("handle", &"Handle<ClientHandler>")
            .finish()
    }
}

/// SSH client handler implementing host key verification.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    port: u16,
    server_check: ServerCheckMethod,
}

impl ClientHandler {
    pub fn new(hostname: String, port: u16, server_check: ServerCheckMethod) -> Self {
        Self {
            hostname,
            port,
            server_check,
        }
    }
}

impl Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.server_check {
            ServerCheckMethod::NoCheck => Ok(true),
            ServerCheckMethod::DefaultKnownHostsFile => {
                let result = russh::keys::check_known_hosts(
                    &self.hostname,
                    self.port,
                    server_public_key,
                )
                .map_err(|_| Error::ServerCheckFailed)?;

                Ok(result)
            }
        }
    }
}
