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

//! Error types for the SSH transport layer.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while dialing, authenticating or probing connections.
#[derive(Debug, Error)]
pub enum Error {
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("Invalid address: {0}")]
    AddressInvalid(#[source] io::Error),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Wrong password")]
    PasswordWrong,

    #[error("Key authentication failed")]
    KeyAuthFailed,

    #[error("Invalid key: {0}")]
    KeyInvalid(#[source] russh::keys::Error),

    #[error("SSH agent connection failed")]
    AgentConnectionFailed,

    #[error("No identities available in SSH agent")]
    AgentNoIdentities,

    #[error("No authentication method accepted for {user}@{host}")]
    NoAuthMethodAccepted { user: String, host: String },

    #[error("Server host key verification failed")]
    ServerCheckFailed,

    #[error("Liveness probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("Proxy handshake with {proxy} failed: {reason}")]
    ProxyHandshake { proxy: String, reason: String },

    #[error("Command did not report an exit status")]
    CommandDidntExit,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
