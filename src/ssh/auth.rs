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

//! Authentication method selection and negotiation.
//!
//! A server record yields an ordered list of methods (agent identities,
//! configured key file, password); the first one the server accepts wins.

use russh::client::Handle;
use std::path::PathBuf;
use zeroize::Zeroizing;

use super::client::ClientHandler;
use super::error::Error;
use crate::config::ServerConfig;
use crate::utils::expand_tilde;

/// An authentication token tried against a server.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// All identities currently held by the local ssh-agent.
    Agent,
    /// A private key file, with an optional passphrase.
    PrivateKeyFile {
        key_file_path: PathBuf,
        key_pass: Option<Zeroizing<String>>,
    },
    Password(Zeroizing<String>),
}

/// Build the ordered method list for a server record.
pub fn auth_methods(server: &ServerConfig) -> Vec<AuthMethod> {
    let mut methods = Vec::new();

    if server.use_agent {
        methods.push(AuthMethod::Agent);
    }
    if let Some(key) = &server.ssh_key {
        methods.push(AuthMethod::PrivateKeyFile {
            key_file_path: expand_tilde(std::path::Path::new(key)),
            key_pass: None,
        });
    }
    if let Some(password) = &server.password {
        methods.push(AuthMethod::Password(Zeroizing::new(password.clone())));
    }

    methods
}

/// Try each method in order against an established handle.
///
/// Returns on the first accepted method; only when every method is
/// rejected does the whole attempt fail.
pub async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    host: &str,
    methods: &[AuthMethod],
) -> Result<(), Error> {
    for method in methods {
        match try_method(handle, username, method).await {
            Ok(true) => return Ok(()),
            Ok(false) => continue,
            Err(e) => {
                tracing::debug!("Authentication method failed for {username}@{host}: {e}");
                continue;
            }
        }
    }

    Err(Error::NoAuthMethodAccepted {
        user: username.to_string(),
        host: host.to_string(),
    })
}

async fn try_method(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    method: &AuthMethod,
) -> Result<bool, Error> {
    match method {
        AuthMethod::Password(password) => {
            let result = handle.authenticate_password(username, &***password).await?;
            Ok(result.success())
        }
        AuthMethod::PrivateKeyFile {
            key_file_path,
            key_pass,
        } => {
            let key =
                russh::keys::load_secret_key(key_file_path, key_pass.as_ref().map(|p| &***p))
                    .map_err(Error::KeyInvalid)?;
            let result = handle
                .authenticate_publickey(
                    username,
                    russh::keys::PrivateKeyWithHashAlg::new(
                        std::sync::Arc::new(key),
                        handle.best_supported_rsa_hash().await?.flatten(),
                    ),
                )
                .await?;
            Ok(result.success())
        }
        AuthMethod::Agent => {
            let mut agent = russh::keys::agent::client::AgentClient::connect_env()
                .await
                .map_err(|_| Error::AgentConnectionFailed)?;

            let identities = agent
                .request_identities()
                .await
                .map_err(|_| Error::AgentNoIdentities)?;
            if identities.is_empty() {
                return Err(Error::AgentNoIdentities);
            }

            for identity in identities {
                let result = handle
                    .authenticate_publickey_with(
                        username,
                        identity.clone(),
                        handle.best_supported_rsa_hash().await?.flatten(),
                        &mut agent,
                    )
                    .await;

                if let Ok(auth_result) = result {
                    if auth_result.success() {
                        return Ok(true);
                    }
                }
            }

            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_methods_order_agent_key_password() {
        let server = ServerConfig {
            host: "example.com".to_string(),
            ssh_key: Some("~/.ssh/id_ed25519".to_string()),
            password: Some("hunter2".to_string()),
            use_agent: true,
            ..Default::default()
        };

        let methods = auth_methods(&server);
        assert_eq!(methods.len(), 3);
        assert!(matches!(methods[0], AuthMethod::Agent));
        assert!(matches!(methods[1], AuthMethod::PrivateKeyFile { .. }));
        assert!(matches!(methods[2], AuthMethod::Password(_)));
    }

    #[test]
    fn test_auth_methods_without_agent() {
        let server = ServerConfig {
            host: "example.com".to_string(),
            password: Some("hunter2".to_string()),
            use_agent: false,
            ..Default::default()
        };

        let methods = auth_methods(&server);
        assert_eq!(methods.len(), 1);
        assert!(matches!(methods[0], AuthMethod::Password(_)));
    }
}
