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

//! Local-rc injection for remote shells.
//!
//! Instead of pre-staging an rc file on the remote host, the local
//! script travels inline as a base64 payload; the remote shell decodes
//! it through process substitution and sources the result.

use anyhow::{Context, Result};
use base64::Engine;
use std::path::Path;

use crate::utils::expand_tilde;

/// An encoded rc script ready for injection into a shell start.
#[derive(Debug, Clone)]
pub struct RcPayload {
    encoded: String,
    decode_cmd: Option<String>,
}

impl RcPayload {
    /// Read and encode a local rc file.
    pub fn load(path: &Path, decode_cmd: Option<String>) -> Result<Self> {
        let expanded = expand_tilde(path);
        let content = std::fs::read(&expanded)
            .with_context(|| format!("Failed to read local rc file {}", expanded.display()))?;
        Ok(Self::from_bytes(&content, decode_cmd))
    }

    pub fn from_bytes(content: &[u8], decode_cmd: Option<String>) -> Self {
        Self {
            encoded: base64::engine::general_purpose::STANDARD.encode(content),
            decode_cmd,
        }
    }

    /// The remote command line starting an interactive shell that
    /// sources the decoded payload.
    ///
    /// Without a configured decoder the command probes whether the
    /// remote `base64` is coreutils (`-d`) or BSD (`-D`).
    pub fn shell_command(&self) -> String {
        match &self.decode_cmd {
            Some(cmd) => format!(
                "bash --rcfile <(echo {} | {})",
                self.encoded, cmd
            ),
            None => format!(
                "bash --rcfile <(echo {}|((base64 --help | grep -q coreutils) && base64 -d <(cat) || base64 -D <(cat) ))",
                self.encoded
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_with_auto_probe() {
        let payload = RcPayload::from_bytes(b"export PS1='% '\n", None);
        let cmd = payload.shell_command();
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"export PS1='% '\n");

        assert!(cmd.starts_with("bash --rcfile <("));
        assert!(cmd.contains(&encoded));
        assert!(cmd.contains("base64 -d <(cat)"));
        assert!(cmd.contains("base64 -D <(cat)"));
    }

    #[test]
    fn test_shell_command_with_configured_decoder() {
        let payload =
            RcPayload::from_bytes(b"alias ll='ls -l'\n", Some("openssl base64 -d".to_string()));
        let cmd = payload.shell_command();
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"alias ll='ls -l'\n");

        assert_eq!(
            cmd,
            format!("bash --rcfile <(echo {encoded} | openssl base64 -d)")
        );
    }

    #[test]
    fn test_load_missing_file_fails_with_path() {
        let err = RcPayload::load(Path::new("/nonexistent/rc"), None).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rc"));
    }

    #[test]
    fn test_load_encodes_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bashrc");
        std::fs::write(&path, "export EDITOR=vim\n").unwrap();

        let payload = RcPayload::load(&path, None).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode("export EDITOR=vim\n");
        assert!(payload.shell_command().contains(&encoded));
    }
}
