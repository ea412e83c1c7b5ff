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

//! Execution descriptor and top-level dispatch.
//!
//! A fully-populated [`Run`] is the single entry point: it validates
//! targets upfront, then either fans a command out across hosts or
//! starts one interactive shell. Per-host runtime failures are reported
//! and isolated; only upfront validation failures abort the run.

use anyhow::{ensure, Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::exec::{OutputSink, ParallelExecutor};
use crate::pty::{InteractiveSession, RcPayload};
use crate::ssh::Connection;

/// Everything one invocation needs, resolved before any dial.
pub struct Run {
    pub targets: Vec<String>,
    pub config: Arc<Config>,
    pub parallel: bool,
    pub command: Vec<String>,
    pub stdin_data: Option<Vec<u8>>,
    pub x11: bool,
    pub force_tty: bool,
    pub use_local_rc: bool,
}

impl Run {
    /// Run to completion. Output and errors go to the standard streams.
    pub async fn start(self) -> Result<()> {
        ensure!(!self.targets.is_empty(), "No target hosts given");

        // Upfront validation: every target must resolve before the
        // first connection attempt.
        let resolved = self.config.resolve_targets(&self.targets)?;

        if self.command.is_empty() {
            self.start_shell(&resolved[0].0).await
        } else {
            self.start_command().await
        }
    }

    async fn start_command(&self) -> Result<()> {
        tracing::info!(
            "Running `{}` on {} host(s)",
            self.command.join(" "),
            self.targets.len()
        );

        let executor = ParallelExecutor::new(
            self.targets.clone(),
            Arc::clone(&self.config),
            self.parallel,
            self.command.clone(),
        )
        .with_stdin_data(self.stdin_data.clone())
        .with_x11(self.x11)
        .with_force_tty(self.force_tty);

        let prefixed = self.targets.len() > 1;
        let make_sink = move |_index: usize, name: &str| -> Box<dyn OutputSink> {
            Box::new(StdoutSink {
                prefix: prefixed.then(|| name.to_string()),
            })
        };

        executor.execute(&make_sink).await
    }

    async fn start_shell(&self, name: &str) -> Result<()> {
        ensure!(
            self.targets.len() == 1,
            "An interactive shell connects to exactly one host ({} given)",
            self.targets.len()
        );

        let server = self.config.resolve_server(name)?;
        let rc = if self.use_local_rc || server.local_rc.is_some() {
            let rc_path = server.local_rc.clone().unwrap_or_else(|| "~/.bashrc".to_string());
            Some(
                RcPayload::load(Path::new(&rc_path), server.local_rc_decode_cmd.clone())
                    .with_context(|| format!("Failed to prepare local rc for {name}"))?,
            )
        } else {
            None
        };

        let mut connection = Connection::new(name, Arc::clone(&self.config))?;
        let mut session = InteractiveSession::new(name, rc);
        let status = session.run(&mut connection).await?;
        if status != 0 {
            tracing::warn!("Shell on {name} exited with status {status}");
        }
        Ok(())
    }
}

/// Default line renderer: raw lines, prefixed with the host name when
/// more than one host runs.
struct StdoutSink {
    prefix: Option<String>,
}

impl OutputSink for StdoutSink {
    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        let mut stdout = std::io::stdout().lock();
        if let Some(prefix) = &self.prefix {
            write!(stdout, "{prefix} :: ")?;
        }
        stdout.write_all(line)?;
        if !line.ends_with(b"\n") {
            stdout.write_all(b"\n")?;
        }
        stdout.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_targets(targets: Vec<String>) -> Run {
        Run {
            targets,
            config: Arc::new(Config::default()),
            parallel: false,
            command: vec!["true".to_string()],
            stdin_data: None,
            x11: false,
            force_tty: false,
            use_local_rc: false,
        }
    }

    #[tokio::test]
    async fn test_no_targets_fails_upfront() {
        let err = run_with_targets(vec![]).start().await.unwrap_err();
        assert!(err.to_string().contains("No target hosts"));
    }

    #[tokio::test]
    async fn test_unknown_target_fails_before_any_dial() {
        let err = run_with_targets(vec!["ghost".to_string()])
            .start()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
