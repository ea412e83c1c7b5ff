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

//! Interactive terminal sessions.
//!
//! Drives one long-lived remote shell: local raw mode, pty allocation
//! with the local dimensions, resize propagation, periodic keepalive,
//! and raw byte passthrough between the local terminal and the channel.
//! Background tasks hold lifetime handles and are cancelled when the
//! session ends rather than leaking until process teardown.

use anyhow::{Context as _, Result};
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use std::io::Write;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::local_rc::RcPayload;
use super::terminal::{terminal_dimensions, TerminalStateGuard};
use crate::ssh::{Client, Connection, KEEPALIVE_INTERVAL};

/// Lifecycle of an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Init,
    PtyRequested,
    ShellStarted,
    Running,
    Closed,
    Errored,
}

/// Grace period for background tasks to observe cancellation.
const TASK_CLEANUP_TIMEOUT: Duration = Duration::from_millis(100);

/// One interactive shell on one target.
pub struct InteractiveSession {
    name: String,
    state: ShellState,
    rc: Option<RcPayload>,
}

impl InteractiveSession {
    pub fn new(name: impl Into<String>, rc: Option<RcPayload>) -> Self {
        Self {
            name: name.into(),
            state: ShellState::Init,
            rc,
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    /// Run the shell to completion, returning its exit status.
    ///
    /// The local terminal is restored on every exit path, including
    /// pty-request and shell-start failures.
    pub async fn run(&mut self, connection: &mut Connection) -> Result<u32> {
        let channel = connection
            .create_session()
            .await
            .with_context(|| format!("Failed to create session on {}", self.name))?;
        let client = connection
            .client()
            .cloned()
            .expect("connection is live after session creation");

        let guard = match TerminalStateGuard::new() {
            Ok(guard) => guard,
            Err(e) => {
                self.state = ShellState::Errored;
                return Err(e);
            }
        };
        let result = self.drive(channel, client).await;
        drop(guard);

        self.state = if result.is_ok() {
            ShellState::Closed
        } else {
            ShellState::Errored
        };
        result
    }

    async fn drive(&mut self, mut channel: Channel<Msg>, client: Client) -> Result<u32> {
        let (width, height) = terminal_dimensions();
        let term = std::env::var("TERM").unwrap_or_else(|_| "xterm".to_string());
        let modes = [
            (Pty::ECHO, 1),
            (Pty::TTY_OP_ISPEED, 14400),
            (Pty::TTY_OP_OSPEED, 14400),
        ];

        channel
            .request_pty(false, &term, width, height, 0, 0, &modes)
            .await
            .with_context(|| format!("Failed to request pty on {}", self.name))?;
        self.state = ShellState::PtyRequested;

        match &self.rc {
            Some(rc) => {
                let start_cmd = rc.shell_command();
                channel
                    .exec(true, start_cmd.as_str())
                    .await
                    .with_context(|| {
                        format!("Failed to start shell with local rc on {}", self.name)
                    })?;
            }
            None => {
                channel
                    .request_shell(false)
                    .await
                    .with_context(|| format!("Failed to start shell on {}", self.name))?;
            }
        }
        self.state = ShellState::ShellStarted;

        // Lifetime handles: both watchers end with the session, not
        // with the process.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let keepalive_task = spawn_keepalive(client, cancel_rx);

        let (resize_tx, mut resize_rx) = mpsc::channel::<(u32, u32)>(8);
        #[cfg(unix)]
        let resize_task = spawn_resize_watch(resize_tx, cancel_tx.subscribe());
        #[cfg(not(unix))]
        drop(resize_tx);

        self.state = ShellState::Running;

        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];
        let mut stdin_open = true;
        let mut exit_status: Option<u32> = None;

        loop {
            tokio::select! {
                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { ref data }) => {
                            write_terminal(data)?;
                        }
                        Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == 1 => {
                            write_terminal(data)?;
                        }
                        Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                            exit_status = Some(status);
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                read = stdin.read(&mut buf), if stdin_open => {
                    match read {
                        Ok(0) | Err(_) => {
                            stdin_open = false;
                            channel.eof().await.ok();
                        }
                        Ok(n) => {
                            if channel.data(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some((w, h)) = resize_rx.recv() => {
                    if let Err(e) = channel.window_change(w, h, 0, 0).await {
                        tracing::warn!("Failed to propagate resize to {}: {e}", self.name);
                    }
                }
            }
        }

        let _ = cancel_tx.send(true);
        let _ = tokio::time::timeout(TASK_CLEANUP_TIMEOUT, async {
            let _ = keepalive_task.await;
            #[cfg(unix)]
            let _ = resize_task.await;
        })
        .await;

        Ok(exit_status.unwrap_or(0))
    }
}

fn write_terminal(data: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout();
    stdout
        .write_all(data)
        .and_then(|()| stdout.flush())
        .context("Failed to write to local terminal")
}

/// Send a no-op round trip every 15 seconds for the session's lifetime.
fn spawn_keepalive(client: Client, mut cancel: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        ticker.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    client.send_keepalive().await;
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Watch for local terminal resizes and report the new dimensions.
#[cfg(unix)]
fn spawn_resize_watch(
    tx: mpsc::Sender<(u32, u32)>,
    mut cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigwinch = match signal(SignalKind::window_change()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Failed to register resize handler: {e}");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sigwinch.recv() => {
                    let _ = tx.try_send(terminal_dimensions());
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_in_init() {
        let session = InteractiveSession::new("web01", None);
        assert_eq!(session.state(), ShellState::Init);
    }

    #[tokio::test]
    async fn test_resize_watch_honors_cancellation() {
        // Lifetime-handle contract without a live connection: the task
        // must end promptly once cancelled.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, _rx) = mpsc::channel::<(u32, u32)>(1);
        #[cfg(unix)]
        {
            let task = spawn_resize_watch(tx, cancel_rx);
            cancel_tx.send(true).unwrap();
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .expect("resize watch should stop promptly")
                .unwrap();
        }
        #[cfg(not(unix))]
        {
            drop((cancel_tx, cancel_rx, tx));
        }
    }
}
