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

//! Multi-host command execution.
//!
//! One execution task and one output consumer run per target host. In
//! parallel mode all hosts run concurrently and output interleaves at
//! line granularity; in sequential mode each host runs and drains to
//! completion before the next starts. A failure on one host never
//! aborts the others.

use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::broadcast::{spawn_stdin_copy, BroadcastInput};
use super::session::{CommandSession, OutputLine, SessionInput};
use crate::config::Config;
use crate::ssh::Connection;

/// Per-host line renderer, supplied by the caller. Prefixing and color
/// are its concern, not the executor's.
pub trait OutputSink: Send {
    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()>;
}

/// Builds the sink for one host, by index and name.
pub type SinkFactory = dyn Fn(usize, &str) -> Box<dyn OutputSink> + Send + Sync;

/// Bounded per-host output stream. Large enough to smooth bursts
/// without letting one host buffer unbounded output.
const OUTPUT_CHANNEL_SIZE: usize = 1024;

/// Per-host stdin feed depth.
const INPUT_CHANNEL_SIZE: usize = 64;

/// Executor fanning one command out across target hosts.
pub struct ParallelExecutor {
    targets: Vec<String>,
    config: Arc<Config>,
    parallel: bool,
    command: Vec<String>,
    stdin_data: Option<Vec<u8>>,
    x11: bool,
    force_tty: bool,
}

impl ParallelExecutor {
    pub fn new(
        targets: Vec<String>,
        config: Arc<Config>,
        parallel: bool,
        command: Vec<String>,
    ) -> Self {
        Self {
            targets,
            config,
            parallel,
            command,
            stdin_data: None,
            x11: false,
            force_tty: false,
        }
    }

    /// Supply piped stdin bytes. Disables input broadcasting.
    pub fn with_stdin_data(mut self, stdin_data: Option<Vec<u8>>) -> Self {
        self.stdin_data = stdin_data;
        self
    }

    /// Request X11 forwarding on every session.
    pub fn with_x11(mut self, x11: bool) -> Self {
        self.x11 = x11;
        self
    }

    /// Allocate a pty for the command on every host, regardless of
    /// per-server configuration.
    pub fn with_force_tty(mut self, force_tty: bool) -> Self {
        self.force_tty = force_tty;
        self
    }

    /// Run the command on all targets and block until every host has
    /// reported finished.
    pub async fn execute(&self, make_sink: &SinkFactory) -> Result<()> {
        anyhow::ensure!(!self.targets.is_empty(), "No target hosts");

        if self.parallel || self.targets.len() == 1 {
            self.execute_concurrent(make_sink).await
        } else {
            self.execute_sequential(make_sink).await
        }
    }

    async fn execute_concurrent(&self, make_sink: &SinkFactory) -> Result<()> {
        let count = self.targets.len();
        // Input broadcast only when nothing is piped in.
        let broadcast_active = self.stdin_data.is_none();

        let (finished_tx, mut finished_rx) = mpsc::channel::<()>(count);
        let (writer_tx, mut writer_rx) = mpsc::channel::<mpsc::Sender<Vec<u8>>>(count);
        let mut consumers = Vec::with_capacity(count);

        for (index, name) in self.targets.iter().enumerate() {
            let (output_tx, mut output_rx) = mpsc::channel::<OutputLine>(OUTPUT_CHANNEL_SIZE);
            let mut sink = make_sink(index, name);

            let host = HostTask {
                name: name.clone(),
                config: Arc::clone(&self.config),
                command: self.command.clone(),
                stdin_data: self.stdin_data.clone(),
                x11: self.x11,
                force_tty: self.force_tty,
                publish: broadcast_active.then(|| writer_tx.clone()),
            };
            let finished_tx = finished_tx.clone();
            tokio::spawn(async move {
                host.run(output_tx).await;
                let _ = finished_tx.send(()).await;
            });

            let name = name.clone();
            consumers.push(tokio::spawn(async move {
                while let Some(line) = output_rx.recv().await {
                    if let Err(e) = sink.write_line(&line) {
                        tracing::error!("Failed to render output for {name}: {e}");
                        break;
                    }
                }
            }));
        }
        drop(finished_tx);
        drop(writer_tx);

        // Collect one published input handle per host that reached its
        // session, then copy local stdin into all of them. Hosts that
        // failed before publishing just drop their slot.
        let (stop_tx, stop_rx) = watch::channel(false);
        let copy_task = if broadcast_active {
            let mut writers = Vec::with_capacity(count);
            while let Some(writer) = writer_rx.recv().await {
                writers.push(writer);
            }
            (!writers.is_empty())
                .then(|| spawn_stdin_copy(BroadcastInput::new(writers), stop_rx))
        } else {
            None
        };

        // Exactly one finished signal per host, success or failure.
        let mut finished = 0usize;
        while finished < count {
            match finished_rx.recv().await {
                Some(()) => finished += 1,
                None => break,
            }
        }

        let _ = stop_tx.send(true);
        if let Some(task) = copy_task {
            let _ = task.await;
        }
        join_all(consumers).await;

        Ok(())
    }

    async fn execute_sequential(&self, make_sink: &SinkFactory) -> Result<()> {
        for (index, name) in self.targets.iter().enumerate() {
            let (output_tx, mut output_rx) = mpsc::channel::<OutputLine>(OUTPUT_CHANNEL_SIZE);
            let mut sink = make_sink(index, name);

            let host = HostTask {
                name: name.clone(),
                config: Arc::clone(&self.config),
                command: self.command.clone(),
                stdin_data: self.stdin_data.clone(),
                x11: self.x11,
                force_tty: self.force_tty,
                publish: None,
            };

            // Host i drains fully before host i+1 starts.
            let drain = async {
                while let Some(line) = output_rx.recv().await {
                    if let Err(e) = sink.write_line(&line) {
                        tracing::error!("Failed to render output for {name}: {e}");
                        break;
                    }
                }
            };
            tokio::join!(host.run(output_tx), drain);
        }

        Ok(())
    }
}

/// One host's execution: connect, create a session, stream the command.
struct HostTask {
    name: String,
    config: Arc<Config>,
    command: Vec<String>,
    stdin_data: Option<Vec<u8>>,
    x11: bool,
    force_tty: bool,
    publish: Option<mpsc::Sender<mpsc::Sender<Vec<u8>>>>,
}

impl HostTask {
    async fn run(self, output: mpsc::Sender<OutputLine>) {
        let name = self.name.clone();
        match self.try_run(output).await {
            Ok(0) => {}
            Ok(status) => {
                tracing::error!("Command on {name} exited with status {status}");
            }
            Err(e) => {
                // Dropping the output sender already closed this host's
                // stream; siblings keep running.
                tracing::error!("{name}: {e:#}");
            }
        }
    }

    async fn try_run(self, output: mpsc::Sender<OutputLine>) -> Result<u32> {
        let mut connection = Connection::new(&self.name, Arc::clone(&self.config))?;
        let channel = connection.create_session().await?;
        let server = connection.server();

        let session = CommandSession::new(
            channel,
            &self.name,
            self.force_tty || server.pty,
            self.x11 || server.x11,
        );

        let input = if let Some(data) = self.stdin_data {
            SessionInput::Piped(data)
        } else if let Some(publish) = self.publish {
            let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_SIZE);
            let _ = publish.send(input_tx).await;
            SessionInput::Broadcast(input_rx)
        } else {
            SessionInput::None
        };

        session.run(&self.command, input, output).await
    }
}
