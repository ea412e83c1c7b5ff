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

//! One-shot command execution on a session channel.
//!
//! Combined stdout/stderr is split into terminator-preserving lines and
//! streamed to an output channel as data arrives; a trailing partial
//! line is flushed once after the command completes. Closing the output
//! channel (by dropping the sender on return) is the end-of-output
//! signal downstream.

use anyhow::{Context, Result};
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use tokio::sync::mpsc;

use crate::ssh::Error;

/// One line of combined remote output, trailing terminator included.
/// The final line of a stream may lack the terminator.
pub type OutputLine = Vec<u8>;

/// Where a session's stdin comes from.
pub enum SessionInput {
    /// Nothing is written; the remote sees EOF behavior of its shell.
    None,
    /// Piped bytes, written once and closed.
    Piped(Vec<u8>),
    /// A feed of chunks from the input broadcaster.
    Broadcast(mpsc::Receiver<Vec<u8>>),
}

/// Accumulates raw chunks and yields complete lines.
#[derive(Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line it produced.
    pub fn extend_and_split(&mut self, data: &[u8]) -> Vec<OutputLine> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            lines.push(std::mem::replace(&mut self.buf, rest));
        }
        lines
    }

    /// Remaining partial content, flushed once at end of stream.
    pub fn take_remainder(&mut self) -> Option<OutputLine> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

/// A command session bound to one channel on one target.
///
/// Sessions are never reused; the channel is consumed by [`run`].
///
/// [`run`]: CommandSession::run
pub struct CommandSession {
    channel: Channel<Msg>,
    host: String,
    want_tty: bool,
    x11: bool,
}

impl CommandSession {
    pub fn new(channel: Channel<Msg>, host: impl Into<String>, want_tty: bool, x11: bool) -> Self {
        Self {
            channel,
            host: host.into(),
            want_tty,
            x11,
        }
    }

    /// Execute `command` and stream its combined output as lines.
    ///
    /// Returns the remote exit status. A channel that closes without
    /// reporting one is a mid-command transport failure; lines already
    /// streamed stay delivered.
    pub async fn run(
        mut self,
        command: &[String],
        input: SessionInput,
        output: mpsc::Sender<OutputLine>,
    ) -> Result<u32> {
        if self.want_tty {
            self.request_tty()
                .await
                .with_context(|| format!("Failed to request pty on {}", self.host))?;
        }

        if self.x11 {
            // Data path of the forward is the transport's concern; the
            // request just flags the session.
            let _ = self
                .channel
                .request_x11(false, false, "MIT-MAGIC-COOKIE-1", "", 0)
                .await;
        }

        let exec_cmd = command.join(" ");
        self.channel
            .exec(true, exec_cmd.as_str())
            .await
            .with_context(|| format!("Failed to execute command on {}", self.host))?;

        let mut input_rx = match input {
            SessionInput::Broadcast(rx) => Some(rx),
            SessionInput::Piped(data) => {
                self.channel
                    .data(&data[..])
                    .await
                    .with_context(|| format!("Failed to write piped stdin to {}", self.host))?;
                self.channel.eof().await.ok();
                None
            }
            SessionInput::None => None,
        };

        let mut lines = LineBuffer::new();
        let mut exit_status: Option<u32> = None;

        loop {
            tokio::select! {
                msg = self.channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { ref data }) => {
                            for line in lines.extend_and_split(data) {
                                let _ = output.send(line).await;
                            }
                        }
                        Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == 1 => {
                            // stderr joins the combined stream in arrival order
                            for line in lines.extend_and_split(data) {
                                let _ = output.send(line).await;
                            }
                        }
                        // The exit report does not mean end of data; keep
                        // draining until the channel closes.
                        Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                            exit_status = Some(status);
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                data = recv_or_pending(&mut input_rx) => {
                    match data {
                        Some(bytes) => {
                            self.channel
                                .data(&bytes[..])
                                .await
                                .with_context(|| format!("Failed to forward stdin to {}", self.host))?;
                        }
                        None => {
                            self.channel.eof().await.ok();
                            input_rx = None;
                        }
                    }
                }
            }
        }

        if let Some(line) = lines.take_remainder() {
            let _ = output.send(line).await;
        }

        exit_status
            .ok_or(Error::CommandDidntExit)
            .with_context(|| format!("Transport closed mid-command on {}", self.host))
    }

    async fn request_tty(&mut self) -> Result<(), Error> {
        let (width, height) = crate::pty::terminal_dimensions();
        let term = std::env::var("TERM").unwrap_or_else(|_| "xterm".to_string());

        // Echo off; nominal baud rates for compatibility.
        let modes = [
            (Pty::ECHO, 0),
            (Pty::TTY_OP_ISPEED, 14400),
            (Pty::TTY_OP_OSPEED, 14400),
        ];

        self.channel
            .request_pty(false, &term, width, height, 0, 0, &modes)
            .await
            .map_err(Error::Ssh)
    }
}

/// Receive from an optional feed; a missing feed never yields.
async fn recv_or_pending(rx: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_keeps_terminators() {
        let mut buf = LineBuffer::new();
        let lines = buf.extend_and_split(b"one\ntwo\n");
        assert_eq!(lines, vec![b"one\n".to_vec(), b"two\n".to_vec()]);
        assert!(buf.take_remainder().is_none());
    }

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.extend_and_split(b"par").is_empty());
        let lines = buf.extend_and_split(b"tial\nrest");
        assert_eq!(lines, vec![b"partial\n".to_vec()]);
        assert_eq!(buf.take_remainder(), Some(b"rest".to_vec()));
        assert!(buf.take_remainder().is_none());
    }

    #[test]
    fn test_line_buffer_reassembles_original_bytes() {
        let input: &[&[u8]] = &[b"alpha\nbra", b"vo\ncha", b"rlie"];
        let mut buf = LineBuffer::new();
        let mut reassembled = Vec::new();
        for chunk in input {
            for line in buf.extend_and_split(chunk) {
                reassembled.extend_from_slice(&line);
            }
        }
        if let Some(rest) = buf.take_remainder() {
            reassembled.extend_from_slice(&rest);
        }
        assert_eq!(reassembled, b"alpha\nbravo\ncharlie");
    }

    #[test]
    fn test_line_buffer_empty_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.extend_and_split(b"").is_empty());
        assert!(buf.take_remainder().is_none());
    }

    #[test]
    fn test_line_buffer_blank_lines_survive() {
        let mut buf = LineBuffer::new();
        let lines = buf.extend_and_split(b"\n\nx\n");
        assert_eq!(
            lines,
            vec![b"\n".to_vec(), b"\n".to_vec(), b"x\n".to_vec()]
        );
    }
}
