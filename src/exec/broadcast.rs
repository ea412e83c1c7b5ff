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

//! Local input fan-out across host sessions.
//!
//! Each host task publishes exactly one writable handle before first
//! use; the broadcaster then duplicates every stdin chunk to all of
//! them. Delivery is sequential in registration order, so one slow host
//! can delay delivery timing to the hosts after it.

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Fan-out writer over the per-host input handles.
pub struct BroadcastInput {
    writers: Vec<mpsc::Sender<Vec<u8>>>,
}

impl BroadcastInput {
    pub fn new(writers: Vec<mpsc::Sender<Vec<u8>>>) -> Self {
        Self { writers }
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    /// Duplicate one chunk to every host, sequentially.
    ///
    /// A host whose session already ended is skipped; the remaining
    /// hosts still receive the chunk.
    pub async fn write(&self, data: &[u8]) {
        for writer in &self.writers {
            let _ = writer.send(data.to_vec()).await;
        }
    }
}

/// Copy local stdin into the broadcast sink until EOF or a stop signal.
///
/// Dropping the broadcaster at task end closes every per-host feed,
/// which the sessions translate into channel EOF.
pub fn spawn_stdin_copy(
    input: BroadcastInput,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                read = stdin.read(&mut buf) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => input.write(&buf[..n]).await,
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
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

    #[tokio::test]
    async fn test_broadcast_duplicates_to_all_writers_in_order() {
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let input = BroadcastInput::new(vec![tx_a, tx_b]);

        input.write(b"ls -l\n").await;
        input.write(b"exit\n").await;

        assert_eq!(rx_a.recv().await.unwrap(), b"ls -l\n".to_vec());
        assert_eq!(rx_a.recv().await.unwrap(), b"exit\n".to_vec());
        assert_eq!(rx_b.recv().await.unwrap(), b"ls -l\n".to_vec());
        assert_eq!(rx_b.recv().await.unwrap(), b"exit\n".to_vec());
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_hosts() {
        let (tx_a, rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        drop(rx_a);
        let input = BroadcastInput::new(vec![tx_a, tx_b]);

        input.write(b"uptime\n").await;
        assert_eq!(rx_b.recv().await.unwrap(), b"uptime\n".to_vec());
    }

    #[tokio::test]
    async fn test_stdin_copy_stops_on_signal() {
        let (tx, _rx) = mpsc::channel(8);
        let input = BroadcastInput::new(vec![tx]);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = spawn_stdin_copy(input, stop_rx);
        stop_tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("stdin copy task should stop promptly")
            .unwrap();
    }
}
