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

//! Local terminal state management for interactive sessions.

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Global terminal cleanup synchronization
/// Ensures only one cleanup attempt happens even with multiple guards
static TERMINAL_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// RAII guard putting the local terminal into raw mode.
///
/// Restoration happens on drop, so every exit path of an interactive
/// session - including pty-request and shell-start failures - returns
/// the terminal to its prior state.
pub struct TerminalStateGuard {
    entered: bool,
}

impl TerminalStateGuard {
    /// Enter raw mode, recording that this guard owns the restore.
    pub fn new() -> Result<Self> {
        let _guard = TERMINAL_MUTEX.lock().unwrap();
        let mut entered = false;
        if !RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
            enable_raw_mode().with_context(|| "Failed to enable raw mode")?;
            RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
            entered = true;
        }
        Ok(Self { entered })
    }

    fn restore(&self) {
        let _guard = TERMINAL_MUTEX.lock().unwrap();
        if self.entered && RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
            if let Err(e) = disable_raw_mode() {
                eprintln!("Warning: Failed to disable raw mode during cleanup: {e}");
            } else {
                RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for TerminalStateGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Force terminal cleanup - can be called from anywhere to ensure the
/// terminal is restored, e.g. from a panic or signal path.
pub fn force_terminal_cleanup() {
    let _guard = TERMINAL_MUTEX.lock().unwrap();
    if RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
        let _ = disable_raw_mode();
        RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Get current terminal size, with a conservative fallback.
pub fn terminal_dimensions() -> (u32, u32) {
    if let Some((terminal_size::Width(w), terminal_size::Height(h))) =
        terminal_size::terminal_size()
    {
        (u32::from(w), u32::from(h))
    } else {
        (80, 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_dimensions_nonzero() {
        let (w, h) = terminal_dimensions();
        assert!(w > 0);
        assert!(h > 0);
    }
}
