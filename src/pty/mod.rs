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

//! Interactive terminal support: raw-mode management, resize and
//! keepalive watchers, and local-rc shell injection.

pub mod interactive;
pub mod local_rc;
pub mod terminal;

pub use interactive::{InteractiveSession, ShellState};
pub use local_rc::RcPayload;
pub use terminal::{force_terminal_cleanup, terminal_dimensions, TerminalStateGuard};
