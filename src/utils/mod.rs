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

pub mod logging;

pub use logging::init_logging;

use std::path::{Path, PathBuf};

/// Expand a leading tilde to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

/// Resolve the local username for connections with no configured user.
pub fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde_absolute_path_unchanged() {
        let path = Path::new("/etc/mssh/config.yaml");
        assert_eq!(expand_tilde(path), PathBuf::from("/etc/mssh/config.yaml"));
    }

    #[test]
    fn test_expand_tilde_home_relative() {
        std::env::set_var("HOME", "/home/test");
        let path = Path::new("~/.config/mssh/config.yaml");
        assert_eq!(
            expand_tilde(path),
            PathBuf::from("/home/test/.config/mssh/config.yaml")
        );
    }
}
