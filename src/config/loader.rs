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

//! Configuration loading and target resolution.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::{Config, ServerConfig};
use crate::utils::expand_tilde;

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        if !expanded_path.exists() {
            tracing::debug!(
                "Config file not found at {:?}, using defaults",
                expanded_path
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&expanded_path).await.with_context(|| {
            format!(
                "Failed to read configuration file at {}. Please check file permissions.",
                expanded_path.display()
            )
        })?;

        let config: Config = serde_yaml::from_str(&content).with_context(|| {
            format!(
                "Failed to parse YAML configuration file at {}. Please check the YAML syntax is valid.",
                expanded_path.display()
            )
        })?;

        Ok(config)
    }

    /// Default configuration file location (`~/.config/mssh/config.yaml`).
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = ProjectDirs::from("", "", "mssh") {
            dirs.config_dir().join("config.yaml")
        } else {
            PathBuf::from("~/.config/mssh/config.yaml")
        }
    }

    /// Look up a server record by name, with defaults merged in.
    ///
    /// Unknown names are an upfront validation failure; callers abort
    /// before any connection attempt.
    pub fn resolve_server(&self, name: &str) -> Result<ServerConfig> {
        let server = self
            .servers
            .get(name)
            .with_context(|| format!("Unknown server '{name}' (not present in configuration)"))?;
        Ok(server.clone().with_defaults(&self.defaults))
    }

    /// Validate a list of target names, returning the resolved records in
    /// the order given.
    pub fn resolve_targets(&self, names: &[String]) -> Result<Vec<(String, ServerConfig)>> {
        names
            .iter()
            .map(|name| Ok((name.clone(), self.resolve_server(name)?)))
            .collect()
    }
}
