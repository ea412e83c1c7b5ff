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

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use mssh::{
    cli::Cli,
    config::Config,
    run::Run,
    utils::init_logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path).await?;

    // Piped stdin is read once upfront and handed to every session;
    // interactive shells keep the terminal instead.
    let stdin_data = if !cli.command.is_empty() && !atty::is(atty::Stream::Stdin) {
        let mut data = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut data)
            .await
            .context("Failed to read piped stdin")?;
        (!data.is_empty()).then_some(data)
    } else {
        None
    };

    let run = Run {
        targets: cli.hosts,
        config: Arc::new(config),
        parallel: cli.parallel,
        command: cli.command,
        stdin_data,
        x11: cli.x11,
        force_tty: cli.tty,
        use_local_rc: cli.local_rc,
    };

    run.start().await
}
