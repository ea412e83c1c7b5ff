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

//! Command-line interface definition.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "mssh",
    version,
    about = "Run commands and shells on multiple hosts over SSH, through proxy chains"
)]
pub struct Cli {
    /// Target server names from the configuration (repeatable, or comma-separated)
    #[arg(
        short = 'H',
        long = "host",
        value_name = "NAME",
        value_delimiter = ',',
        required = true
    )]
    pub hosts: Vec<String>,

    /// Run hosts concurrently instead of one after another
    #[arg(short, long)]
    pub parallel: bool,

    /// Configuration file (default: ~/.config/mssh/config.yaml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Request X11 forwarding on command sessions
    #[arg(short = 'x', long)]
    pub x11: bool,

    /// Allocate a pty for the remote command
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Start the remote shell with the local rc file sourced
    #[arg(long)]
    pub local_rc: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Command to run on each host; an interactive shell starts when omitted
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_run() {
        let cli = Cli::parse_from(["mssh", "-H", "web01,web02", "-p", "uname", "-a"]);
        assert_eq!(cli.hosts, vec!["web01", "web02"]);
        assert!(cli.parallel);
        assert_eq!(cli.command, vec!["uname", "-a"]);
    }

    #[test]
    fn test_parse_shell_mode() {
        let cli = Cli::parse_from(["mssh", "-H", "web01", "--local-rc"]);
        assert_eq!(cli.hosts, vec!["web01"]);
        assert!(cli.command.is_empty());
        assert!(cli.local_rc);
    }

    #[test]
    fn test_hosts_required() {
        assert!(Cli::try_parse_from(["mssh", "uname"]).is_err());
    }

    #[test]
    fn test_repeated_host_flags() {
        let cli = Cli::parse_from(["mssh", "-H", "a", "-H", "b", "-v", "-v", "true"]);
        assert_eq!(cli.hosts, vec!["a", "b"]);
        assert_eq!(cli.verbose, 2);
    }
}
