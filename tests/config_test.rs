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

//! End-to-end configuration handling: file load, defaults merging,
//! target validation and chain resolution.

use mssh::config::Config;
use mssh::proxy::resolve_chain;

const SAMPLE: &str = r#"
defaults:
  user: ops
  ssh_key: ~/.ssh/id_ed25519

servers:
  web01:
    host: 10.0.0.11
    proxy: bastion
  web02:
    host: 10.0.0.12
    port: 2222
    user: deploy
  bastion:
    host: bastion.example.com
    proxy: corp-gw

proxies:
  corp-gw:
    kind: http
    host: proxy.corp.example.com
    port: 3128
    user: ops
    password: secret
"#;

async fn load_sample() -> Config {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, SAMPLE).unwrap();
    Config::load(&path).await.unwrap()
}

#[tokio::test]
async fn loads_servers_proxies_and_defaults() {
    let config = load_sample().await;

    assert_eq!(config.servers.len(), 3);
    assert_eq!(config.proxies.len(), 1);

    let web01 = config.resolve_server("web01").unwrap();
    assert_eq!(web01.effective_user(), "ops");
    assert_eq!(web01.effective_port(), 22);
    assert_eq!(web01.ssh_key.as_deref(), Some("~/.ssh/id_ed25519"));

    let web02 = config.resolve_server("web02").unwrap();
    assert_eq!(web02.effective_user(), "deploy");
    assert_eq!(web02.effective_port(), 2222);
}

#[tokio::test]
async fn resolves_targets_in_given_order() {
    let config = load_sample().await;

    let resolved = config
        .resolve_targets(&["web02".to_string(), "web01".to_string()])
        .unwrap();
    let names: Vec<&str> = resolved.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["web02", "web01"]);
}

#[tokio::test]
async fn unknown_target_aborts_resolution() {
    let config = load_sample().await;

    let err = config
        .resolve_targets(&["web01".to_string(), "db17".to_string()])
        .unwrap_err();
    assert!(err.to_string().contains("db17"));
}

#[tokio::test]
async fn loaded_config_feeds_chain_resolution() {
    let config = load_sample().await;

    // web01 -> bastion (ssh) -> corp-gw (http tunnel); dialed tunnel-first.
    let hops = resolve_chain("web01", &config).unwrap();
    let names: Vec<&str> = hops.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["corp-gw", "bastion"]);

    // web02 is a direct dial.
    assert!(resolve_chain("web02", &config).unwrap().is_empty());
}
