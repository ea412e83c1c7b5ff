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

//! Tunnel-kind proxy dialers.
//!
//! An http/https/socks5 hop yields a raw byte stream to the next
//! endpoint; the SSH handshake is layered on top by the caller. Such a
//! hop can only appear first in a chain.

use base64::Engine;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use super::client::CONNECT_TIMEOUT;
use super::error::Error;
use crate::config::{ProxyConfig, ProxyKind};

/// Upper bound on a CONNECT response before the tunnel is considered broken.
const CONNECT_RESPONSE_LIMIT: usize = 8192;

/// A stream obtained through a tunnel-kind proxy, plain or TLS-wrapped.
pub enum TunnelStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TunnelStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            TunnelStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            TunnelStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            TunnelStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TunnelStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            TunnelStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TunnelStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            TunnelStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Dial `dest_host:dest_port` through a tunnel-kind proxy.
pub async fn dial_via_proxy(
    name: &str,
    proxy: &ProxyConfig,
    dest_host: &str,
    dest_port: u16,
) -> Result<TunnelStream, Error> {
    tokio::time::timeout(CONNECT_TIMEOUT, async {
        match proxy.kind {
            ProxyKind::Socks5 => dial_socks5(name, proxy, dest_host, dest_port).await,
            ProxyKind::Http => dial_http(name, proxy, dest_host, dest_port, false).await,
            ProxyKind::Https => dial_http(name, proxy, dest_host, dest_port, true).await,
        }
    })
    .await
    .map_err(|_| Error::ConnectTimeout(CONNECT_TIMEOUT))?
}

async fn dial_socks5(
    name: &str,
    proxy: &ProxyConfig,
    dest_host: &str,
    dest_port: u16,
) -> Result<TunnelStream, Error> {
    let proxy_addr = format!("{}:{}", proxy.host, proxy.port);
    let target = (dest_host, dest_port);

    let map_err = |e: tokio_socks::Error| Error::ProxyHandshake {
        proxy: name.to_string(),
        reason: e.to_string(),
    };

    let stream = if let (Some(user), Some(pass)) = (&proxy.user, &proxy.password) {
        tokio_socks::tcp::Socks5Stream::connect_with_password(
            proxy_addr.as_str(),
            target,
            user,
            pass,
        )
        .await
        .map_err(map_err)?
    } else {
        tokio_socks::tcp::Socks5Stream::connect(proxy_addr.as_str(), target)
            .await
            .map_err(map_err)?
    };

    Ok(TunnelStream::Plain(stream.into_inner()))
}

async fn dial_http(
    name: &str,
    proxy: &ProxyConfig,
    dest_host: &str,
    dest_port: u16,
    tls: bool,
) -> Result<TunnelStream, Error> {
    let tcp = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;

    if tls {
        let mut root_store = RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            root_store.add(cert).ok();
        }
        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let server_name =
            ServerName::try_from(proxy.host.clone()).map_err(|e| Error::ProxyHandshake {
                proxy: name.to_string(),
                reason: format!("invalid proxy server name: {e}"),
            })?;
        let mut stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await?;
        http_connect_handshake(name, proxy, &mut stream, dest_host, dest_port).await?;
        Ok(TunnelStream::Tls(Box::new(stream)))
    } else {
        let mut stream = tcp;
        http_connect_handshake(name, proxy, &mut stream, dest_host, dest_port).await?;
        Ok(TunnelStream::Plain(stream))
    }
}

/// Send an HTTP CONNECT request and consume the response headers.
async fn http_connect_handshake<S>(
    name: &str,
    proxy: &ProxyConfig,
    stream: &mut S,
    dest_host: &str,
    dest_port: u16,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!(
        "CONNECT {dest_host}:{dest_port} HTTP/1.1\r\nHost: {dest_host}:{dest_port}\r\n"
    );
    if let (Some(user), Some(pass)) = (&proxy.user, &proxy.password) {
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // Read until the end of the response headers.
    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() > CONNECT_RESPONSE_LIMIT {
            return Err(Error::ProxyHandshake {
                proxy: name.to_string(),
                reason: "CONNECT response too large".to_string(),
            });
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::ProxyHandshake {
                proxy: name.to_string(),
                reason: "connection closed during CONNECT".to_string(),
            });
        }
        response.push(byte[0]);
    }

    let status_line = response
        .split(|&b| b == b'\n')
        .next()
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .unwrap_or_default();

    if !is_connect_established(&status_line) {
        return Err(Error::ProxyHandshake {
            proxy: name.to_string(),
            reason: format!("CONNECT rejected: {status_line}"),
        });
    }

    Ok(())
}

fn is_connect_established(status_line: &str) -> bool {
    let mut parts = status_line.split_whitespace();
    matches!(
        (parts.next(), parts.next()),
        (Some(version), Some("200")) if version.starts_with("HTTP/")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_status_line_accepted() {
        assert!(is_connect_established("HTTP/1.1 200 Connection established"));
        assert!(is_connect_established("HTTP/1.0 200 OK"));
    }

    #[test]
    fn test_connect_status_line_rejected() {
        assert!(!is_connect_established("HTTP/1.1 407 Proxy Authentication Required"));
        assert!(!is_connect_established("HTTP/1.1 502 Bad Gateway"));
        assert!(!is_connect_established(""));
        assert!(!is_connect_established("garbage 200"));
    }

    #[tokio::test]
    async fn test_http_connect_handshake_roundtrip() {
        // Speak the proxy side of the handshake over an in-memory duplex.
        let (mut proxy_side, mut client_side) = tokio::io::duplex(4096);

        let proxy_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let n = proxy_side.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            proxy_side
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            request
        });

        let proxy = ProxyConfig {
            kind: ProxyKind::Http,
            host: "proxy.example.com".to_string(),
            port: 8080,
            user: None,
            password: None,
        };
        http_connect_handshake("gw", &proxy, &mut client_side, "web01", 22)
            .await
            .unwrap();

        let request = proxy_task.await.unwrap();
        assert!(request.starts_with("CONNECT web01:22 HTTP/1.1\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_http_connect_handshake_rejection() {
        let (mut proxy_side, mut client_side) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let _ = proxy_side.read(&mut buf).await.unwrap();
            proxy_side
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = ProxyConfig {
            kind: ProxyKind::Http,
            host: "proxy.example.com".to_string(),
            port: 8080,
            user: None,
            password: None,
        };
        let err = http_connect_handshake("gw", &proxy, &mut client_side, "web01", 22)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("407"));
    }

    #[tokio::test]
    async fn test_http_connect_sends_basic_auth() {
        let (mut proxy_side, mut client_side) = tokio::io::duplex(4096);

        let proxy_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let n = proxy_side.read(&mut buf).await.unwrap();
            proxy_side
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let proxy = ProxyConfig {
            kind: ProxyKind::Http,
            host: "proxy.example.com".to_string(),
            port: 8080,
            user: Some("user".to_string()),
            password: Some("secret".to_string()),
        };
        http_connect_handshake("gw", &proxy, &mut client_side, "web01", 22)
            .await
            .unwrap();

        let request = proxy_task.await.unwrap();
        let expected = base64::engine::general_purpose::STANDARD.encode("user:secret");
        assert!(request.contains(&format!("Proxy-Authorization: Basic {expected}")));
    }
}
