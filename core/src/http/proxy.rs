/*
 * proxy.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of tcphttp, an HTTP/1.1 client over raw TCP and TLS sockets.
 *
 * tcphttp is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * tcphttp is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with tcphttp.  If not, see <http://www.gnu.org/licenses/>.
 */

//! CONNECT tunnelling through an HTTP proxy.
//!
//! The proxy must answer exactly `HTTP/1.1 200 Connection Established`; after that the
//! socket is a raw relay to the target and the caller continues with plain HTTP or a
//! TLS handshake on top of it.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ProxyConfig;
use crate::error::{HttpError, Result};
use crate::net;

const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established";
/// Largest CONNECT response head accepted.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

pub fn connect_request(host: &str, port: u16) -> String {
    format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
        host = host,
        port = port
    )
}

/// Open a TCP connection to `proxy` and establish a tunnel to `host:port`.
pub async fn open_tunnel(
    proxy: &ProxyConfig,
    host: &str,
    port: u16,
    deadline: Duration,
) -> Result<TcpStream> {
    debug!(proxy = %proxy.host, proxy_port = proxy.port, host, port, "opening CONNECT tunnel");
    let mut tcp = net::connect_tcp(&proxy.host, proxy.port, deadline)
        .await
        .map_err(|e| {
            HttpError::ProxyTunnel(format!(
                "connect to proxy {}:{}: {}",
                proxy.host, proxy.port, e
            ))
        })?;
    timeout(deadline, handshake(&mut tcp, host, port))
        .await
        .map_err(|_| HttpError::ProxyTunnel("CONNECT handshake timed out".to_string()))??;
    Ok(tcp)
}

async fn handshake(tcp: &mut TcpStream, host: &str, port: u16) -> Result<()> {
    tcp.write_all(connect_request(host, port).as_bytes())
        .await
        .map_err(|e| HttpError::ProxyTunnel(format!("write CONNECT: {}", e)))?;
    let head = read_response_head(tcp).await?;
    if !head.starts_with(ESTABLISHED) {
        let status = head
            .split(|&b| b == b'\r')
            .next()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .unwrap_or_default();
        return Err(HttpError::ProxyTunnel(format!(
            "proxy refused CONNECT to {}:{}: {}",
            host, port, status
        )));
    }
    debug!(host, port, "tunnel established");
    Ok(())
}

/// Read up to and including the blank line ending the proxy's response head.
async fn read_response_head(tcp: &mut TcpStream) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(256);
    let mut tmp = [0u8; 1024];
    loop {
        let n = tcp
            .read(&mut tmp)
            .await
            .map_err(|e| HttpError::ProxyTunnel(format!("read CONNECT response: {}", e)))?;
        if n == 0 {
            return Err(HttpError::ProxyTunnel(
                "proxy closed the connection during CONNECT".to_string(),
            ));
        }
        head.extend_from_slice(&tmp[..n]);
        // A mismatching prefix can be rejected before the head is complete.
        let prefix = head.len().min(ESTABLISHED.len());
        if head[..prefix] != ESTABLISHED[..prefix] {
            return Ok(head);
        }
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(HttpError::ProxyTunnel(
                "CONNECT response head too large".to_string(),
            ));
        }
    }
}
