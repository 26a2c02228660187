/*
 * mod.rs
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

//! In-process origin and proxy servers for the client tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// Builds the raw response for the n-th request (0-based, across all connections).
pub type Responder = Arc<dyn Fn(usize, &str) -> Vec<u8> + Send + Sync>;

#[derive(Clone)]
pub struct MockServer {
    pub port: u16,
    /// Accepted TCP connections.
    pub connections: Arc<AtomicUsize>,
    /// Request heads (and CONNECT lines for a proxy) in arrival order.
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Read one request head plus its Content-Length body. None on EOF.
pub async fn read_request<S: AsyncRead + Unpin>(socket: &mut S) -> Option<String> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let body_len = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < head_end + body_len {
        let n = socket.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

async fn serve<S: AsyncRead + AsyncWrite + Unpin>(
    mut socket: S,
    responder: Responder,
    counter: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
) {
    while let Some(request) = read_request(&mut socket).await {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let close = request
            .to_ascii_lowercase()
            .contains("\r\nconnection: close\r\n");
        requests.lock().unwrap().push(request.clone());
        let response = responder(n, &request);
        if socket.write_all(&response).await.is_err() {
            return;
        }
        let close = close
            || String::from_utf8_lossy(&response)
                .to_ascii_lowercase()
                .contains("\r\nconnection: close\r\n");
        if close {
            let _ = socket.shutdown().await;
            return;
        }
    }
}

/// Self-signed certificate for `names`, served by `acceptor` and trusted by `roots`.
pub struct TlsFixture {
    pub acceptor: TlsAcceptor,
    pub roots: RootCertStore,
}

pub fn tls_fixture(names: &[&str]) -> TlsFixture {
    let names = names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
    let cert = rcgen::generate_simple_self_signed(names).unwrap();
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    let cert_der = CertificateDer::from(cert.cert);
    let mut roots = RootCertStore::empty();
    roots.add(cert_der.clone()).unwrap();
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key.into())
        .unwrap();
    TlsFixture {
        acceptor: TlsAcceptor::from(Arc::new(config)),
        roots,
    }
}

/// Accept connections forever. With `connect_reply` the socket first answers a CONNECT;
/// it then serves requests (after a TLS handshake when `tls` is set) unless the reply
/// refused the tunnel.
async fn spawn_server(
    connect_reply: Option<&'static str>,
    tls: Option<TlsAcceptor>,
    responder: Responder,
) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = MockServer {
        port: listener.local_addr().unwrap().port(),
        connections: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let state = server.clone();
    let counter = Arc::new(AtomicUsize::new(0));
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            state.connections.fetch_add(1, Ordering::SeqCst);
            let responder = responder.clone();
            let counter = counter.clone();
            let requests = state.requests.clone();
            let tls = tls.clone();
            tokio::spawn(async move {
                if let Some(reply) = connect_reply {
                    let Some(connect) = read_request(&mut socket).await else {
                        return;
                    };
                    requests.lock().unwrap().push(connect);
                    if socket.write_all(reply.as_bytes()).await.is_err()
                        || !reply.starts_with("HTTP/1.1 200")
                    {
                        return;
                    }
                }
                match tls {
                    Some(acceptor) => {
                        // A rejected handshake just ends this connection.
                        if let Ok(stream) = acceptor.accept(socket).await {
                            serve(stream, responder, counter, requests).await;
                        }
                    }
                    None => serve(socket, responder, counter, requests).await,
                }
            });
        }
    });
    server
}

/// Origin server answering every request with `responder`, keeping connections open
/// until either side asks to close.
pub async fn start_origin<F>(responder: F) -> MockServer
where
    F: Fn(usize, &str) -> Vec<u8> + Send + Sync + 'static,
{
    spawn_server(None, None, Arc::new(responder)).await
}

/// HTTPS origin presenting the certificate of `acceptor`.
pub async fn start_tls_origin<F>(acceptor: TlsAcceptor, responder: F) -> MockServer
where
    F: Fn(usize, &str) -> Vec<u8> + Send + Sync + 'static,
{
    spawn_server(None, Some(acceptor), Arc::new(responder)).await
}

/// Proxy that answers CONNECT with `reply`. When the reply is a 200 the socket then acts
/// as the origin itself, serving requests with `responder`.
pub async fn start_proxy<F>(reply: &'static str, responder: F) -> MockServer
where
    F: Fn(usize, &str) -> Vec<u8> + Send + Sync + 'static,
{
    spawn_server(Some(reply), None, Arc::new(responder)).await
}

/// Proxy that establishes every tunnel and then terminates TLS with `acceptor`, whatever
/// host the client asked for.
pub async fn start_tls_proxy<F>(acceptor: TlsAcceptor, responder: F) -> MockServer
where
    F: Fn(usize, &str) -> Vec<u8> + Send + Sync + 'static,
{
    spawn_server(
        Some("HTTP/1.1 200 Connection Established\r\n\r\n"),
        Some(acceptor),
        Arc::new(responder),
    )
    .await
}

/// Route client logs to the test harness; `RUST_LOG=tcphttp_core=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ok_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}
