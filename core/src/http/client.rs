/*
 * client.rs
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

//! HTTP client: pooled keep-alive connections, optional CONNECT proxy, TLS, and a cookie jar.
//!
//! Requests to the same (scheme, host, port) share one physical connection and are
//! serialized over it in arrival order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::timeout;
use tokio_rustls::rustls::RootCertStore;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{HttpError, Result};
use crate::http::connection::exchange;
use crate::http::cookie::Cookie;
use crate::http::cookie_jar::CookieJar;
use crate::http::pool::{ConnectionPool, PoolKey, PooledConnection};
use crate::http::proxy;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::net::{self, HttpStream, TlsConnectors};

/// URL schemes the client can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn of(url: &Url) -> Result<Self> {
        match url.scheme() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(HttpError::Protocol(format!(
                "unsupported URL scheme {:?}",
                other
            ))),
        }
    }
}

pub struct HttpClient {
    config: ClientConfig,
    pool: ConnectionPool,
    cookies: Arc<Mutex<CookieJar>>,
    /// None means the platform roots.
    tls: Option<TlsConnectors>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Self {
        let pool = ConnectionPool::new(config.idle_timeout());
        Self {
            config,
            pool,
            cookies: Arc::new(Mutex::new(CookieJar::new())),
            tls: None,
        }
    }

    /// A client whose HTTPS connections trust only `roots` instead of the platform store.
    pub fn with_tls_roots(config: ClientConfig, roots: RootCertStore) -> Result<Self> {
        let tls = TlsConnectors::with_roots(roots)
            .map_err(|e| HttpError::transport("TLS configuration", e))?;
        let mut client = Self::new(config);
        client.tls = Some(tls);
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Lock the cookie jar. Do not hold the guard across a request.
    pub fn cookie_jar(&self) -> MutexGuard<'_, CookieJar> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every stored cookie.
    pub fn all_cookies(&self) -> Vec<Cookie> {
        self.cookie_jar().all_cookies()
    }

    /// Put previously saved cookies back into the jar.
    pub fn restore_cookies(&self, cookies: impl IntoIterator<Item = Cookie>) {
        let mut jar = self.cookie_jar();
        for cookie in cookies {
            jar.insert(cookie);
        }
    }

    /// Send `request` and wait for the complete response.
    ///
    /// Cookies from the jar are attached (when the cookie container is enabled) and a `Host`
    /// header is added if missing, so `request` is modified. The connection goes back to the
    /// pool unless the request or the response asked for it to be closed.
    pub async fn send_request(&self, request: &mut Request) -> Result<Response> {
        let scheme = Scheme::of(&request.url)?;
        let mut conn = self.acquire_connected(&request.url, scheme).await?;

        if self.config.cookie_container {
            let cookies = self.cookie_jar().get_cookies(&request.url);
            for cookie in cookies {
                request.add_cookie(cookie.name, cookie.value);
            }
        }
        request.ensure_host_header();

        let jar = if self.config.cookie_container {
            Some(&*self.cookies)
        } else {
            None
        };
        debug!(method = %request.method, url = %request.url, key = %conn.key(), "sending request");
        let result = match conn.stream_mut() {
            Some(stream) => match self.config.request_timeout() {
                Some(limit) => timeout(limit, exchange(stream, request, jar))
                    .await
                    .unwrap_or(Err(HttpError::Timeout(limit))),
                None => exchange(stream, request, jar).await,
            },
            None => Err(HttpError::Protocol("connection has no transport".to_string())),
        };

        match result {
            Ok(response) => {
                if request.keep_alive() && !response.wants_close() {
                    conn.release();
                } else {
                    debug!(key = %conn.key(), "closing connection after response");
                    conn.remove();
                }
                Ok(response)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "request failed");
                if e.is_transport() {
                    conn.remove();
                }
                // Otherwise dropping `conn` closes the transport and frees the slot.
                Err(e)
            }
        }
    }

    /// Make sure a pooled connection to `url`'s origin exists, opening one if needed.
    /// Returns true once the connection is established; it is left idle in the pool.
    pub async fn connect(&self, url: &Url) -> Result<bool> {
        let scheme = Scheme::of(url)?;
        let conn = self.acquire_connected(url, scheme).await?;
        conn.release();
        Ok(true)
    }

    /// Close every pooled connection.
    pub async fn dispose(&self) {
        self.pool.dispose().await;
    }

    async fn acquire_connected(
        &self,
        url: &Url,
        scheme: Scheme,
    ) -> Result<PooledConnection> {
        let key = PoolKey::from_url(url)
            .ok_or_else(|| HttpError::Protocol(format!("URL has no host: {}", url)))?;
        let mut conn = self.pool.acquire(&key).await;
        if !conn.is_connected() {
            let stream = self.establish(&key, scheme).await?;
            conn.install(stream);
        }
        Ok(conn)
    }

    async fn establish(&self, key: &PoolKey, scheme: Scheme) -> Result<HttpStream> {
        let deadline = self.config.connect_timeout();
        let proxied = self.config.proxy.is_some();
        debug!(key = %key, proxied, "opening connection");
        let tcp = match &self.config.proxy {
            Some(proxy) => proxy::open_tunnel(proxy, &key.host, key.port, deadline).await?,
            None => net::connect_tcp(&key.host, key.port, deadline)
                .await
                .map_err(|e| HttpError::transport("connect", e))?,
        };
        match scheme {
            Scheme::Http => Ok(HttpStream::Plain(tcp)),
            Scheme::Https => {
                let connectors = match &self.tls {
                    Some(connectors) => connectors.clone(),
                    None => TlsConnectors::platform()
                        .map_err(|e| HttpError::transport("TLS configuration", e))?,
                };
                let config = connectors.select(proxied);
                let tls = net::handshake_tls(tcp, &key.host, config, deadline)
                    .await
                    .map_err(|e| HttpError::transport("TLS handshake", e))?;
                Ok(HttpStream::Tls(Box::new(tls)))
            }
        }
    }
}
