/*
 * lib.rs
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

//! tcphttp: an HTTP/1.1 client over raw TCP and TLS sockets, with connection pooling,
//! CONNECT proxy tunnelling, and a cookie jar.

pub mod config;
pub mod error;
pub mod http;
pub mod net;

pub use config::{ClientConfig, ConfigError, ProxyConfig};
pub use error::HttpError;
pub use http::{Cookie, CookieJar, HttpClient, Method, Request, Response};
pub use net::TlsConnectors;
pub use tokio_rustls::rustls::RootCertStore;
