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

//! HTTP/1.1 client over pooled TCP and TLS sockets.
//!
//! - `client`: `HttpClient`, the entry point (`send_request`, `connect`, `dispose`).
//! - `pool`: one serialized, reusable socket per (scheme, host, port).
//! - `h1`: push parser for responses (chunked, Content-Length, no body).
//! - `cookie`, `cookie_jar`: RFC 6265 cookies kept per domain and path.
//! - `proxy`: CONNECT tunnel through an HTTP proxy.

mod connection;
mod method;
mod request;
mod response;

pub mod client;
pub mod cookie;
pub mod cookie_jar;
pub mod h1;
pub mod pool;
pub mod proxy;

pub use client::{HttpClient, Scheme};
pub use cookie::{Cookie, CookieKey};
pub use cookie_jar::CookieJar;
pub use method::Method;
pub use pool::{ConnectionPool, PoolKey, PooledConnection};
pub use request::Request;
pub use response::Response;
