/*
 * request.rs
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

//! HTTP request: target URL, method, ordered headers, cookies to send, optional body.
//!
//! The client reads the request, may append jar cookies to it, and writes `to_bytes()`
//! to the socket.

use std::fmt;

use bytes::Bytes;
use url::{Position, Url};

use crate::http::method::Method;

#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    /// Insertion order is wire order.
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl Request {
    pub fn new(url: Url, method: Method) -> Self {
        Self {
            url,
            method,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(url, Method::Get)
    }

    /// Add or replace a header. Names compare case-insensitively; a replaced header keeps
    /// its original position.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn add_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// Set the body along with `Content-Type` (utf-8 charset) and `Content-Length`.
    pub fn set_content(&mut self, body: impl Into<Bytes>, content_type: &str) -> &mut Self {
        let body = body.into();
        self.add_header("Content-Type", format!("{}; charset=utf-8", content_type));
        self.add_header("Content-Length", body.len().to_string());
        self.body = Some(body);
        self
    }

    /// Set the raw body without touching headers.
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// False once a `Connection: close` header has been set.
    pub fn keep_alive(&self) -> bool {
        !self
            .header("Connection")
            .map(|v| v.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }

    /// Request target as written on the request line: the absolute URL without fragment.
    pub fn target(&self) -> &str {
        &self.url[..Position::AfterQuery]
    }

    /// Add `Host: host[:port]` unless the caller already set one.
    pub fn ensure_host_header(&mut self) {
        if self.header("Host").is_some() {
            return;
        }
        let host = self.url.host_str().unwrap_or_default();
        let value = match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        self.add_header("Host", value);
    }

    /// Wire format: request line, headers in insertion order, one `Cookie` line if any
    /// cookies are attached, blank line, raw body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method.as_str(), self.target());
        for (k, v) in &self.headers {
            head.push_str(k);
            head.push_str(": ");
            head.push_str(v);
            head.push_str("\r\n");
        }
        if !self.cookies.is_empty() {
            let pairs: Vec<String> = self
                .cookies
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect();
            head.push_str("Cookie: ");
            head.push_str(&pairs.join("; "));
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}
